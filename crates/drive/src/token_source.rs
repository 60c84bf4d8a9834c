use anyhow::{Context, Result};
use odoo_backup_core::Token;
use odoo_backup_storage::CredentialStore;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::DriveError;
use crate::oauth::OAuthClient;

/// Hands out a valid access token before every remote call, refreshing and
/// persisting it when it has gone stale.
pub struct TokenSource {
    oauth: Option<OAuthClient>,
    store: Option<CredentialStore>,
    token: Mutex<Token>,
}

impl TokenSource {
    pub fn new(oauth: OAuthClient, token: Token, store: CredentialStore) -> Self {
        Self {
            oauth: Some(oauth),
            store: Some(store),
            token: Mutex::new(token),
        }
    }

    /// A token that is used as-is and never refreshed.
    pub fn fixed(token: Token) -> Self {
        Self {
            oauth: None,
            store: None,
            token: Mutex::new(token),
        }
    }

    pub async fn access_token(&self) -> Result<String> {
        let mut token = self.token.lock().await;
        if token.is_fresh() {
            return Ok(token.access_token.clone());
        }

        let oauth = self.oauth.as_ref().ok_or(DriveError::NoRefreshToken)?;
        let refreshed = oauth.refresh(&token).await?;
        if let Some(store) = &self.store {
            store
                .save(&refreshed)
                .with_context(|| format!("persist refreshed token to {}", store.path().display()))?;
        }
        info!(expiry = ?refreshed.expiry, "access token refreshed");
        *token = refreshed;
        Ok(token.access_token.clone())
    }
}
