use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use odoo_backup_core::Token;
use odoo_backup_drive::{ClientSecrets, OAuthClient, TokenSource};
use odoo_backup_storage::CredentialStore;
use tracing::{info, warn};

use crate::callback::CallbackListener;

/// Anti-forgery value sent with the authorization request and expected back
/// on the redirect.
pub const STATE_TOKEN: &str = "state-token";

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub client_secrets: PathBuf,
    pub token_file: PathBuf,
    pub callback_addr: SocketAddr,
    pub callback_timeout: Option<Duration>,
}

/// An authorized OAuth client together with the token it obtained.
pub struct Session {
    pub oauth: OAuthClient,
    pub token: Token,
    pub store: CredentialStore,
}

impl Session {
    pub fn into_token_source(self) -> TokenSource {
        TokenSource::new(self.oauth, self.token, self.store)
    }
}

/// Redirect target sent with the authorization request. Always the exact
/// address the callback listener binds.
pub fn redirect_uri(callback_addr: SocketAddr) -> String {
    format!("http://{callback_addr}/")
}

/// Produce a usable token: the stored one when fresh, a refreshed one when it
/// can be refreshed, otherwise a new grant from the operator.
pub async fn authorize(http: &reqwest::Client, settings: &AuthSettings) -> Result<Session> {
    let secrets = ClientSecrets::load(&settings.client_secrets)?;
    let oauth = OAuthClient::new(http.clone(), secrets, redirect_uri(settings.callback_addr));
    let store = CredentialStore::new(&settings.token_file);
    let token = obtain_token(&oauth, &store, settings).await?;
    Ok(Session { oauth, token, store })
}

pub async fn obtain_token(oauth: &OAuthClient, store: &CredentialStore, settings: &AuthSettings) -> Result<Token> {
    if let Some(stored) = store.load() {
        if stored.is_fresh() {
            info!(path = %store.path().display(), "using stored token");
            return Ok(stored);
        }
        if stored.can_refresh() {
            match oauth.refresh(&stored).await {
                Ok(refreshed) => {
                    store.save(&refreshed)?;
                    info!("stored token refreshed");
                    return Ok(refreshed);
                }
                Err(e) => warn!(error = %format!("{e:#}"), "token refresh failed, re-authorizing"),
            }
        }
    }

    let token = authorize_interactively(oauth, settings.callback_addr, settings.callback_timeout).await?;
    store
        .save(&token)
        .with_context(|| format!("save token to {}", store.path().display()))?;
    info!(path = %store.path().display(), "token saved");
    Ok(token)
}

/// Run the redirect-based grant: the operator opens the printed URL, the
/// browser is redirected to the local listener, and the received code is
/// exchanged for a token.
pub async fn authorize_interactively(
    oauth: &OAuthClient,
    callback_addr: SocketAddr,
    timeout: Option<Duration>,
) -> Result<Token> {
    let listener = CallbackListener::bind(callback_addr, STATE_TOKEN).await?;
    let url = oauth.authorization_url(STATE_TOKEN)?;

    println!("\nOpen the following link in a browser to authorize Google Drive access:\n\n{url}\n");
    info!(callback = %listener.local_addr(), "waiting for authorization from the browser");

    let code = listener.wait_for_code(timeout).await?;
    oauth.exchange_code(&code).await
}
