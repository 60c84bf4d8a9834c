//! OAuth2 authorization-code grant against Google's identity endpoints.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use odoo_backup_core::Token;
use reqwest::Url;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::DriveError;

/// Access limited to files this client creates or opens.
pub const DRIVE_FILE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";

const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Client credentials issued by the Google Cloud console.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_owned()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_owned()
}

#[derive(Deserialize)]
struct SecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    /// Parse the downloaded `client_secrets.json`; desktop (`installed`) and
    /// web application layouts are both accepted.
    pub fn from_json(raw: &str) -> Result<Self> {
        let file: SecretsFile = serde_json::from_str(raw).context("parse client secrets")?;
        file.installed
            .or(file.web)
            .ok_or_else(|| DriveError::MissingClientSection.into())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading client secrets {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("loading client secrets {}", path.display()))
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    token_type: Option<String>,
    expires_in: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    secrets: ClientSecrets,
    redirect_uri: String,
    scopes: Vec<String>,
}

impl OAuthClient {
    pub fn new(http: reqwest::Client, secrets: ClientSecrets, redirect_uri: impl Into<String>) -> Self {
        Self {
            http,
            secrets,
            redirect_uri: redirect_uri.into(),
            scopes: vec![DRIVE_FILE_SCOPE.to_owned()],
        }
    }

    /// URL the operator opens to grant offline access. `prompt=consent`
    /// makes Google issue a refresh token on every grant.
    pub fn authorization_url(&self, state: &str) -> Result<Url> {
        let scope = self.scopes.join(" ");
        Url::parse_with_params(
            &self.secrets.auth_uri,
            &[
                ("client_id", self.secrets.client_id.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("state", state),
            ],
        )
        .with_context(|| format!("invalid auth uri {}", self.secrets.auth_uri))
    }

    pub async fn exchange_code(&self, code: &str) -> Result<Token> {
        let response = self
            .request_token(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", self.secrets.client_id.as_str()),
                ("client_secret", self.secrets.client_secret.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
            ])
            .await
            .context("exchange authorization code")?;
        info!("authorization code exchanged for token");
        Ok(to_token(response, None))
    }

    /// Obtain a new access token. Google omits the refresh token from refresh
    /// responses, so the previous one is carried over.
    pub async fn refresh(&self, token: &Token) -> Result<Token> {
        let refresh_token = token
            .refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(DriveError::NoRefreshToken)?;
        let response = self
            .request_token(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.secrets.client_id.as_str()),
                ("client_secret", self.secrets.client_secret.as_str()),
            ])
            .await
            .context("refresh access token")?;
        debug!("access token refreshed");
        Ok(to_token(response, token.refresh_token.clone()))
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self
            .http
            .post(&self.secrets.token_uri)
            .form(form)
            .send()
            .await
            .with_context(|| format!("contact token endpoint {}", self.secrets.token_uri))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(DriveError::TokenEndpoint { status, body }.into());
        }
        response.json().await.context("parse token response")
    }
}

fn to_token(response: TokenResponse, previous_refresh: Option<String>) -> Token {
    Token::from_expires_in(
        response.access_token,
        response.refresh_token.or(previous_refresh),
        response.token_type,
        response.expires_in,
        Utc::now(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const INSTALLED: &str = r#"{
        "installed": {
            "client_id": "123.apps.googleusercontent.com",
            "project_id": "backups",
            "auth_uri": "https://accounts.google.com/o/oauth2/auth",
            "token_uri": "https://oauth2.googleapis.com/token",
            "client_secret": "s3cret",
            "redirect_uris": ["http://localhost"]
        }
    }"#;

    #[test]
    fn parses_installed_layout() {
        let secrets = ClientSecrets::from_json(INSTALLED).expect("parse");
        assert_eq!(secrets.client_id, "123.apps.googleusercontent.com");
        assert_eq!(secrets.client_secret, "s3cret");
    }

    #[test]
    fn parses_web_layout_with_default_endpoints() {
        let secrets =
            ClientSecrets::from_json(r#"{"web":{"client_id":"id","client_secret":"sec"}}"#).expect("parse");
        assert_eq!(secrets.auth_uri, DEFAULT_AUTH_URI);
        assert_eq!(secrets.token_uri, DEFAULT_TOKEN_URI);
    }

    #[test]
    fn rejects_file_without_client_section() {
        let err = ClientSecrets::from_json(r#"{"other":{}}"#).unwrap_err();
        assert!(matches!(err.downcast_ref::<DriveError>(), Some(DriveError::MissingClientSection)));
    }

    #[test]
    fn authorization_url_requests_offline_access() {
        let secrets = ClientSecrets::from_json(INSTALLED).expect("parse");
        let client = OAuthClient::new(reqwest::Client::new(), secrets, "http://localhost:8080/");
        let url = client.authorization_url("state-token").expect("url");

        let params: std::collections::HashMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(params["access_type"], "offline");
        assert_eq!(params["state"], "state-token");
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["redirect_uri"], "http://localhost:8080/");
        assert_eq!(params["scope"], DRIVE_FILE_SCOPE);
        assert_eq!(url.host_str(), Some("accounts.google.com"));
    }
}
