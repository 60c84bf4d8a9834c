use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Slack applied before a token's recorded expiry so a request started now
/// does not race the deadline.
const EXPIRY_SKEW_SECS: i64 = 60;

/// OAuth2 credential bundle persisted between runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Token {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
}

fn default_token_type() -> String {
    "Bearer".to_owned()
}

impl Token {
    /// Build a token from an `expires_in` seconds value as returned by a token endpoint.
    pub fn from_expires_in(
        access_token: String,
        refresh_token: Option<String>,
        token_type: Option<String>,
        expires_in: Option<i64>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token,
            refresh_token,
            token_type: token_type.unwrap_or_else(default_token_type),
            expiry: expires_in.map(|secs| now + Duration::seconds(secs)),
        }
    }

    /// A token without an expiry never goes stale.
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) => expiry - Duration::seconds(EXPIRY_SKEW_SECS) > now,
            None => true,
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Utc::now())
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}
