use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Age threshold after which a backup artifact may be deleted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_age_days: i64,
}

impl RetentionPolicy {
    pub fn days(max_age_days: i64) -> Self {
        Self { max_age_days }
    }

    /// `None` when the window is too large to represent; nothing expires then.
    pub fn max_age(&self) -> Option<Duration> {
        Duration::try_days(self.max_age_days)
    }

    /// True when the artifact is strictly older than the threshold.
    /// An age exactly equal to the threshold is kept.
    pub fn is_expired(&self, reference: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self.max_age() {
            Some(max_age) => now.signed_duration_since(reference) > max_age,
            None => false,
        }
    }
}
