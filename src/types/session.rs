//! Access/refresh token session.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Refresh window: a session with less than this left should be refreshed.
pub const REFRESH_WINDOW_SECS: i64 = 10 * 60;

/// Values of `expires` above this are absolute epoch timestamps rather than
/// a lifetime in seconds.
const ABSOLUTE_EXPIRY_THRESHOLD: i64 = 1_000_000_000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at_epoch_secs: i64,
}

impl Session {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at_epoch_secs: i64,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at_epoch_secs,
        }
    }

    /// Session that expires `lifetime_secs` from now.
    pub fn expiring_in(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        lifetime_secs: i64,
    ) -> Self {
        Self::new(access_token, refresh_token, now_epoch_secs() + lifetime_secs)
    }

    /// Both tokens present and the expiry still in the future.
    pub fn is_authorized(&self) -> bool {
        self.is_authorized_at(now_epoch_secs())
    }

    /// Authorized, with fewer than ten minutes left.
    pub fn should_refresh(&self) -> bool {
        self.should_refresh_at(now_epoch_secs())
    }

    pub fn is_authorized_at(&self, now: i64) -> bool {
        !self.access_token.is_empty()
            && !self.refresh_token.is_empty()
            && self.expires_at_epoch_secs > now
    }

    pub fn should_refresh_at(&self, now: i64) -> bool {
        self.is_authorized_at(now) && self.expires_at_epoch_secs - now < REFRESH_WINDOW_SECS
    }

    pub fn seconds_until_expiry(&self) -> i64 {
        self.expires_at_epoch_secs - now_epoch_secs()
    }
}

/// Token endpoint response body.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub expires: Option<i64>,
}

impl TokenResponse {
    /// Build the new session. A response without a refresh token keeps the
    /// previous one.
    pub fn into_session(self, previous_refresh_token: &str) -> Session {
        let now = now_epoch_secs();
        let expires_at = match (self.expires_in, self.expires) {
            (Some(lifetime), _) => now + lifetime,
            (None, Some(e)) if e > ABSOLUTE_EXPIRY_THRESHOLD => e,
            (None, Some(lifetime)) => now + lifetime,
            (None, None) => now,
        };
        Session {
            access_token: self.access_token,
            refresh_token: self
                .refresh_token
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| previous_refresh_token.to_string()),
            expires_at_epoch_secs: expires_at,
        }
    }
}

pub(crate) fn now_epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
