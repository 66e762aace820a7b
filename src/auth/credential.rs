use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Default safety margin before hard expiry at which a credential is refreshed.
pub const DEFAULT_REFRESH_BUFFER: Duration = Duration::from_secs(300);

/// OAuth credential returned by the token endpoint.
///
/// The field names match the token endpoint's JSON payload, so the same type
/// is used for decoding responses and for persistence. Token strings are
/// wiped from memory when the value is dropped.
///
/// # Example
/// ```
/// use gitlab_oauth::auth::Credential;
///
/// let credential = Credential {
///     access_token: "access".to_string(),
///     token_type: "Bearer".to_string(),
///     expires_in: 7200,
///     refresh_token: "refresh".to_string(),
///     created_at: 1_700_000_000,
/// };
/// assert_eq!(credential.expires_at_unix(), 1_700_007_200);
/// assert!(!credential.is_stale_at(1_700_000_000, 300));
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Credential {
    pub access_token: String,
    pub token_type: String,
    /// Lifetime in seconds, counted from `created_at`.
    pub expires_in: i64,
    pub refresh_token: String,
    /// Issue instant, seconds since the Unix epoch.
    #[serde(default = "unix_now")]
    pub created_at: i64,
}

impl Credential {
    pub fn expires_at_unix(&self) -> i64 {
        self.created_at.saturating_add(self.expires_in)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.expires_at_unix(), 0)
    }

    /// Stale means fewer than `buffer_secs` seconds remain before expiry.
    pub fn is_stale_at(&self, now: i64, buffer_secs: i64) -> bool {
        self.expires_at_unix().saturating_sub(now) < buffer_secs
    }

    pub fn is_stale(&self, buffer: Duration) -> bool {
        self.is_stale_at(unix_now(), buffer_secs(buffer))
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at_unix() <= now
    }

    /// True when the whole lifetime fits inside `buffer_secs`, so the
    /// credential would be stale from the moment it was issued.
    pub fn is_short_lived(&self, buffer_secs: i64) -> bool {
        self.expires_in <= buffer_secs
    }

    /// Refresh decision used by the token manager: stale for normal
    /// credentials, expired for short-lived ones.
    pub fn needs_refresh_at(&self, now: i64, buffer_secs: i64) -> bool {
        if self.is_short_lived(buffer_secs) {
            self.is_expired_at(now)
        } else {
            self.is_stale_at(now, buffer_secs)
        }
    }

    /// Value for an `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"[redacted]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("refresh_token", &"[redacted]")
            .field("created_at", &self.created_at)
            .finish()
    }
}

pub(crate) fn unix_now() -> i64 {
    Utc::now().timestamp()
}

pub(crate) fn buffer_secs(buffer: Duration) -> i64 {
    i64::try_from(buffer.as_secs()).unwrap_or(i64::MAX)
}
