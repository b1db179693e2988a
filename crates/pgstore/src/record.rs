//! Row model for stored tokens.

use chrono::Utc;
use serde::Serialize;

/// One stored token, at most one per user.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct TokenRecord {
    /// Surrogate key assigned by the database.
    pub id: i32,
    /// User identifier.
    pub uid: String,
    /// bcrypt hash of the token, salt and cost included.
    #[sqlx(rename = "token")]
    pub token_hash: String,
    /// URL or opaque string the token was issued for.
    pub origin: Option<String>,
    /// Absolute expiry in epoch milliseconds.
    pub ttl: Option<i64>,
}

impl TokenRecord {
    /// Whether the record is unusable at `now_ms`.
    ///
    /// A record without an expiry never authenticates.
    #[must_use]
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        is_expired(self.ttl, now_ms)
    }
}

/// Successful authentication: the origin the token was issued for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Authenticated {
    /// Stored origin, returned verbatim.
    pub origin: Option<String>,
}

/// Current time in epoch milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub(crate) fn is_expired(ttl: Option<i64>, now_ms: i64) -> bool {
    ttl.is_none_or(|expires_at| now_ms > expires_at)
}
