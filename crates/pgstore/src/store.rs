//! The token-store contract.
//!
//! A [`TokenStore`] keeps one hashed, expiring token per user and answers a
//! single question on the way back: does this token belong to this user right
//! now? Callers get the stored origin or nothing. Unknown users, expired
//! records, and wrong tokens all look the same from outside.

use std::time::Duration;

use crate::error::{StoreResult, ValidationError};
use crate::record::{Authenticated, now_millis};

/// Persistence contract used by passwordless authentication flows.
///
/// Implementations must be safe to share across async tasks (`Send + Sync`).
/// Every future resolves only after the write it performs is durable.
#[async_trait::async_trait]
pub trait TokenStore: Send + Sync + 'static {
    /// Store `token` for `uid`, replacing any token the user already has.
    ///
    /// The token is hashed before it reaches storage. The record expires
    /// `ttl` from now. Concurrent calls for the same `uid` leave exactly one
    /// record behind.
    ///
    /// # Errors
    ///
    /// - [`ValidationError`] if `token` or `uid` is empty, any text argument
    ///   contains a NUL byte, or `ttl` is zero.
    /// - [`HashingError`](crate::HashingError) if the token cannot be hashed.
    /// - [`StorageError`](crate::StorageError) if the write fails; the previous record is left intact.
    async fn store_or_update(
        &self,
        token: &str,
        uid: &str,
        ttl: Duration,
        origin: Option<&str>,
    ) -> StoreResult<()>;

    /// Check `token` against the record for `uid`.
    ///
    /// Returns `Ok(None)` if there is no record, it has expired, or the token
    /// does not match.
    ///
    /// # Errors
    ///
    /// - [`ValidationError`] if `token` or `uid` is empty.
    /// - [`StorageError`](crate::StorageError) if the read fails.
    /// - [`HashingError`](crate::HashingError) if the stored hash is corrupt.
    async fn authenticate(&self, token: &str, uid: &str) -> StoreResult<Option<Authenticated>>;

    /// Remove the record for `uid`. Removing a missing record is not an error.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::EmptyUid`] if `uid` is empty.
    /// - [`StorageError`](crate::StorageError) if the delete fails.
    async fn invalidate_user(&self, uid: &str) -> StoreResult<()>;

    /// Remove every record.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`](crate::StorageError) if the delete fails.
    async fn clear(&self) -> StoreResult<()>;

    /// Number of stored records, including expired records that have not been
    /// deleted yet.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`](crate::StorageError) if the count fails.
    async fn length(&self) -> StoreResult<u64>;

    /// Release storage resources. Never fails and may be called repeatedly,
    /// including on a store that never connected.
    async fn disconnect(&self);
}

/// Validate `store_or_update` arguments and compute the absolute expiry.
pub(crate) fn check_store_args(
    token: &str,
    uid: &str,
    ttl: Duration,
    origin: Option<&str>,
) -> Result<i64, ValidationError> {
    check_token_and_uid(token, uid)?;
    check_origin(origin)?;
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    if ttl_ms <= 0 {
        return Err(ValidationError::NonPositiveTtl);
    }
    Ok(now_millis().saturating_add(ttl_ms))
}

pub(crate) fn check_token_and_uid(token: &str, uid: &str) -> Result<(), ValidationError> {
    if token.is_empty() {
        return Err(ValidationError::EmptyToken);
    }
    reject_nul("token", token)?;
    check_uid(uid)
}

pub(crate) fn check_uid(uid: &str) -> Result<(), ValidationError> {
    if uid.is_empty() {
        return Err(ValidationError::EmptyUid);
    }
    reject_nul("uid", uid)
}

pub(crate) fn check_origin(origin: Option<&str>) -> Result<(), ValidationError> {
    origin.map_or(Ok(()), |origin| reject_nul("origin", origin))
}

fn reject_nul(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.contains('\0') {
        return Err(ValidationError::NulByte { field });
    }
    Ok(())
}
