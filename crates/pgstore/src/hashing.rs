//! Hashing engine for authentication tokens.
//!
//! Tokens are never stored in plaintext. Before a token reaches storage it is
//! hashed with bcrypt using a fresh random salt, so two hashes of the same
//! token never match byte-for-byte even though both verify. The work factor is
//! encoded in every hash (`$2b$<cost>$...`), which keeps old hashes verifiable
//! after the configured cost changes.
//!
//! bcrypt is intentionally slow. The `*_blocking` helpers move the work onto
//! the Tokio blocking pool so request-handling tasks are not stalled.

use crate::error::{HashingError, ValidationError};

/// Default bcrypt cost for new stores.
pub const DEFAULT_WORK_FACTOR: u32 = 10;

/// Lowest cost bcrypt accepts.
pub const MIN_WORK_FACTOR: u32 = 4;

/// Highest cost bcrypt accepts.
pub const MAX_WORK_FACTOR: u32 = 31;

/// bcrypt ignores input past this many bytes.
pub const MAX_TOKEN_BYTES: usize = 72;

/// Hashes and verifies tokens at a fixed work factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenHasher {
    cost: u32,
}

impl Default for TokenHasher {
    fn default() -> Self {
        Self {
            cost: DEFAULT_WORK_FACTOR,
        }
    }
}

impl TokenHasher {
    /// Create a hasher with the given bcrypt cost.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::WorkFactorOutOfRange`] if `cost` is outside
    /// `MIN_WORK_FACTOR..=MAX_WORK_FACTOR`.
    pub fn new(cost: u32) -> Result<Self, ValidationError> {
        if !(MIN_WORK_FACTOR..=MAX_WORK_FACTOR).contains(&cost) {
            return Err(ValidationError::WorkFactorOutOfRange {
                cost,
                min: MIN_WORK_FACTOR,
                max: MAX_WORK_FACTOR,
            });
        }
        Ok(Self { cost })
    }

    /// The work factor encoded into every hash this hasher produces.
    #[must_use]
    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Hash a token with a fresh random salt.
    ///
    /// # Errors
    ///
    /// - [`HashingError::TokenTooLong`] if the token exceeds 72 bytes.
    /// - [`HashingError::Hash`] if bcrypt rejects the input or cost.
    pub fn hash(&self, token: &str) -> Result<String, HashingError> {
        check_length(token)?;
        bcrypt::hash(token, self.cost).map_err(|e| HashingError::Hash {
            reason: e.to_string(),
        })
    }

    /// Check a token against a stored hash.
    ///
    /// The salt and cost come from `hashed`, not from this hasher. The final
    /// digest comparison is constant-time inside `bcrypt::verify`.
    ///
    /// # Errors
    ///
    /// Returns [`HashingError::Verify`] if `hashed` is not a valid bcrypt hash.
    pub fn verify(token: &str, hashed: &str) -> Result<bool, HashingError> {
        if token.len() > MAX_TOKEN_BYTES {
            // Could never have been produced by `hash`.
            return Ok(false);
        }
        bcrypt::verify(token, hashed).map_err(|e| HashingError::Verify {
            reason: e.to_string(),
        })
    }

    /// Run [`hash`](Self::hash) on the blocking thread pool.
    ///
    /// # Errors
    ///
    /// Same as [`hash`](Self::hash), plus [`HashingError::Task`] if the
    /// blocking task fails to complete.
    pub async fn hash_blocking(&self, token: &str) -> Result<String, HashingError> {
        check_length(token)?;
        let hasher = *self;
        let token = token.to_owned();
        tokio::task::spawn_blocking(move || hasher.hash(&token))
            .await
            .map_err(|e| HashingError::Task {
                reason: e.to_string(),
            })?
    }

    /// Run [`verify`](Self::verify) on the blocking thread pool.
    ///
    /// # Errors
    ///
    /// Same as [`verify`](Self::verify), plus [`HashingError::Task`] if the
    /// blocking task fails to complete.
    pub async fn verify_blocking(token: &str, hashed: &str) -> Result<bool, HashingError> {
        let token = token.to_owned();
        let hashed = hashed.to_owned();
        tokio::task::spawn_blocking(move || Self::verify(&token, &hashed))
            .await
            .map_err(|e| HashingError::Task {
                reason: e.to_string(),
            })?
    }
}

/// Read the work factor encoded in a bcrypt hash.
///
/// Returns `None` if the string is not in `$2x$NN$...` form.
#[must_use]
pub fn cost_of(hashed: &str) -> Option<u32> {
    let mut parts = hashed.split('$');
    if !parts.next()?.is_empty() {
        return None;
    }
    let version = parts.next()?;
    if !matches!(version, "2a" | "2b" | "2x" | "2y") {
        return None;
    }
    let cost = parts.next()?;
    if cost.len() != 2 {
        return None;
    }
    cost.parse().ok()
}

fn check_length(token: &str) -> Result<(), HashingError> {
    if token.len() > MAX_TOKEN_BYTES {
        return Err(HashingError::TokenTooLong {
            len: token.len(),
            max: MAX_TOKEN_BYTES,
        });
    }
    Ok(())
}
