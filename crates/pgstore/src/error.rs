//! Error types for the token store.
//!
//! Every variant carries enough context to diagnose the problem without a
//! debugger. No variant ever carries a raw token or a stored hash.

/// A caller passed a missing or malformed argument, or the store was
/// configured with values that cannot work.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The token argument was empty.
    #[error("token must not be empty")]
    EmptyToken,

    /// The user identifier argument was empty.
    #[error("uid must not be empty")]
    EmptyUid,

    /// An argument contained a NUL byte, which PostgreSQL text cannot hold.
    #[error("{field} must not contain NUL bytes")]
    NulByte { field: &'static str },

    /// The time-to-live was zero.
    #[error("time-to-live must be positive")]
    NonPositiveTtl,

    /// The configured table name is not a plain SQL identifier.
    #[error("invalid table name '{name}': expected [A-Za-z_][A-Za-z0-9_]* of at most 63 bytes")]
    InvalidTableName { name: String },

    /// The configured bcrypt work factor is outside the supported range.
    #[error("work factor {cost} is out of range {min}..={max}")]
    WorkFactorOutOfRange { cost: u32, min: u32, max: u32 },

    /// The connection pool was configured with zero connections.
    #[error("max_connections must be at least 1")]
    InvalidPoolSize,
}

/// Connectivity, constraint, or timeout failures at the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Could not build the pool or reach the database.
    #[error("failed to connect to '{target}': {reason}")]
    Connect { target: String, reason: String },

    /// Creating the table or its indexes failed.
    #[error("schema setup for table '{table}' failed: {reason}")]
    Migration { table: String, reason: String },

    /// A statement failed while executing.
    #[error("{operation} on table '{table}' failed: {reason}")]
    Query {
        operation: &'static str,
        table: String,
        reason: String,
    },

    /// The store was disconnected; it does not reconnect.
    #[error("store is disconnected")]
    Disconnected,
}

/// Failures from the bcrypt primitive.
#[derive(Debug, thiserror::Error)]
pub enum HashingError {
    /// Producing a hash failed (bad cost or input).
    #[error("hashing failed: {reason}")]
    Hash { reason: String },

    /// The stored hash could not be parsed or verified.
    #[error("verification failed: {reason}")]
    Verify { reason: String },

    /// bcrypt only reads the first 72 bytes of its input.
    #[error("token is {len} bytes; at most {max} bytes can be hashed")]
    TokenTooLong { len: usize, max: usize },

    /// The blocking hashing task panicked or was cancelled.
    #[error("hashing task failed: {reason}")]
    Task { reason: String },
}

/// Umbrella error returned by every store operation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Invalid argument or configuration.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Persistence layer failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Hash primitive failure.
    #[error(transparent)]
    Hashing(#[from] HashingError),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
