//! PostgreSQL token store for passwordless authentication.
//!
//! This crate keeps one single-use, time-limited token per user together with
//! the origin URL it was issued for. Tokens are bcrypt-hashed with a fresh salt
//! before they are stored and are verified in constant time on the way back.
//!
//! Two implementations of the [`TokenStore`] contract are provided:
//!
//! - [`PostgresStore`] — production store, one table, atomic upsert by uid
//! - [`MemoryStore`] — in-memory, for testing only

pub mod config;
pub mod error;
pub mod hashing;
mod memory;
mod postgres;
pub mod record;
mod store;

pub use config::StoreConfig;
pub use error::{HashingError, StorageError, StoreError, StoreResult, ValidationError};
pub use hashing::{DEFAULT_WORK_FACTOR, TokenHasher};
pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use record::{Authenticated, TokenRecord};
pub use store::TokenStore;
