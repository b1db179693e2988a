//! In-memory token store for testing.
//!
//! Records live in a `HashMap` behind a `RwLock` and are lost when the process
//! exits. Hashing, validation, expiry, the decoy verify on a miss and the
//! disconnect lifecycle match [`PostgresStore`](crate::PostgresStore), so code
//! written against [`TokenStore`] can be tested without a database.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::time::Duration;

use tokio::sync::{OnceCell, RwLock};

use crate::error::{StorageError, StoreResult, ValidationError};
use crate::hashing::TokenHasher;
use crate::record::{Authenticated, TokenRecord, now_millis};
use crate::store::{TokenStore, check_store_args, check_token_and_uid, check_uid};

/// An in-memory token store keyed by uid.
///
/// Clones share state.
///
/// # Examples
///
/// ```
/// # use std::time::Duration;
/// # use passwordless_pgstore::{MemoryStore, TokenStore};
/// # #[tokio::main]
/// # async fn main() {
/// let store = MemoryStore::with_work_factor(4).unwrap();
/// store.store_or_update("t0k3n", "bob", Duration::from_secs(60), None).await.unwrap();
/// assert!(store.authenticate("t0k3n", "bob").await.unwrap().is_some());
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    hasher: TokenHasher,
    records: Arc<RwLock<HashMap<String, TokenRecord>>>,
    next_id: Arc<AtomicI32>,
    closed: Arc<AtomicBool>,
    decoy_hash: Arc<OnceCell<String>>,
}

impl MemoryStore {
    /// Create an empty store with the default work factor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store hashing at the given bcrypt cost.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::WorkFactorOutOfRange`] for unsupported costs.
    pub fn with_work_factor(cost: u32) -> Result<Self, ValidationError> {
        Ok(Self {
            hasher: TokenHasher::new(cost)?,
            ..Self::default()
        })
    }

    /// Fetch the raw record for `uid`, expired or not.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::EmptyUid`] if `uid` is empty.
    /// - [`StorageError::Disconnected`] after disconnect.
    pub async fn record(&self, uid: &str) -> StoreResult<Option<TokenRecord>> {
        check_uid(uid)?;
        self.ensure_open()?;
        Ok(self.records.read().await.get(uid).cloned())
    }

    /// Delete every expired record and return how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Disconnected`] after disconnect.
    pub async fn purge_expired(&self) -> StoreResult<u64> {
        self.ensure_open()?;
        let now = now_millis();
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| !record.is_expired_at(now));
        Ok((before - records.len()) as u64)
    }

    async fn decoy_hash(&self) -> StoreResult<&str> {
        let hash = self
            .decoy_hash
            .get_or_try_init(|| self.hasher.hash_blocking("decoy"))
            .await?;
        Ok(hash.as_str())
    }

    fn ensure_open(&self) -> Result<(), StorageError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Disconnected);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl TokenStore for MemoryStore {
    async fn store_or_update(
        &self,
        token: &str,
        uid: &str,
        ttl: Duration,
        origin: Option<&str>,
    ) -> StoreResult<()> {
        let expires_at = check_store_args(token, uid, ttl, origin)?;
        self.ensure_open()?;
        let token_hash = self.hasher.hash_blocking(token).await?;

        let mut records = self.records.write().await;
        let id = records
            .get(uid)
            .map_or_else(|| self.next_id.fetch_add(1, Ordering::Relaxed) + 1, |r| r.id);
        records.insert(
            uid.to_owned(),
            TokenRecord {
                id,
                uid: uid.to_owned(),
                token_hash,
                origin: origin.map(str::to_owned),
                ttl: Some(expires_at),
            },
        );
        Ok(())
    }

    async fn authenticate(&self, token: &str, uid: &str) -> StoreResult<Option<Authenticated>> {
        check_token_and_uid(token, uid)?;
        let usable = self
            .record(uid)
            .await?
            .filter(|record| !record.is_expired_at(now_millis()));
        let Some(record) = usable else {
            let decoy = self.decoy_hash().await?;
            TokenHasher::verify_blocking(token, decoy).await?;
            return Ok(None);
        };
        if TokenHasher::verify_blocking(token, &record.token_hash).await? {
            Ok(Some(Authenticated {
                origin: record.origin,
            }))
        } else {
            Ok(None)
        }
    }

    async fn invalidate_user(&self, uid: &str) -> StoreResult<()> {
        check_uid(uid)?;
        self.ensure_open()?;
        self.records.write().await.remove(uid);
        Ok(())
    }

    async fn clear(&self) -> StoreResult<()> {
        self.ensure_open()?;
        self.records.write().await.clear();
        Ok(())
    }

    async fn length(&self) -> StoreResult<u64> {
        self.ensure_open()?;
        Ok(self.records.read().await.len() as u64)
    }

    async fn disconnect(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
