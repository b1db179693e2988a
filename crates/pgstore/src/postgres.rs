//! PostgreSQL token store.
//!
//! All rows live in one table (default `passwordless`). The pool is created
//! lazily on the first operation, together with the table if it does not
//! exist, so constructing a store never touches the network.
//!
//! Writes are a single `INSERT ... ON CONFLICT (uid) DO UPDATE`, which the
//! unique constraint on `uid` serialises inside PostgreSQL. There is no
//! read-then-write window in which two callers could both insert.
//!
//! Lifecycle: `Uninitialized -> Connected -> Disconnected`. Once
//! [`disconnect`](TokenStore::disconnect) has run, every operation fails with
//! [`StorageError::Disconnected`]; the store never reconnects by itself.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::{StoreConfig, redact_url};
use crate::error::{StorageError, StoreResult, ValidationError};
use crate::hashing::TokenHasher;
use crate::record::{Authenticated, TokenRecord, now_millis};
use crate::store::{TokenStore, check_store_args, check_token_and_uid, check_uid};

/// Token store backed by PostgreSQL.
///
/// Cheap to clone; clones share the pool and the connection state.
///
/// # Examples
///
/// ```no_run
/// # use std::time::Duration;
/// # use passwordless_pgstore::{PostgresStore, StoreConfig, TokenStore};
/// # #[tokio::main]
/// # async fn main() -> Result<(), passwordless_pgstore::StoreError> {
/// let store = PostgresStore::new(StoreConfig::with_url("postgres://localhost/app"))?;
/// store
///     .store_or_update("token", "alice@example.com", Duration::from_secs(900), Some("/inbox"))
///     .await?;
/// let auth = store.authenticate("token", "alice@example.com").await?;
/// assert_eq!(auth.and_then(|a| a.origin).as_deref(), Some("/inbox"));
/// store.disconnect().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PostgresStore {
    inner: Arc<Inner>,
}

struct Inner {
    config: StoreConfig,
    hasher: TokenHasher,
    sql: Statements,
    injected: Option<PgPool>,
    pool: OnceCell<PgPool>,
    closed: AtomicBool,
    /// Verified against when there is no usable record, so that a miss costs
    /// the same bcrypt work as a wrong token.
    decoy_hash: OnceCell<String>,
}

/// SQL text with the configured table name baked in.
struct Statements {
    create_table: String,
    create_ttl_index: String,
    upsert: String,
    select_by_uid: String,
    delete_by_uid: String,
    delete_all: String,
    count: String,
    delete_expired: String,
}

impl Statements {
    fn for_table(t: &str) -> Self {
        Self {
            create_table: format!(
                "CREATE TABLE IF NOT EXISTS {t} (\
                    id     SERIAL       PRIMARY KEY, \
                    uid    VARCHAR(160) NOT NULL UNIQUE, \
                    token  VARCHAR(60)  NOT NULL UNIQUE, \
                    origin TEXT, \
                    ttl    BIGINT\
                )"
            ),
            create_ttl_index: format!("CREATE INDEX IF NOT EXISTS {t}_ttl_idx ON {t} (ttl)"),
            upsert: format!(
                "INSERT INTO {t} (uid, token, origin, ttl) VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (uid) DO UPDATE SET \
                 token = EXCLUDED.token, origin = EXCLUDED.origin, ttl = EXCLUDED.ttl"
            ),
            select_by_uid: format!("SELECT id, uid, token, origin, ttl FROM {t} WHERE uid = $1"),
            delete_by_uid: format!("DELETE FROM {t} WHERE uid = $1"),
            delete_all: format!("DELETE FROM {t}"),
            count: format!("SELECT COUNT(*) FROM {t}"),
            delete_expired: format!("DELETE FROM {t} WHERE ttl IS NULL OR ttl < $1"),
        }
    }
}

impl std::fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStore")
            .field("config", &self.inner.config)
            .field("connected", &self.inner.pool.initialized())
            .field("closed", &self.inner.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl Default for PostgresStore {
    /// A store for `postgres://localhost` with default options.
    fn default() -> Self {
        Self::build(StoreConfig::default(), TokenHasher::default(), None)
    }
}

impl PostgresStore {
    /// Create a store from a validated configuration. No connection is made.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if the configuration is unusable; see
    /// [`StoreConfig::validate`].
    pub fn new(config: StoreConfig) -> Result<Self, ValidationError> {
        config.validate()?;
        let hasher = TokenHasher::new(config.work_factor)?;
        Ok(Self::build(config, hasher, None))
    }

    /// Create a store with default options for the given connection string.
    ///
    /// Never fails: the string is only parsed when the store first connects.
    #[must_use]
    pub fn with_url(database_url: impl Into<String>) -> Self {
        Self::build(StoreConfig::with_url(database_url), TokenHasher::default(), None)
    }

    /// Create a store that takes ownership of an existing pool.
    ///
    /// `database_url`, `max_connections` and `acquire_timeout_secs` in
    /// `config` are ignored. The pool is closed by
    /// [`disconnect`](TokenStore::disconnect).
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if the configuration is unusable.
    pub fn with_pool(pool: PgPool, config: StoreConfig) -> Result<Self, ValidationError> {
        config.validate()?;
        let hasher = TokenHasher::new(config.work_factor)?;
        Ok(Self::build(config, hasher, Some(pool)))
    }

    fn build(config: StoreConfig, hasher: TokenHasher, injected: Option<PgPool>) -> Self {
        let sql = Statements::for_table(&config.table_name);
        Self {
            inner: Arc::new(Inner {
                config,
                hasher,
                sql,
                injected,
                pool: OnceCell::new(),
                closed: AtomicBool::new(false),
                decoy_hash: OnceCell::new(),
            }),
        }
    }

    /// The configuration this store was built with.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Connect now and create the table if needed.
    ///
    /// Every operation does this on demand; call it at startup to surface
    /// connection problems early.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Connect`] if the database cannot be reached.
    /// - [`StorageError::Migration`] if the table cannot be created.
    /// - [`StorageError::Disconnected`] after [`disconnect`](TokenStore::disconnect).
    pub async fn connect(&self) -> StoreResult<()> {
        self.pool().await.map(|_| ())
    }

    /// The connection pool, connecting first if necessary.
    ///
    /// # Errors
    ///
    /// Same as [`connect`](Self::connect).
    pub async fn pool(&self) -> StoreResult<&PgPool> {
        if self.is_closed() {
            return Err(StorageError::Disconnected.into());
        }

        let pool = self
            .inner
            .pool
            .get_or_try_init(|| async {
                let pool = match &self.inner.injected {
                    Some(pool) => pool.clone(),
                    None => self.open_pool().await?,
                };
                self.ensure_schema(&pool).await?;
                Ok::<_, StorageError>(pool)
            })
            .await?;

        // Lost a race with `disconnect`.
        if self.is_closed() {
            pool.close().await;
            return Err(StorageError::Disconnected.into());
        }

        Ok(pool)
    }

    /// Fetch the raw record for `uid`, expired or not.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::EmptyUid`] if `uid` is empty.
    /// - [`StorageError`] if the read fails.
    pub async fn record(&self, uid: &str) -> StoreResult<Option<TokenRecord>> {
        check_uid(uid)?;
        let pool = self.pool().await?;
        let record = sqlx::query_as::<_, TokenRecord>(&self.inner.sql.select_by_uid)
            .bind(uid)
            .fetch_optional(pool)
            .await
            .map_err(|e| self.query_error("select", &e))?;
        Ok(record)
    }

    /// Delete every expired record and return how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the delete fails.
    pub async fn purge_expired(&self) -> StoreResult<u64> {
        let pool = self.pool().await?;
        let result = sqlx::query(&self.inner.sql.delete_expired)
            .bind(now_millis())
            .execute(pool)
            .await
            .map_err(|e| self.query_error("purge", &e))?;

        let removed = result.rows_affected();
        info!(table = %self.inner.config.table_name, removed, "purged expired tokens");
        Ok(removed)
    }

    async fn open_pool(&self) -> Result<PgPool, StorageError> {
        let config = &self.inner.config;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&config.database_url)
            .await
            .map_err(|e| StorageError::Connect {
                target: redact_url(&config.database_url),
                reason: e.to_string(),
            })?;

        info!(
            target_db = %redact_url(&config.database_url),
            max_connections = config.max_connections,
            "connected to PostgreSQL"
        );
        Ok(pool)
    }

    async fn ensure_schema(&self, pool: &PgPool) -> Result<(), StorageError> {
        let table = &self.inner.config.table_name;
        for statement in [&self.inner.sql.create_table, &self.inner.sql.create_ttl_index] {
            sqlx::query(statement)
                .execute(pool)
                .await
                .map_err(|e| StorageError::Migration {
                    table: table.clone(),
                    reason: e.to_string(),
                })?;
        }
        debug!(table = %table, "token table ready");
        Ok(())
    }

    async fn decoy_hash(&self) -> StoreResult<&str> {
        let hash = self
            .inner
            .decoy_hash
            .get_or_try_init(|| self.inner.hasher.hash_blocking("decoy"))
            .await?;
        Ok(hash.as_str())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn query_error(&self, operation: &'static str, e: &sqlx::Error) -> StorageError {
        warn!(
            table = %self.inner.config.table_name,
            operation,
            error = %e,
            "token store query failed"
        );
        StorageError::Query {
            operation,
            table: self.inner.config.table_name.clone(),
            reason: e.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl TokenStore for PostgresStore {
    async fn store_or_update(
        &self,
        token: &str,
        uid: &str,
        ttl: Duration,
        origin: Option<&str>,
    ) -> StoreResult<()> {
        let expires_at = check_store_args(token, uid, ttl, origin)?;
        let token_hash = self.inner.hasher.hash_blocking(token).await?;
        let pool = self.pool().await?;

        sqlx::query(&self.inner.sql.upsert)
            .bind(uid)
            .bind(&token_hash)
            .bind(origin)
            .bind(expires_at)
            .execute(pool)
            .await
            .map_err(|e| self.query_error("upsert", &e))?;

        debug!(table = %self.inner.config.table_name, uid, expires_at, "token stored");
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
            debug!(uid, "authentication failed");
            return Ok(None);
        };

        if TokenHasher::verify_blocking(token, &record.token_hash).await? {
            debug!(uid, "authentication succeeded");
            Ok(Some(Authenticated {
                origin: record.origin,
            }))
        } else {
            debug!(uid, "authentication failed");
            Ok(None)
        }
    }

    async fn invalidate_user(&self, uid: &str) -> StoreResult<()> {
        check_uid(uid)?;
        let pool = self.pool().await?;
        sqlx::query(&self.inner.sql.delete_by_uid)
            .bind(uid)
            .execute(pool)
            .await
            .map_err(|e| self.query_error("invalidate", &e))?;

        debug!(table = %self.inner.config.table_name, uid, "user invalidated");
        Ok(())
    }

    async fn clear(&self) -> StoreResult<()> {
        let pool = self.pool().await?;
        sqlx::query(&self.inner.sql.delete_all)
            .execute(pool)
            .await
            .map_err(|e| self.query_error("clear", &e))?;

        info!(table = %self.inner.config.table_name, "token table cleared");
        Ok(())
    }

    async fn length(&self) -> StoreResult<u64> {
        let pool = self.pool().await?;
        let (count,): (i64,) = sqlx::query_as(&self.inner.sql.count)
            .fetch_one(pool)
            .await
            .map_err(|e| self.query_error("count", &e))?;

        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn disconnect(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let pool = self.inner.pool.get().or(self.inner.injected.as_ref());
        if let Some(pool) = pool {
            // Waits for checked-out connections to be returned.
            pool.close().await;
            info!(table = %self.inner.config.table_name, "token store disconnected");
        }
    }
}
