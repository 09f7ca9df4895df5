//! Connection pool management.
//!
//! A [`ConnectionPool`] keeps reusable connections for one connection
//! identity. Handles are moved out to the borrowing session and moved back on
//! release, so the pool tracks borrowed handles by id and owns only the idle
//! ones. [`PoolRegistry`] caches pools by identity.

use crate::db::connection::{DbConnection, Engine};
use crate::db::secrets::{SecretStore, resolve_params_async};
use crate::error::DbResult;
use crate::models::{ConnectionParams, TableMetadata, masked_url};
use crate::sql::Dialect;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Default number of connections a pool keeps for reuse.
pub const DEFAULT_POOL_SIZE: usize = 5;

/// Pool sizing options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    /// Release threshold: a connection given back while this many (or more)
    /// others are still borrowed is closed instead of kept idle.
    pub pool_size: usize,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

impl PoolOptions {
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }
}

/// A live connection plus the table metadata resolved on it.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: String,
    conn: DbConnection,
    tables: HashMap<String, TableMetadata>,
}

impl ConnectionHandle {
    pub(crate) fn new(conn: DbConnection) -> Self {
        Self {
            id: format!("conn_{}", uuid::Uuid::new_v4().simple()),
            conn,
            tables: HashMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dialect(&self) -> Dialect {
        self.conn.dialect()
    }

    pub fn connection(&mut self) -> &mut DbConnection {
        &mut self.conn
    }

    pub fn cached_table(&self, name: &str) -> Option<&TableMetadata> {
        self.tables.get(name)
    }

    pub fn cache_table(&mut self, name: impl Into<String>, table: TableMetadata) {
        self.tables.insert(name.into(), table);
    }

    /// Forget every cached entry describing a table called `table`, whatever
    /// schema it was resolved under.
    pub fn evict_table(&mut self, table: &str) {
        self.tables.retain(|_, cached| cached.name != table);
    }

    pub async fn close(self) {
        debug!(handle = %self.id, "Closing connection");
        self.conn.close().await;
    }

    /// Close from a non-async context. The close runs on the current tokio
    /// runtime when there is one; otherwise the connection is just dropped.
    pub(crate) fn close_detached(self) {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(self.close());
            }
            Err(_) => drop(self),
        }
    }
}

/// Snapshot of a pool's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub in_use: usize,
    pub idle: usize,
    pub pool_size: usize,
}

#[derive(Debug, Default)]
struct PoolState {
    in_use: HashSet<String>,
    idle: Vec<ConnectionHandle>,
}

/// Reusable connections for one connection identity.
pub struct ConnectionPool {
    key: String,
    params: ConnectionParams,
    secrets: Option<Arc<dyn SecretStore>>,
    pool_size: usize,
    state: Mutex<PoolState>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("key", &masked_url(&self.key))
            .field("stats", &self.stats())
            .finish()
    }
}

impl ConnectionPool {
    pub fn new(
        params: ConnectionParams,
        secrets: Option<Arc<dyn SecretStore>>,
        options: PoolOptions,
    ) -> DbResult<Self> {
        Ok(Self {
            key: params.pool_key()?,
            params,
            secrets,
            pool_size: options.pool_size,
            state: Mutex::new(PoolState::default()),
        })
    }

    /// Identity key (secret reference or connection URL).
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Build an engine for this pool's target, resolving secrets afresh.
    pub async fn engine(&self) -> DbResult<Engine> {
        let params = resolve_params_async(&self.params, self.secrets.as_ref()).await?;
        Engine::new(&params)
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Borrow a connection: an idle one if available, otherwise a new one.
    /// Never waits for capacity.
    pub async fn get_connection(&self) -> DbResult<ConnectionHandle> {
        {
            let mut state = self.lock();
            if let Some(handle) = state.idle.pop() {
                state.in_use.insert(handle.id.clone());
                debug!(handle = %handle.id, in_use = state.in_use.len(), "Reusing idle connection");
                return Ok(handle);
            }
        }

        let conn = self.engine().await?.connect().await?;
        let handle = ConnectionHandle::new(conn);
        let in_use = {
            let mut state = self.lock();
            state.in_use.insert(handle.id.clone());
            state.in_use.len()
        };
        info!(
            pool = %masked_url(&self.key),
            handle = %handle.id,
            in_use,
            "Opened pooled connection"
        );
        Ok(handle)
    }

    /// Give a borrowed connection back.
    ///
    /// The handle is closed when the number of connections still borrowed
    /// (counted after removing this one) is at least `pool_size`; otherwise
    /// it becomes idle.
    pub async fn free_connection(&self, handle: ConnectionHandle) {
        let to_close = {
            let mut state = self.lock();
            if !state.in_use.remove(&handle.id) {
                warn!(handle = %handle.id, "Released connection does not belong to this pool");
                Some(handle)
            } else if state.in_use.len() >= self.pool_size {
                Some(handle)
            } else {
                debug!(handle = %handle.id, idle = state.idle.len() + 1, "Connection returned to pool");
                state.idle.push(handle);
                None
            }
        };

        if let Some(handle) = to_close {
            info!(handle = %handle.id, "Closing released connection");
            handle.close().await;
        }
    }

    /// Remove a borrowed connection from the pool and close it.
    pub async fn discard(&self, handle: ConnectionHandle) {
        self.lock().in_use.remove(&handle.id);
        warn!(handle = %handle.id, "Discarding connection");
        handle.close().await;
    }

    /// Non-async variant of [`discard`](Self::discard) for drop paths.
    pub(crate) fn discard_detached(&self, handle: ConnectionHandle) {
        self.lock().in_use.remove(&handle.id);
        warn!(handle = %handle.id, "Discarding connection");
        handle.close_detached();
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        PoolStats {
            in_use: state.in_use.len(),
            idle: state.idle.len(),
            pool_size: self.pool_size,
        }
    }

    pub fn is_in_use(&self, handle_id: &str) -> bool {
        self.lock().in_use.contains(handle_id)
    }

    pub fn is_idle(&self, handle_id: &str) -> bool {
        self.lock().idle.iter().any(|h| h.id == handle_id)
    }

    /// Close every idle connection. Borrowed connections are unaffected.
    pub async fn close_idle(&self) {
        let idle = std::mem::take(&mut self.lock().idle);
        if idle.is_empty() {
            return;
        }
        info!(pool = %masked_url(&self.key), count = idle.len(), "Closing idle connections");
        for handle in idle {
            handle.close().await;
        }
    }
}

/// Caller-owned cache of [`ConnectionPool`]s keyed by connection identity.
///
/// Pools live as long as the registry; there is no eviction.
#[derive(Debug, Clone, Default)]
pub struct PoolRegistry {
    pools: Arc<RwLock<HashMap<String, Arc<ConnectionPool>>>>,
    secrets: Option<Arc<dyn SecretStore>>,
    options: PoolOptions,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret_store(mut self, store: Arc<dyn SecretStore>) -> Self {
        self.secrets = Some(store);
        self
    }

    pub fn with_options(mut self, options: PoolOptions) -> Self {
        self.options = options;
        self
    }

    pub fn secret_store(&self) -> Option<&Arc<dyn SecretStore>> {
        self.secrets.as_ref()
    }

    /// Return the pool for this identity, creating it on first use.
    pub async fn get_or_create(&self, params: &ConnectionParams) -> DbResult<Arc<ConnectionPool>> {
        let key = params.pool_key()?;
        {
            let pools = self.pools.read().await;
            if let Some(pool) = pools.get(&key) {
                return Ok(Arc::clone(pool));
            }
        }

        let mut pools = self.pools.write().await;
        // Double-check after acquiring write lock
        if let Some(pool) = pools.get(&key) {
            return Ok(Arc::clone(pool));
        }
        let pool = Arc::new(ConnectionPool::new(
            params.clone(),
            self.secrets.clone(),
            self.options,
        )?);
        info!(pool = %masked_url(&key), pool_size = self.options.pool_size, "Created connection pool");
        pools.insert(key, Arc::clone(&pool));
        Ok(pool)
    }

    /// Number of pools created so far.
    pub async fn len(&self) -> usize {
        self.pools.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pools.read().await.is_empty()
    }

    /// Close the idle connections of every pool.
    pub async fn close_all(&self) {
        let pools: Vec<Arc<ConnectionPool>> = self.pools.read().await.values().cloned().collect();
        for pool in pools {
            pool.close_idle().await;
        }
        info!("All idle connections closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_params(dir: &tempfile::TempDir) -> ConnectionParams {
        ConnectionParams::sqlite(dir.path().join("pool.db").to_string_lossy())
    }

    #[tokio::test]
    async fn test_idle_connection_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ConnectionPool::new(sqlite_params(&dir), None, PoolOptions::default()).unwrap();

        let handle = pool.get_connection().await.unwrap();
        let id = handle.id().to_string();
        assert!(pool.is_in_use(&id));

        pool.free_connection(handle).await;
        assert!(pool.is_idle(&id));
        assert!(!pool.is_in_use(&id));

        let again = pool.get_connection().await.unwrap();
        assert_eq!(again.id(), id);
        assert_eq!(pool.stats().idle, 0);
        pool.free_connection(again).await;
        pool.close_idle().await;
        assert_eq!(pool.stats().idle, 0);
    }

    #[tokio::test]
    async fn test_release_closes_when_in_use_reaches_pool_size() {
        let dir = tempfile::tempdir().unwrap();
        let options = PoolOptions::default().with_pool_size(1);
        let pool = ConnectionPool::new(sqlite_params(&dir), None, options).unwrap();

        let first = pool.get_connection().await.unwrap();
        let second = pool.get_connection().await.unwrap();
        let (first_id, second_id) = (first.id().to_string(), second.id().to_string());
        assert_eq!(pool.stats().in_use, 2);

        // One connection still borrowed after removal: 1 >= pool_size.
        pool.free_connection(first).await;
        assert!(!pool.is_idle(&first_id));
        assert!(!pool.is_in_use(&first_id));

        // None borrowed after removal: kept.
        pool.free_connection(second).await;
        assert!(pool.is_idle(&second_id));
        assert_eq!(
            pool.stats(),
            PoolStats {
                in_use: 0,
                idle: 1,
                pool_size: 1
            }
        );
        pool.close_idle().await;
    }

    #[tokio::test]
    async fn test_discard_removes_handle() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ConnectionPool::new(sqlite_params(&dir), None, PoolOptions::default()).unwrap();
        let handle = pool.get_connection().await.unwrap();
        let id = handle.id().to_string();
        pool.discard(handle).await;
        assert!(!pool.is_in_use(&id));
        assert!(!pool.is_idle(&id));
    }

    #[tokio::test]
    async fn test_registry_caches_by_identity() {
        let dir = tempfile::tempdir().unwrap();
        let registry = PoolRegistry::new();
        let a = registry.get_or_create(&sqlite_params(&dir)).await.unwrap();
        let b = registry.get_or_create(&sqlite_params(&dir)).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let other = ConnectionParams::sqlite(dir.path().join("other.db").to_string_lossy());
        let c = registry.get_or_create(&other).await.unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_registry_keys_by_secret_reference() {
        let registry = PoolRegistry::new();
        let mut first = ConnectionParams::sqlite("one.db");
        first.secret_arn = Some("arn:shared".into());
        let mut second = ConnectionParams::sqlite("two.db");
        second.secret_arn = Some("arn:shared".into());

        let a = registry.get_or_create(&first).await.unwrap();
        let b = registry.get_or_create(&second).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.key(), "arn:shared");
    }

    #[tokio::test]
    async fn test_connect_through_secret_reference() {
        let dir = tempfile::tempdir().unwrap();
        let database = dir.path().join("secret.db");
        let store = crate::db::secrets::StaticSecretStore::new().with_secret(
            "arn:local",
            serde_json::json!({"type": "sqlite", "database": database.to_string_lossy()})
                .as_object()
                .cloned()
                .unwrap(),
        );
        let registry = PoolRegistry::new().with_secret_store(Arc::new(store));
        let mut params = ConnectionParams::sqlite("placeholder.db");
        params.secret_arn = Some("arn:local".into());

        let pool = registry.get_or_create(&params).await.unwrap();
        let handle = pool.get_connection().await.unwrap();
        assert!(pool.is_in_use(handle.id()));
        pool.free_connection(handle).await;
        assert!(database.exists());
        registry.close_all().await;
    }
}
