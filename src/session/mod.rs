//! Scoped units of work.
//!
//! A [`Session`] owns at most one connection at a time, either borrowed from
//! the [`ConnectionPool`] of its target or opened privately from an
//! [`Engine`]. Statements outside an explicit transaction run in autocommit
//! mode. [`Session::disconnect`] commits pending work and, for pooled
//! connections, drops the session's temporary relations and resets its role
//! before the connection goes back to the pool.
//!
//! ```ignore
//! let registry = PoolRegistry::new();
//! let mut session = Session::open(&registry, &params).await?;
//! let id = session
//!     .scope(|s| Box::pin(async move { s.insert("users", record).await }))
//!     .await?;
//! ```

mod admin;
mod crud;

use crate::db::connection::Engine;
use crate::db::executor::{self, QueryOutput};
use crate::db::pool::{ConnectionHandle, ConnectionPool, PoolRegistry};
use crate::db::schema;
use crate::db::secrets::{SecretStore, resolve_params};
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionParams, ExecuteResult, Statement, TableMetadata, TableRef};
use crate::sql::{Dialect, parse_schema_table_name};
use futures_util::future::BoxFuture;
use std::sync::Arc;
use tracing::{debug, warn};

/// Where a session's connection comes from.
#[derive(Debug, Clone)]
enum Source {
    Pooled(Arc<ConnectionPool>),
    /// `owned` engines are disposed when the session disconnects.
    Dedicated { engine: Engine, owned: bool },
}

/// Scoped unit of work over one connection.
#[derive(Debug)]
pub struct Session {
    source: Source,
    as_role: Option<String>,
    handle: Option<ConnectionHandle>,
    in_transaction: bool,
    /// Set when COMMIT or ROLLBACK fails; the connection is not reused.
    unsettled: bool,
    column_names: Vec<String>,
}

impl Session {
    fn with_source(source: Source) -> Self {
        Self {
            source,
            as_role: None,
            handle: None,
            in_transaction: false,
            unsettled: false,
            column_names: Vec::new(),
        }
    }

    /// Session for `params`, borrowing from the registry's pool for that
    /// identity. Parameters carrying `connect_args` get a dedicated,
    /// session-owned engine instead.
    pub async fn open(registry: &PoolRegistry, params: &ConnectionParams) -> DbResult<Self> {
        if !params.connect_args.is_empty() {
            return Self::dedicated(params, registry.secret_store());
        }
        let pool = registry.get_or_create(params).await?;
        Ok(Self::with_source(Source::Pooled(pool)))
    }

    /// Session with its own engine; connections are never pooled.
    pub fn dedicated(
        params: &ConnectionParams,
        secrets: Option<&Arc<dyn SecretStore>>,
    ) -> DbResult<Self> {
        let resolved = resolve_params(params, secrets)?;
        let engine = Engine::new(&resolved)?;
        Ok(Self::with_source(Source::Dedicated {
            engine,
            owned: true,
        }))
    }

    /// Session over a caller-owned engine. The engine outlives the session.
    pub fn from_engine(engine: Engine) -> Self {
        Self::with_source(Source::Dedicated {
            engine,
            owned: false,
        })
    }

    /// Assume `role` right after connecting.
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.as_role = Some(role.into());
        self
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_some()
    }

    pub fn is_pooled(&self) -> bool {
        matches!(self.source, Source::Pooled(_))
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Pool the session borrows from, if pooled.
    pub fn pool(&self) -> Option<&Arc<ConnectionPool>> {
        match &self.source {
            Source::Pooled(pool) => Some(pool),
            Source::Dedicated { .. } => None,
        }
    }

    /// Id of the held connection handle.
    pub fn connection_id(&self) -> Option<&str> {
        self.handle.as_ref().map(ConnectionHandle::id)
    }

    /// Column names of the most recent `one`/`maybe`/`all` query.
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub fn dialect(&self) -> DbResult<Dialect> {
        self.handle_ref().map(ConnectionHandle::dialect)
    }

    fn handle_ref(&self) -> DbResult<&ConnectionHandle> {
        self.handle.as_ref().ok_or_else(not_connected)
    }

    fn handle(&mut self) -> DbResult<&mut ConnectionHandle> {
        self.handle.as_mut().ok_or_else(not_connected)
    }

    /// Acquire a connection and assume the configured role.
    pub async fn connect(&mut self) -> DbResult<()> {
        if self.handle.is_some() {
            return Err(DbError::connection(
                "Session is already connected",
                "Disconnect before connecting again",
            ));
        }

        let handle = match &self.source {
            Source::Pooled(pool) => pool.get_connection().await?,
            Source::Dedicated { engine, .. } => ConnectionHandle::new(engine.connect().await?),
        };
        debug!(handle = %handle.id(), pooled = self.is_pooled(), "Session connected");
        self.handle = Some(handle);
        self.in_transaction = false;
        self.unsettled = false;
        self.column_names.clear();

        if let Some(role) = self.as_role.clone() {
            if let Err(e) = self.set_role(&role).await {
                warn!(role = %role, error = %e, "Failed to assume role; releasing connection");
                if let Some(handle) = self.handle.take() {
                    self.release_failed(handle).await;
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Commit pending work and release the connection. Pooled connections are
    /// scrubbed of temporary relations and role changes first; one that cannot
    /// be scrubbed, or whose transaction failed to end, is discarded instead
    /// of returned.
    pub async fn disconnect(&mut self) -> DbResult<()> {
        if self.handle.is_none() {
            return Ok(());
        }

        let mut outcome = if self.unsettled {
            Err(DbError::transaction(
                "Transaction state is unknown after a failed COMMIT or ROLLBACK",
            ))
        } else if self.in_transaction {
            self.commit().await
        } else {
            Ok(())
        };

        match self.source.clone() {
            Source::Dedicated { engine, owned } => {
                if let Some(handle) = self.handle.take() {
                    handle.close().await;
                }
                if owned {
                    engine.dispose();
                }
            }
            Source::Pooled(pool) => {
                if outcome.is_ok() {
                    outcome = self.reset_session_state().await;
                }
                if let Some(handle) = self.handle.take() {
                    if outcome.is_ok() {
                        pool.free_connection(handle).await;
                    } else {
                        pool.discard(handle).await;
                    }
                }
            }
        }

        self.in_transaction = false;
        self.unsettled = false;
        debug!("Session disconnected");
        outcome
    }

    /// Connect, run `f`, then disconnect whatever `f` returned. An error from
    /// `f` takes precedence over one from disconnecting.
    pub async fn scope<T, F>(&mut self, f: F) -> DbResult<T>
    where
        F: for<'s> FnOnce(&'s mut Session) -> BoxFuture<'s, DbResult<T>>,
    {
        self.connect().await?;
        let result = f(self).await;
        let disconnected = self.disconnect().await;
        let value = result?;
        disconnected?;
        Ok(value)
    }

    async fn release_failed(&mut self, handle: ConnectionHandle) {
        match &self.source {
            Source::Pooled(pool) => pool.discard(handle).await,
            Source::Dedicated { .. } => handle.close().await,
        }
    }

    /// Drop temporary relations and reset the role of a pooled connection.
    async fn reset_session_state(&mut self) -> DbResult<()> {
        let dialect = self.dialect()?;
        if dialect == Dialect::MySql {
            debug!("Temporary tables cannot be listed on MySQL; skipping cleanup");
        } else {
            self.drop_temp_tables().await?;
        }
        if let Ok(sql) = crate::sql::admin::reset_role(dialect) {
            self.execute(sql).await?;
        }
        Ok(())
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Open an explicit transaction. Only one may be open at a time.
    pub async fn begin(&mut self) -> DbResult<()> {
        if self.in_transaction {
            return Err(DbError::transaction("A transaction is already open"));
        }
        let sql = self.dialect()?.begin_sql();
        self.execute(sql).await?;
        self.in_transaction = true;
        debug!("Transaction started");
        Ok(())
    }

    /// Commit the open transaction, or issue a bare commit when there is none.
    /// The transaction stays marked open if COMMIT fails.
    pub async fn commit(&mut self) -> DbResult<()> {
        if self.in_transaction {
            self.end_transaction("COMMIT").await?;
            debug!("Transaction committed");
        } else if let Some(sql) = self.dialect()?.bare_commit() {
            self.execute(sql).await?;
        }
        Ok(())
    }

    /// Same as [`commit`](Self::commit).
    pub async fn end(&mut self) -> DbResult<()> {
        self.commit().await
    }

    /// Roll back the open transaction; does nothing without one.
    pub async fn rollback(&mut self) -> DbResult<()> {
        if !self.in_transaction {
            return Ok(());
        }
        self.end_transaction("ROLLBACK").await?;
        debug!("Transaction rolled back");
        Ok(())
    }

    async fn end_transaction(&mut self, sql: &'static str) -> DbResult<()> {
        if let Err(e) = self.execute(sql).await {
            warn!(statement = sql, error = %e, "Failed to end transaction");
            self.unsettled = true;
            return Err(e);
        }
        self.in_transaction = false;
        Ok(())
    }

    // =========================================================================
    // Statements
    // =========================================================================

    /// Run a statement on the session's connection.
    pub async fn execute(&mut self, statement: impl Into<Statement>) -> DbResult<ExecuteResult> {
        let statement = statement.into();
        executor::execute(self.handle()?.connection(), &statement).await
    }

    /// Run a query without touching [`column_names`](Self::column_names).
    async fn query(&mut self, statement: &Statement) -> DbResult<QueryOutput> {
        executor::fetch_records(self.handle()?.connection(), statement).await
    }

    /// Resolve a table reference, using the connection's metadata cache.
    pub async fn get_table(&mut self, table: impl Into<TableRef>) -> DbResult<TableMetadata> {
        let name = match table.into() {
            TableRef::Handle(metadata) => return Ok(metadata),
            TableRef::Name(name) => name,
        };
        let (schema, table) = parse_schema_table_name(&name)?;

        let handle = self.handle()?;
        if let Some(cached) = handle.cached_table(&name) {
            return Ok(cached.clone());
        }
        let metadata = schema::describe_table(handle.connection(), schema.as_deref(), &table).await?;
        handle.cache_table(name, metadata.clone());
        Ok(metadata)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        warn!(
            handle = %handle.id(),
            in_transaction = self.in_transaction,
            "Session dropped while connected; discarding its connection"
        );
        match &self.source {
            Source::Pooled(pool) => pool.discard_detached(handle),
            Source::Dedicated { .. } => handle.close_detached(),
        }
    }
}

fn not_connected() -> DbError {
    DbError::connection(
        "Session is not connected",
        "Call connect() or run the work inside Session::scope",
    )
}
