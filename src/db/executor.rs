//! Statement execution on a single connection.
//!
//! # Architecture
//!
//! The executor uses database-specific implementations organized in submodules:
//! - `mysql`: MySQL-specific query and write operations
//! - `postgres`: PostgreSQL-specific query and write operations
//! - `sqlite`: SQLite-specific query and write operations
//!
//! Each submodule provides identical functionality adapted to the database's
//! type system. Statements without parameters are sent as raw SQL, which also
//! lets maintenance commands that cannot be prepared (`VACUUM`, `SET role`)
//! through.

use crate::db::connection::DbConnection;
use crate::db::params::BindParams;
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::{ExecuteResult, QueryParam, Record, Statement};
use futures_util::stream::{BoxStream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Rows buffered between the streaming task and its consumer.
pub const STREAM_BUFFER: usize = 64;

/// Records and column names of a query.
#[derive(Debug, Default, Clone)]
pub struct QueryOutput {
    /// Empty when no row was returned.
    pub columns: Vec<String>,
    pub rows: Vec<Record>,
}

/// Run a query and collect every row.
pub async fn fetch_records(conn: &mut DbConnection, stmt: &Statement) -> DbResult<QueryOutput> {
    debug!(sql = %stmt.log_sql(), params = stmt.params.len(), "Executing query");

    let output = impl_db_dispatch!(conn, {
        MySql(c) => process_rows(mysql::fetch_rows(c, &stmt.sql, &stmt.params).await?),
        Postgres(c) => process_rows(postgres::fetch_rows(c, &stmt.sql, &stmt.params).await?),
        SQLite(c) => process_rows(sqlite::fetch_rows(c, &stmt.sql, &stmt.params).await?),
    });
    Ok(output)
}

/// Run a statement and report affected rows.
pub async fn execute(conn: &mut DbConnection, stmt: &Statement) -> DbResult<ExecuteResult> {
    debug!(sql = %stmt.log_sql(), params = stmt.params.len(), "Executing statement");

    impl_db_dispatch!(conn, {
        MySql(c) => mysql::execute_write(c, &stmt.sql, &stmt.params).await,
        Postgres(c) => postgres::execute_write(c, &stmt.sql, &stmt.params).await,
        SQLite(c) => sqlite::execute_write(c, &stmt.sql, &stmt.params).await,
    })
}

/// Stream of decoded records produced by [`stream_records`].
pub type RecordStream = BoxStream<'static, DbResult<Record>>;

/// Stream the rows of `stmt` from a connection owned by a background task.
///
/// At most [`STREAM_BUFFER`] rows are decoded ahead of the consumer. The
/// connection is closed when the rows are exhausted, on the first error, or
/// once the stream is dropped.
pub fn stream_records(conn: DbConnection, stmt: Statement) -> RecordStream {
    let (tx, rx) = mpsc::channel::<DbResult<Record>>(STREAM_BUFFER);

    tokio::spawn(async move {
        debug!(sql = %stmt.log_sql(), params = stmt.params.len(), "Streaming query");
        let mut conn = conn;
        let completed = impl_db_dispatch!(&mut conn, {
            MySql(c) => mysql::stream_rows(c, &stmt.sql, &stmt.params, &tx).await,
            Postgres(c) => postgres::stream_rows(c, &stmt.sql, &stmt.params, &tx).await,
            SQLite(c) => sqlite::stream_rows(c, &stmt.sql, &stmt.params, &tx).await,
        });
        if !completed {
            debug!("Record stream dropped before exhaustion");
        }
        conn.close().await;
    });

    futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
    .boxed()
}

/// Process rows from any database type into records.
fn process_rows<R: RowToJson>(rows: Vec<R>) -> QueryOutput {
    let columns = rows
        .first()
        .map(|row| row.column_names())
        .unwrap_or_default();
    let rows = rows.iter().map(|row| row.to_json_map()).collect();
    QueryOutput { columns, rows }
}

/// Forward one row (or error) to the consumer. Returns `false` once the
/// receiving side is gone.
async fn forward<R: RowToJson>(
    tx: &mpsc::Sender<DbResult<Record>>,
    row: Result<R, sqlx::Error>,
) -> bool {
    let item = row.map(|r| r.to_json_map()).map_err(DbError::from);
    let failed = item.is_err();
    if tx.send(item).await.is_err() {
        return false;
    }
    if failed {
        warn!("Record stream aborted by a database error");
    }
    !failed
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================
//
// Each module below provides the same interface adapted to its database type.
// The code structure is intentionally parallel to make differences obvious.

mod mysql {
    use super::*;
    use sqlx::MySqlConnection;
    use sqlx::mysql::MySqlRow;

    pub async fn fetch_rows(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Vec<MySqlRow>> {
        let rows = if params.is_empty() {
            use sqlx::Executor;
            conn.fetch_all(sql).await?
        } else {
            sqlx::query(sql).bind_all(params).fetch_all(conn).await?
        };
        Ok(rows)
    }

    pub async fn execute_write(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<ExecuteResult> {
        let result = if params.is_empty() {
            use sqlx::Executor;
            conn.execute(sql).await?
        } else {
            sqlx::query(sql).bind_all(params).execute(conn).await?
        };
        let last_insert_id = result.last_insert_id();
        Ok(ExecuteResult {
            rows_affected: result.rows_affected(),
            last_insert_id: (last_insert_id > 0).then(|| last_insert_id as i64),
        })
    }

    pub async fn stream_rows(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[QueryParam],
        tx: &mpsc::Sender<DbResult<Record>>,
    ) -> bool {
        let mut rows = sqlx::query(sql).bind_all(params).fetch(conn);
        while let Some(row) = rows.next().await {
            if !forward(tx, row).await {
                return false;
            }
        }
        true
    }
}

mod postgres {
    use super::*;
    use sqlx::PgConnection;
    use sqlx::postgres::PgRow;

    pub async fn fetch_rows(
        conn: &mut PgConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Vec<PgRow>> {
        let rows = if params.is_empty() {
            use sqlx::Executor;
            conn.fetch_all(sql).await?
        } else {
            sqlx::query(sql).bind_all(params).fetch_all(conn).await?
        };
        Ok(rows)
    }

    pub async fn execute_write(
        conn: &mut PgConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<ExecuteResult> {
        let result = if params.is_empty() {
            use sqlx::Executor;
            conn.execute(sql).await?
        } else {
            sqlx::query(sql).bind_all(params).execute(conn).await?
        };
        Ok(ExecuteResult {
            rows_affected: result.rows_affected(),
            last_insert_id: None,
        })
    }

    pub async fn stream_rows(
        conn: &mut PgConnection,
        sql: &str,
        params: &[QueryParam],
        tx: &mpsc::Sender<DbResult<Record>>,
    ) -> bool {
        let mut rows = sqlx::query(sql).bind_all(params).fetch(conn);
        while let Some(row) = rows.next().await {
            if !forward(tx, row).await {
                return false;
            }
        }
        true
    }
}

mod sqlite {
    use super::*;
    use sqlx::SqliteConnection;
    use sqlx::sqlite::SqliteRow;

    pub async fn fetch_rows(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Vec<SqliteRow>> {
        let rows = if params.is_empty() {
            use sqlx::Executor;
            conn.fetch_all(sql).await?
        } else {
            sqlx::query(sql).bind_all(params).fetch_all(conn).await?
        };
        Ok(rows)
    }

    pub async fn execute_write(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<ExecuteResult> {
        let result = if params.is_empty() {
            use sqlx::Executor;
            conn.execute(sql).await?
        } else {
            sqlx::query(sql).bind_all(params).execute(conn).await?
        };
        let last_insert_id = result.last_insert_rowid();
        Ok(ExecuteResult {
            rows_affected: result.rows_affected(),
            last_insert_id: (last_insert_id > 0).then_some(last_insert_id),
        })
    }

    pub async fn stream_rows(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[QueryParam],
        tx: &mpsc::Sender<DbResult<Record>>,
    ) -> bool {
        let mut rows = sqlx::query(sql).bind_all(params).fetch(conn);
        while let Some(row) = rows.next().await {
            if !forward(tx, row).await {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::Engine;
    use crate::models::ConnectionParams;
    use futures_util::TryStreamExt;

    async fn sqlite_conn(dir: &tempfile::TempDir) -> DbConnection {
        let path = dir.path().join("exec.db");
        Engine::new(&ConnectionParams::sqlite(path.to_string_lossy()))
            .unwrap()
            .connect()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_execute_and_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = sqlite_conn(&dir).await;

        execute(
            &mut conn,
            &Statement::new("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, score REAL)"),
        )
        .await
        .unwrap();
        let result = execute(
            &mut conn,
            &Statement::new("INSERT INTO t (name, score) VALUES (?, ?)")
                .bind("a")
                .bind(QueryParam::Float(1.5)),
        )
        .await
        .unwrap();
        assert_eq!(result.rows_affected, 1);
        assert_eq!(result.last_insert_id, Some(1));

        let output = fetch_records(&mut conn, &Statement::new("SELECT * FROM t"))
            .await
            .unwrap();
        assert_eq!(output.columns, vec!["id", "name", "score"]);
        assert_eq!(output.rows.len(), 1);
        assert_eq!(output.rows[0]["name"], serde_json::json!("a"));
        assert_eq!(output.rows[0]["score"], serde_json::json!(1.5));
        conn.close().await;
    }

    #[tokio::test]
    async fn test_empty_result_has_no_columns() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = sqlite_conn(&dir).await;
        let output = fetch_records(&mut conn, &Statement::new("SELECT 1 AS x WHERE 1 = 0"))
            .await
            .unwrap();
        assert!(output.rows.is_empty());
        assert!(output.columns.is_empty());
        conn.close().await;
    }

    #[tokio::test]
    async fn test_stream_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = sqlite_conn(&dir).await;
        execute(&mut conn, &Statement::new("CREATE TABLE n (v INTEGER)"))
            .await
            .unwrap();
        for v in 0..200i64 {
            execute(&mut conn, &Statement::new("INSERT INTO n (v) VALUES (?)").bind(v))
                .await
                .unwrap();
        }
        conn.close().await;

        let conn = sqlite_conn(&dir).await;
        let records: Vec<Record> = stream_records(conn, Statement::new("SELECT v FROM n ORDER BY v"))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(records.len(), 200);
        assert_eq!(records[199]["v"], serde_json::json!(199));
    }
}
