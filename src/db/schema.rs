//! Schema introspection module.
//!
//! Resolves [`TableMetadata`] (ordered columns, SQL types, primary key) from
//! the backend's catalog, and answers table existence checks.
//!
//! # Architecture
//!
//! SQL queries are organized in the `queries` submodule with constants for each
//! database type. Database-specific implementations are in their respective
//! submodules (postgres, mysql, sqlite), each providing the same interface.

use crate::db::connection::DbConnection;
use crate::error::{DbError, DbResult};
use crate::models::{ColumnDefinition, TableMetadata};
use tracing::debug;

/// Describe a table. The returned metadata keeps the schema exactly as given,
/// so unqualified tables keep resolving through the connection's search path.
pub async fn describe_table(
    conn: &mut DbConnection,
    schema: Option<&str>,
    table: &str,
) -> DbResult<TableMetadata> {
    let (columns, primary_key) = impl_db_dispatch!(conn, {
        MySql(c) => mysql::describe_table(c, schema, table).await?,
        Postgres(c) => postgres::describe_table(c, schema, table).await?,
        SQLite(c) => sqlite::describe_table(c, schema, table).await?,
    });

    if columns.is_empty() {
        return Err(DbError::schema(
            format!("Table '{}' not found", table),
            qualified(schema, table),
        ));
    }

    let mut metadata = TableMetadata::new(table);
    if let Some(schema) = schema {
        metadata = metadata.with_schema(schema);
    }
    for column in columns {
        metadata = metadata.with_column(column);
    }
    let metadata = metadata.with_primary_key(primary_key);

    debug!(
        table = %metadata.qualified_name(),
        columns = metadata.columns.len(),
        primary_key = ?metadata.primary_key,
        "Described table"
    );
    Ok(metadata)
}

/// Whether a table (or view) with this name is visible.
pub async fn table_exists(
    conn: &mut DbConnection,
    schema: Option<&str>,
    table: &str,
) -> DbResult<bool> {
    impl_db_dispatch!(conn, {
        MySql(c) => mysql::table_exists(c, schema, table).await,
        Postgres(c) => postgres::table_exists(c, schema, table).await,
        SQLite(c) => sqlite::table_exists(c, schema, table).await,
    })
}

fn qualified(schema: Option<&str>, table: &str) -> String {
    match schema {
        Some(schema) => format!("{}.{}", schema, table),
        None => table.to_string(),
    }
}

/// Primary key names ordered by their position in the key.
fn ordered_key(mut positions: Vec<(i64, String)>) -> Vec<String> {
    positions.sort_by_key(|(position, _)| *position);
    positions.into_iter().map(|(_, name)| name).collect()
}

// =============================================================================
// SQL Query Constants
// =============================================================================

mod queries {
    pub mod postgres {
        /// Unqualified names resolve like the planner does: through the
        /// search path, temporary schema included.
        pub const DESCRIBE_COLUMNS: &str = r#"
        SELECT
            a.attname::text AS column_name,
            pg_catalog.format_type(a.atttypid, a.atttypmod) AS data_type,
            NOT a.attnotnull AS nullable,
            array_position(i.indkey::int2[], a.attnum) AS key_position
        FROM pg_catalog.pg_attribute a
        JOIN pg_catalog.pg_class c ON c.oid = a.attrelid
        JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
        LEFT JOIN pg_catalog.pg_index i
            ON i.indrelid = c.oid AND i.indisprimary AND a.attnum = ANY(i.indkey)
        WHERE c.relname = $1
        AND ((($2)::text IS NULL AND pg_catalog.pg_table_is_visible(c.oid)) OR n.nspname = $2)
        AND c.relkind IN ('r', 'v', 'm', 'p', 'f')
        AND a.attnum > 0
        AND NOT a.attisdropped
        ORDER BY a.attnum
        "#;

        pub const TABLE_EXISTS: &str = r#"
        SELECT EXISTS (
            SELECT 1
            FROM pg_catalog.pg_class c
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
            WHERE c.relname = $1
            AND ((($2)::text IS NULL AND pg_catalog.pg_table_is_visible(c.oid)) OR n.nspname = $2)
            AND c.relkind IN ('r', 'v', 'm', 'p', 'f')
        ) AS present
        "#;
    }

    pub mod mysql {
        pub const DESCRIBE_COLUMNS: &str = r#"
        SELECT
            CONVERT(COLUMN_NAME USING utf8mb4) AS COLUMN_NAME,
            CONVERT(COLUMN_TYPE USING utf8mb4) AS COLUMN_TYPE,
            CONVERT(IS_NULLABLE USING utf8mb4) AS IS_NULLABLE,
            CONVERT(EXTRA USING utf8mb4) AS EXTRA
        FROM information_schema.COLUMNS
        WHERE TABLE_NAME = ? AND TABLE_SCHEMA = COALESCE(?, DATABASE())
        ORDER BY ORDINAL_POSITION
        "#;

        pub const PRIMARY_KEY: &str = r#"
        SELECT
            CONVERT(COLUMN_NAME USING utf8mb4) AS COLUMN_NAME,
            CAST(ORDINAL_POSITION AS SIGNED) AS KEY_POSITION
        FROM information_schema.KEY_COLUMN_USAGE
        WHERE TABLE_NAME = ?
        AND TABLE_SCHEMA = COALESCE(?, DATABASE())
        AND CONSTRAINT_NAME = 'PRIMARY'
        "#;

        pub const TABLE_EXISTS: &str = r#"
        SELECT COUNT(*) AS PRESENT
        FROM information_schema.TABLES
        WHERE TABLE_NAME = ? AND TABLE_SCHEMA = COALESCE(?, DATABASE())
        "#;
    }

    pub mod sqlite {
        /// Unqualified lookup covers the temp schema as well as `main`.
        pub const TABLE_EXISTS_ANY_SCHEMA: &str = r#"
        SELECT
            (SELECT COUNT(*) FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1)
            + (SELECT COUNT(*) FROM sqlite_temp_master WHERE type IN ('table', 'view') AND name = ?1)
            AS present
        "#;
    }
}

// =============================================================================
// PostgreSQL Implementation
// =============================================================================

mod postgres {
    use super::*;
    use sqlx::{PgConnection, Row};

    pub async fn describe_table(
        conn: &mut PgConnection,
        schema: Option<&str>,
        table: &str,
    ) -> DbResult<(Vec<ColumnDefinition>, Vec<String>)> {
        let rows = sqlx::query(queries::postgres::DESCRIBE_COLUMNS)
            .bind(table)
            .bind(schema)
            .fetch_all(conn)
            .await?;

        let mut columns = Vec::with_capacity(rows.len());
        let mut key = Vec::new();
        for row in &rows {
            let name: String = row.try_get("column_name")?;
            let data_type: String = row.try_get("data_type")?;
            let nullable: bool = row.try_get("nullable")?;
            let key_position: Option<i32> = row.try_get("key_position")?;

            if let Some(position) = key_position {
                key.push((i64::from(position), name.clone()));
            }
            columns.push(
                ColumnDefinition::new(name, data_type, nullable)
                    .with_primary_key(key_position.is_some()),
            );
        }
        Ok((columns, ordered_key(key)))
    }

    pub async fn table_exists(
        conn: &mut PgConnection,
        schema: Option<&str>,
        table: &str,
    ) -> DbResult<bool> {
        let row = sqlx::query(queries::postgres::TABLE_EXISTS)
            .bind(table)
            .bind(schema)
            .fetch_one(conn)
            .await?;
        Ok(row.try_get("present")?)
    }
}

// =============================================================================
// MySQL Implementation
// =============================================================================

mod mysql {
    use super::*;
    use sqlx::mysql::MySqlRow;
    use sqlx::{MySqlConnection, Row};

    pub async fn describe_table(
        conn: &mut MySqlConnection,
        schema: Option<&str>,
        table: &str,
    ) -> DbResult<(Vec<ColumnDefinition>, Vec<String>)> {
        let rows = sqlx::query(queries::mysql::DESCRIBE_COLUMNS)
            .bind(table)
            .bind(schema)
            .fetch_all(&mut *conn)
            .await?;

        let columns: Vec<ColumnDefinition> = rows
            .iter()
            .map(|row| {
                let mut column = ColumnDefinition::new(
                    get_string(row, "COLUMN_NAME"),
                    get_string(row, "COLUMN_TYPE"),
                    get_string(row, "IS_NULLABLE") == "YES",
                );
                if let Some(extra) = get_optional_string(row, "EXTRA") {
                    column = column.with_extra(extra);
                }
                column
            })
            .collect();
        if columns.is_empty() {
            return Ok((columns, Vec::new()));
        }

        let key_rows = sqlx::query(queries::mysql::PRIMARY_KEY)
            .bind(table)
            .bind(schema)
            .fetch_all(&mut *conn)
            .await?;
        let key = key_rows
            .iter()
            .map(|row| {
                let position: i64 = row.try_get("KEY_POSITION").unwrap_or_default();
                (position, get_string(row, "COLUMN_NAME"))
            })
            .collect();

        Ok((columns, ordered_key(key)))
    }

    pub async fn table_exists(
        conn: &mut MySqlConnection,
        schema: Option<&str>,
        table: &str,
    ) -> DbResult<bool> {
        let row = sqlx::query(queries::mysql::TABLE_EXISTS)
            .bind(table)
            .bind(schema)
            .fetch_one(conn)
            .await?;
        let present: i64 = row.try_get("PRESENT")?;
        Ok(present > 0)
    }

    /// information_schema columns may come back as binary strings depending
    /// on the server's collation setup.
    fn get_string(row: &MySqlRow, column: &str) -> String {
        get_optional_string(row, column).unwrap_or_default()
    }

    fn get_optional_string(row: &MySqlRow, column: &str) -> Option<String> {
        row.try_get::<Option<String>, _>(column)
            .ok()
            .flatten()
            .or_else(|| {
                row.try_get::<Option<Vec<u8>>, _>(column)
                    .ok()
                    .flatten()
                    .and_then(|bytes| String::from_utf8(bytes).ok())
            })
    }
}

// =============================================================================
// SQLite Implementation
// =============================================================================

mod sqlite {
    use super::*;
    use crate::sql::Dialect;
    use sqlx::{Row, SqliteConnection};

    pub async fn describe_table(
        conn: &mut SqliteConnection,
        schema: Option<&str>,
        table: &str,
    ) -> DbResult<(Vec<ColumnDefinition>, Vec<String>)> {
        let target = Dialect::Sqlite.quote_identifier(table);
        let pragma = match schema {
            Some(schema) => format!(
                "PRAGMA {}.table_info({})",
                Dialect::Sqlite.quote_identifier(schema),
                target
            ),
            None => format!("PRAGMA table_info({})", target),
        };
        let rows = sqlx::query(&pragma).fetch_all(conn).await?;

        let mut columns = Vec::with_capacity(rows.len());
        let mut key = Vec::new();
        for row in &rows {
            let name: String = row.try_get("name")?;
            let data_type: String = row.try_get("type")?;
            let notnull: i64 = row.try_get("notnull")?;
            let pk: i64 = row.try_get("pk")?;

            if pk > 0 {
                key.push((pk, name.clone()));
            }
            columns.push(ColumnDefinition::new(name, data_type, notnull == 0).with_primary_key(pk > 0));
        }
        Ok((columns, ordered_key(key)))
    }

    pub async fn table_exists(
        conn: &mut SqliteConnection,
        schema: Option<&str>,
        table: &str,
    ) -> DbResult<bool> {
        let row = match schema {
            Some(schema) => {
                let sql = format!(
                    "SELECT COUNT(*) AS present FROM {}.sqlite_master WHERE type IN ('table', 'view') AND name = ?",
                    Dialect::Sqlite.quote_identifier(schema)
                );
                sqlx::query(&sql).bind(table).fetch_one(conn).await?
            }
            None => {
                sqlx::query(queries::sqlite::TABLE_EXISTS_ANY_SCHEMA)
                    .bind(table)
                    .fetch_one(conn)
                    .await?
            }
        };
        let present: i64 = row.try_get("present")?;
        Ok(present > 0)
    }
}
