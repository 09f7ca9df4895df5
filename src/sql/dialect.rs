//! SQL dialect differences between the supported backends.
//!
//! Covers identifier quoting, placeholder syntax, string literal quoting and
//! the handful of per-backend defaults the statement builders depend on.

use crate::error::{DbError, DbResult};
use crate::models::DatabaseType;

/// Dialect of a backend we can actually talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Postgres,
    MySql,
    Sqlite,
}

impl Dialect {
    pub fn name(self) -> &'static str {
        match self {
            Dialect::Postgres => "PostgreSQL",
            Dialect::MySql => "MySQL",
            Dialect::Sqlite => "SQLite",
        }
    }

    /// Quote an identifier, doubling any embedded quote character.
    pub fn quote_identifier(self, name: &str) -> String {
        match self {
            Dialect::Postgres | Dialect::Sqlite => format!("\"{}\"", name.replace('"', "\"\"")),
            Dialect::MySql => format!("`{}`", name.replace('`', "``")),
        }
    }

    /// Quote `schema.table`, or just `table` when no schema is given.
    pub fn qualified_table(self, schema: Option<&str>, table: &str) -> String {
        match schema {
            Some(schema) => format!(
                "{}.{}",
                self.quote_identifier(schema),
                self.quote_identifier(table)
            ),
            None => self.quote_identifier(table),
        }
    }

    /// Placeholder for the `index`-th (1-based) bound parameter.
    ///
    /// PostgreSQL placeholders carry an explicit cast to the target column type
    /// when one is known, so text-encoded values (timestamps, numerics, enums)
    /// are accepted by strictly typed columns.
    pub fn placeholder(self, index: usize, cast: Option<&str>) -> String {
        match self {
            Dialect::Postgres => match cast {
                Some(sql_type) if !sql_type.is_empty() => format!("${}::{}", index, sql_type),
                _ => format!("${}", index),
            },
            Dialect::MySql | Dialect::Sqlite => "?".to_string(),
        }
    }

    /// Render a string literal.
    ///
    /// Single quotes are doubled. PostgreSQL switches to an `E'...'` escape
    /// string when backslashes are present; MySQL treats backslash as an escape
    /// character inside plain literals, so it is doubled there.
    pub fn quote_literal(self, value: &str) -> String {
        let quoted = value.replace('\'', "''");
        match self {
            Dialect::Postgres if value.contains('\\') => {
                format!("E'{}'", quoted.replace('\\', "\\\\"))
            }
            Dialect::MySql => format!("'{}'", quoted.replace('\\', "\\\\")),
            _ => format!("'{}'", quoted),
        }
    }

    /// Schema assumed for unqualified names in maintenance statements.
    /// `None` means the connection's current database (MySQL).
    pub fn default_schema(self) -> Option<&'static str> {
        match self {
            Dialect::Postgres => Some("public"),
            Dialect::Sqlite => Some("main"),
            Dialect::MySql => None,
        }
    }

    pub fn supports_returning(self) -> bool {
        matches!(self, Dialect::Postgres | Dialect::Sqlite)
    }

    pub fn begin_sql(self) -> &'static str {
        match self {
            Dialect::MySql => "START TRANSACTION",
            Dialect::Postgres | Dialect::Sqlite => "BEGIN",
        }
    }

    /// Statement for a commit without an explicit transaction. SQLite rejects a
    /// bare `COMMIT` outside a transaction, so there is none.
    pub fn bare_commit(self) -> Option<&'static str> {
        match self {
            Dialect::Postgres | Dialect::MySql => Some("COMMIT"),
            Dialect::Sqlite => None,
        }
    }

    /// Query returning the wall-clock time (not the transaction start) as `now`.
    pub fn current_timestamp_sql(self) -> &'static str {
        match self {
            Dialect::Postgres => "SELECT clock_timestamp() AS now",
            Dialect::MySql => "SELECT SYSDATE(6) AS now",
            Dialect::Sqlite => "SELECT strftime('%Y-%m-%dT%H:%M:%fZ', 'now') AS now",
        }
    }

    /// Query returning the local time without time zone as `now`.
    pub fn local_timestamp_sql(self) -> &'static str {
        match self {
            Dialect::Postgres => "SELECT localtimestamp AS now",
            Dialect::MySql => "SELECT LOCALTIMESTAMP(6) AS now",
            Dialect::Sqlite => "SELECT strftime('%Y-%m-%dT%H:%M:%f', 'now', 'localtime') AS now",
        }
    }

    pub fn unsupported(self, operation: &str) -> DbError {
        DbError::unsupported(operation, self.name())
    }
}

impl TryFrom<DatabaseType> for Dialect {
    type Error = DbError;

    fn try_from(db_type: DatabaseType) -> DbResult<Self> {
        match db_type {
            DatabaseType::PostgreSQL => Ok(Dialect::Postgres),
            DatabaseType::MySQL => Ok(Dialect::MySql),
            DatabaseType::SQLite => Ok(Dialect::Sqlite),
            DatabaseType::MsSQL => Err(DbError::unsupported("connect", db_type.display_name())),
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_identifier() {
        assert_eq!(Dialect::Postgres.quote_identifier("users"), "\"users\"");
        assert_eq!(Dialect::Sqlite.quote_identifier("a\"b"), "\"a\"\"b\"");
        assert_eq!(Dialect::MySql.quote_identifier("a`b"), "`a``b`");
    }

    #[test]
    fn test_qualified_table() {
        assert_eq!(
            Dialect::Postgres.qualified_table(Some("public"), "users"),
            "\"public\".\"users\""
        );
        assert_eq!(Dialect::MySql.qualified_table(None, "users"), "`users`");
    }

    #[test]
    fn test_placeholder() {
        assert_eq!(Dialect::Postgres.placeholder(2, None), "$2");
        assert_eq!(
            Dialect::Postgres.placeholder(1, Some("timestamp without time zone")),
            "$1::timestamp without time zone"
        );
        assert_eq!(Dialect::MySql.placeholder(3, Some("int")), "?");
        assert_eq!(Dialect::Sqlite.placeholder(1, None), "?");
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(Dialect::Postgres.quote_literal("it's"), "'it''s'");
        assert_eq!(Dialect::Postgres.quote_literal("a\\b"), "E'a\\\\b'");
        assert_eq!(Dialect::MySql.quote_literal("a\\b'"), "'a\\\\b'''");
        assert_eq!(Dialect::Sqlite.quote_literal("a\\b"), "'a\\b'");
    }

    #[test]
    fn test_mssql_has_no_dialect() {
        let err = Dialect::try_from(DatabaseType::MsSQL).unwrap_err();
        assert!(matches!(err, DbError::Unsupported { .. }));
    }

    #[test]
    fn test_bare_commit() {
        assert_eq!(Dialect::Postgres.bare_commit(), Some("COMMIT"));
        assert_eq!(Dialect::Sqlite.bare_commit(), None);
        assert_eq!(Dialect::MySql.begin_sql(), "START TRANSACTION");
    }
}
