//! Configuration handling for the sqlsession CLI.
//!
//! This module provides configuration management via CLI arguments and
//! environment variables, and turns them into connection parameters, pool
//! options and the conditions/orders the session helpers take.

use crate::db::pool::{DEFAULT_POOL_SIZE, PoolOptions};
use crate::db::secrets::{JsonFileSecretStore, SecretStore};
use crate::error::{DbError, DbResult};
use crate::models::{Condition, ConnectionParams, Order, OrderTerm};
use clap::{Parser, Subcommand};
use serde_json::Value as JsonValue;
use std::path::PathBuf;
use std::sync::Arc;

pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Configuration for the sqlsession CLI.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "sqlsession",
    about = "Run mapping-based queries and maintenance statements against a SQL database",
    version,
    author
)]
pub struct Config {
    /// Connection parameters as a JSON object, e.g.
    /// '{"type": "pgsql", "host": "db", "user": "app", "database": "shop"}'
    #[arg(
        short = 'c',
        long = "connection",
        value_name = "JSON",
        env = "SQLSESSION_CONNECTION",
        conflicts_with = "connection_file"
    )]
    pub connection: Option<String>,

    /// File holding the connection parameters JSON object
    #[arg(long, value_name = "PATH", env = "SQLSESSION_CONNECTION_FILE")]
    pub connection_file: Option<PathBuf>,

    /// JSON file mapping secret references (`secret_arn`) to parameter objects
    #[arg(long, value_name = "PATH", env = "SQLSESSION_SECRETS_FILE")]
    pub secrets_file: Option<PathBuf>,

    /// Role to assume right after connecting
    #[arg(long, env = "SQLSESSION_ROLE")]
    pub role: Option<String>,

    /// Connections kept for reuse per connection target
    #[arg(long, default_value_t = DEFAULT_POOL_SIZE, env = "SQLSESSION_POOL_SIZE")]
    pub pool_size: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = DEFAULT_LOG_LEVEL, env = "SQLSESSION_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "SQLSESSION_JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Operation to run.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Print matching rows of a table as JSON lines
    Fetch {
        /// Table name, optionally schema-qualified
        table: String,
        #[command(flatten)]
        filter: FilterArgs,
        /// Sort column; prefix with "desc:" or "asc:" for an explicit direction.
        /// Repeat for several columns.
        #[arg(long = "order", value_name = "COLUMN")]
        order: Vec<String>,
        /// Stream rows from a separate connection instead of loading them all
        #[arg(long)]
        stream: bool,
    },
    /// Print exactly one matching row; fails on zero or several matches
    One {
        table: String,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Count matching rows
    Count {
        table: String,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Run a SQL query and print its rows as JSON lines
    Query { sql: String },
    /// Report whether a table exists (exit status 1 when it does not)
    Exists { table: String },
    /// Print the server's current timestamp
    Now {
        /// Local time without time zone instead of wall-clock time
        #[arg(long)]
        local: bool,
    },
    /// Refresh planner statistics of a table
    Analyze { table: String },
    /// VACUUM ANALYZE a table (PostgreSQL)
    VacuumAnalyze { table: String },
    /// Drop a table
    DropTable {
        table: String,
        #[arg(long)]
        cascade: bool,
        #[arg(long)]
        if_exists: bool,
    },
    /// Create a user
    AddUser { user: String },
    /// Drop a user
    DropUser { user: String },
    /// Grant a role to a user or group
    GrantRole { role: String, grantee: String },
    /// Set a user's password, read from SQLSESSION_NEW_PASSWORD
    SetPassword {
        user: String,
        #[arg(long, env = "SQLSESSION_NEW_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

/// Row filter options shared by table commands.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct FilterArgs {
    /// Equality filter as a JSON object, e.g. '{"id": 5}'
    #[arg(long = "where", value_name = "JSON", conflicts_with = "raw")]
    pub equals: Option<String>,

    /// SQL expression used verbatim as the WHERE clause
    #[arg(long = "raw-where", value_name = "SQL")]
    pub raw: Option<String>,
}

impl FilterArgs {
    pub fn condition(&self) -> DbResult<Condition> {
        if let Some(raw) = &self.raw {
            return Ok(Condition::raw(raw.clone()));
        }
        let Some(equals) = &self.equals else {
            return Ok(Condition::None);
        };
        match serde_json::from_str::<JsonValue>(equals) {
            Ok(JsonValue::Object(map)) => Ok(Condition::Equality(map)),
            Ok(_) => Err(DbError::validation("--where must be a JSON object")),
            Err(e) => Err(DbError::validation(format!("Invalid --where JSON: {}", e))),
        }
    }
}

/// Parse `column`, `asc:column` or `desc:column` order terms.
pub fn parse_order(terms: &[String]) -> Order {
    Order(
        terms
            .iter()
            .map(|term| match term.split_once(':') {
                Some((direction, column)) => OrderTerm::Directed {
                    direction: direction.to_string(),
                    column: column.to_string(),
                },
                None => OrderTerm::Column(term.clone()),
            })
            .collect(),
    )
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Connection parameters from `--connection` or `--connection-file`.
    pub fn connection_params(&self) -> DbResult<ConnectionParams> {
        match (&self.connection, &self.connection_file) {
            (Some(json), _) => ConnectionParams::from_json_str(json),
            (None, Some(path)) => {
                let json = std::fs::read_to_string(path).map_err(|e| {
                    DbError::configuration(format!(
                        "Cannot read connection file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                ConnectionParams::from_json_str(&json)
            }
            (None, None) => Err(DbError::configuration(
                "No connection configured; use --connection or --connection-file",
            )),
        }
    }

    pub fn pool_options(&self) -> DbResult<PoolOptions> {
        if self.pool_size == 0 {
            return Err(DbError::configuration("pool_size must be greater than 0"));
        }
        Ok(PoolOptions::default().with_pool_size(self.pool_size))
    }

    pub fn secret_store(&self) -> Option<Arc<dyn SecretStore>> {
        self.secrets_file
            .as_ref()
            .map(|path| Arc::new(JsonFileSecretStore::new(path)) as Arc<dyn SecretStore>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DatabaseType;
    use serde_json::json;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(std::iter::once("sqlsession").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&["-c", r#"{"type": "sqlite", "database": "a.db"}"#, "exists", "t"]);
        assert_eq!(config.pool_size, DEFAULT_POOL_SIZE);
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert!(!config.json_logs);
        assert!(matches!(config.command, Command::Exists { ref table } if table == "t"));
        assert_eq!(
            config.connection_params().unwrap().db_type,
            DatabaseType::SQLite
        );
    }

    #[test]
    fn test_connection_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conn.json");
        std::fs::write(&path, r#"{"db_type": "mysql", "server": "db", "db": "shop"}"#).unwrap();
        let config = parse(&["--connection-file", path.to_str().unwrap(), "count", "orders"]);
        let params = config.connection_params().unwrap();
        assert_eq!(params.db_type, DatabaseType::MySQL);
        assert_eq!(params.host, "db");
        assert_eq!(params.port_or_default(), Some(3306));
    }

    #[test]
    fn test_missing_connection_is_configuration_error() {
        let config = parse(&["exists", "t"]);
        let err = config.connection_params().unwrap_err();
        assert!(matches!(err, DbError::Configuration { .. }));
    }

    #[test]
    fn test_zero_pool_size_rejected() {
        let config = parse(&["--pool-size", "0", "exists", "t"]);
        assert!(config.pool_options().is_err());
        let config = parse(&["--pool-size", "2", "exists", "t"]);
        assert_eq!(config.pool_options().unwrap().pool_size, 2);
    }

    #[test]
    fn test_fetch_filter_and_order() {
        let config = parse(&[
            "fetch",
            "public.users",
            "--where",
            r#"{"active": true}"#,
            "--order",
            "name",
            "--order",
            "desc:id",
        ]);
        let Command::Fetch {
            table,
            filter,
            order,
            stream,
        } = config.command
        else {
            panic!("expected fetch");
        };
        assert_eq!(table, "public.users");
        assert!(!stream);
        match filter.condition().unwrap() {
            Condition::Equality(map) => assert_eq!(map.get("active"), Some(&json!(true))),
            other => panic!("unexpected condition {:?}", other),
        }
        assert_eq!(
            parse_order(&order),
            Order::new().asc("name").desc("id")
        );
    }

    #[test]
    fn test_filter_variants() {
        assert!(matches!(FilterArgs::default().condition().unwrap(), Condition::None));

        let raw = FilterArgs {
            raw: Some("id > 5".into()),
            ..Default::default()
        };
        assert!(matches!(raw.condition().unwrap(), Condition::Raw(ref s) if s == "id > 5"));

        let not_object = FilterArgs {
            equals: Some("[1]".into()),
            ..Default::default()
        };
        assert!(not_object.condition().unwrap_err().is_validation());
    }

    #[test]
    fn test_where_conflicts_with_raw_where() {
        let result = Config::try_parse_from([
            "sqlsession",
            "count",
            "t",
            "--where",
            "{}",
            "--raw-where",
            "1=1",
        ]);
        assert!(result.is_err());
    }
}
