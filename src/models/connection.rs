//! Connection-related data models.
//!
//! Connection targets arrive as loosely keyed mappings (the same shape a JSON
//! config file or a secret store hands back). This module normalizes them into
//! [`ConnectionParams`] and renders the connection URL that doubles as the pool
//! identity key.

use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use url::Url;

pub const DEFAULT_HOST: &str = "localhost";

const TYPE_KEYS: &[&str] = &["type", "db_type"];
const USER_KEYS: &[&str] = &["user"];
const PASSWORD_KEYS: &[&str] = &["passwd", "password", "pass"];
const HOST_KEYS: &[&str] = &["host", "server"];
const PORT_KEYS: &[&str] = &["port"];
const DATABASE_KEYS: &[&str] = &["database", "dbname", "db_name", "database_name", "db"];
const SECRET_KEYS: &[&str] = &["secret_arn"];

/// Supported database types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    PostgreSQL,
    /// Includes MariaDB
    MySQL,
    /// Recognized for configuration only; there is no driver for it.
    MsSQL,
    SQLite,
}

impl DatabaseType {
    /// Parse the `type`/`db_type` configuration value.
    pub fn parse(value: &str) -> DbResult<Self> {
        match value.to_ascii_lowercase().as_str() {
            "pgsql" | "postgres" | "postgresql" => Ok(Self::PostgreSQL),
            "mysql" | "mariadb" => Ok(Self::MySQL),
            "mssql" => Ok(Self::MsSQL),
            "sqlite" => Ok(Self::SQLite),
            other => Err(DbError::validation(format!(
                "db_type must be either \"pgsql\", \"mysql\", \"mssql\" or \"sqlite\", got \"{}\"",
                other
            ))),
        }
    }

    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::MsSQL => "SQL Server",
            Self::SQLite => "SQLite",
        }
    }

    /// Get the default port for this database type.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::PostgreSQL => Some(5432),
            Self::MySQL => Some(3306),
            Self::MsSQL => Some(1433),
            Self::SQLite => None,
        }
    }

    fn url_scheme(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "postgresql",
            Self::MySQL => "mysql",
            Self::MsSQL => "mssql",
            Self::SQLite => "sqlite",
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Return the first non-null value among `keys`.
fn get_value<'a>(data: &'a Map<String, JsonValue>, keys: &[&str]) -> Option<&'a JsonValue> {
    keys.iter()
        .filter_map(|key| data.get(*key))
        .find(|value| !value.is_null())
}

fn get_string(data: &Map<String, JsonValue>, keys: &[&str]) -> DbResult<Option<String>> {
    match get_value(data, keys) {
        None => Ok(None),
        Some(JsonValue::String(s)) => Ok(Some(s.clone())),
        Some(JsonValue::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(DbError::configuration(format!(
            "Expected a string for '{}', got {}",
            keys[0], other
        ))),
    }
}

fn get_port(data: &Map<String, JsonValue>) -> DbResult<Option<u16>> {
    let invalid = |v: &JsonValue| DbError::configuration(format!("Invalid port: {}", v));
    match get_value(data, PORT_KEYS) {
        None => Ok(None),
        Some(v @ JsonValue::Number(n)) => n
            .as_u64()
            .and_then(|p| u16::try_from(p).ok())
            .map(Some)
            .ok_or_else(|| invalid(v)),
        Some(v @ JsonValue::String(s)) => s.trim().parse().map(Some).map_err(|_| invalid(v)),
        Some(v) => Err(invalid(v)),
    }
}

/// Normalized connection parameters for one database target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    pub db_type: DatabaseType,
    pub user: Option<String>,
    /// Contains sensitive data - never log
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    /// Database name, or the file path for SQLite.
    pub database: Option<String>,
    /// Reference into an external secret store that supplies the other fields.
    pub secret_arn: Option<String>,
    /// Extra driver options, appended to the connection URL as query pairs.
    #[serde(default)]
    pub connect_args: BTreeMap<String, String>,
}

impl ConnectionParams {
    /// Build parameters from a configuration mapping.
    ///
    /// Each field accepts several aliases and the first non-null one wins.
    pub fn from_map(data: &Map<String, JsonValue>) -> DbResult<Self> {
        let db_type = match get_string(data, TYPE_KEYS)? {
            Some(t) => DatabaseType::parse(&t)?,
            None => DatabaseType::PostgreSQL,
        };

        Ok(Self {
            db_type,
            user: get_string(data, USER_KEYS)?,
            password: get_string(data, PASSWORD_KEYS)?,
            host: get_string(data, HOST_KEYS)?.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: get_port(data)?,
            database: get_string(data, DATABASE_KEYS)?,
            secret_arn: get_string(data, SECRET_KEYS)?,
            connect_args: BTreeMap::new(),
        })
    }

    /// Parse parameters from a JSON object string.
    pub fn from_json_str(s: &str) -> DbResult<Self> {
        let value: JsonValue = serde_json::from_str(s)
            .map_err(|e| DbError::configuration(format!("Invalid connection JSON: {}", e)))?;
        match value {
            JsonValue::Object(map) => Self::from_map(&map),
            _ => Err(DbError::configuration(
                "Connection parameters must be a JSON object",
            )),
        }
    }

    /// Overlay the fields found in `data` (same keys and aliases as
    /// [`from_map`](Self::from_map)) onto these parameters. The result no
    /// longer references a secret.
    pub fn overlay(&self, data: &Map<String, JsonValue>) -> DbResult<Self> {
        let db_type = match get_string(data, TYPE_KEYS)? {
            Some(t) => DatabaseType::parse(&t)?,
            None => self.db_type,
        };

        Ok(Self {
            db_type,
            user: get_string(data, USER_KEYS)?.or_else(|| self.user.clone()),
            password: get_string(data, PASSWORD_KEYS)?.or_else(|| self.password.clone()),
            host: get_string(data, HOST_KEYS)?.unwrap_or_else(|| self.host.clone()),
            port: get_port(data)?.or(self.port),
            database: get_string(data, DATABASE_KEYS)?.or_else(|| self.database.clone()),
            secret_arn: None,
            connect_args: self.connect_args.clone(),
        })
    }

    /// Parameters for a SQLite database file.
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self {
            db_type: DatabaseType::SQLite,
            user: None,
            password: None,
            host: DEFAULT_HOST.to_string(),
            port: None,
            database: Some(path.into()),
            secret_arn: None,
            connect_args: BTreeMap::new(),
        }
    }

    pub fn with_connect_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.connect_args.insert(key.into(), value.into());
        self
    }

    /// Port to connect to, falling back to the backend default.
    pub fn port_or_default(&self) -> Option<u16> {
        self.port.or_else(|| self.db_type.default_port())
    }

    /// Whether the remaining fields must be fetched from a secret store first.
    pub fn needs_secret(&self) -> bool {
        self.secret_arn.is_some()
    }

    /// Render the connection URL, without `connect_args`.
    pub fn build_url(&self) -> DbResult<String> {
        if self.db_type == DatabaseType::SQLite {
            let path = self
                .database
                .as_deref()
                .filter(|p| !p.is_empty())
                .ok_or_else(|| DbError::configuration("SQLite requires a database file path"))?;
            return Ok(format!("sqlite:{}", path));
        }

        let port = self
            .port_or_default()
            .ok_or_else(|| DbError::configuration("Missing port"))?;
        let database = self.database.as_deref().unwrap_or_default();
        let mut url = Url::parse(&format!(
            "{}://{}:{}/",
            self.db_type.url_scheme(),
            self.host,
            port
        ))
        .map_err(|e| DbError::configuration(format!("Invalid host '{}': {}", self.host, e)))?;

        if let Some(user) = &self.user {
            url.set_username(user)
                .map_err(|_| DbError::configuration("Cannot set user on connection URL"))?;
        }
        if let Some(password) = &self.password {
            url.set_password(Some(password))
                .map_err(|_| DbError::configuration("Cannot set password on connection URL"))?;
        }
        url.path_segments_mut()
            .map_err(|_| DbError::configuration("Connection URL cannot carry a database"))?
            .clear()
            .push(database);

        Ok(url.to_string())
    }

    /// Connection URL including `connect_args` as query pairs.
    pub fn build_url_with_args(&self) -> DbResult<String> {
        let base = self.build_url()?;
        if self.connect_args.is_empty() {
            return Ok(base);
        }
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.connect_args.iter())
            .finish();
        Ok(format!("{}?{}", base, query))
    }

    /// Identity key for the pool registry: the secret reference when present,
    /// otherwise the connection URL.
    pub fn pool_key(&self) -> DbResult<String> {
        match &self.secret_arn {
            Some(arn) => Ok(arn.clone()),
            None => self.build_url(),
        }
    }
}

/// Get a display-safe version of a connection URL (credentials masked).
pub fn masked_url(connection_string: &str) -> String {
    let authority_start = connection_string.find("://").map(|i| i + 3).unwrap_or(0);
    if let Some(at_pos) = connection_string[authority_start..]
        .find('@')
        .map(|i| i + authority_start)
    {
        if let Some(colon_pos) = connection_string[authority_start..at_pos]
            .find(':')
            .map(|i| i + authority_start)
        {
            let prefix = &connection_string[..colon_pos + 1];
            let suffix = &connection_string[at_pos..];
            return format!("{}****{}", prefix, suffix);
        }
    }
    connection_string.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: JsonValue) -> ConnectionParams {
        ConnectionParams::from_map(value.as_object().unwrap()).unwrap()
    }

    #[test]
    fn test_defaults_to_pgsql_on_localhost() {
        let p = params(json!({"user": "app", "passwd": "pw", "dbname": "shop"}));
        assert_eq!(p.db_type, DatabaseType::PostgreSQL);
        assert_eq!(p.host, "localhost");
        assert_eq!(p.port_or_default(), Some(5432));
        assert_eq!(p.database.as_deref(), Some("shop"));
    }

    #[test]
    fn test_first_matching_alias_wins() {
        let p = params(json!({
            "db_type": "mysql",
            "password": "first",
            "pass": "second",
            "server": "db.internal",
            "db": "sales"
        }));
        assert_eq!(p.db_type, DatabaseType::MySQL);
        assert_eq!(p.password.as_deref(), Some("first"));
        assert_eq!(p.host, "db.internal");
        assert_eq!(p.port_or_default(), Some(3306));
    }

    #[test]
    fn test_null_alias_falls_through() {
        let p = params(json!({"passwd": null, "password": "pw"}));
        assert_eq!(p.password.as_deref(), Some("pw"));
    }

    #[test]
    fn test_port_accepts_number_or_string() {
        assert_eq!(params(json!({"port": 6543})).port, Some(6543));
        assert_eq!(params(json!({"port": "6543"})).port, Some(6543));
        let err = ConnectionParams::from_map(json!({"port": "x"}).as_object().unwrap());
        assert!(matches!(err, Err(DbError::Configuration { .. })));
    }

    #[test]
    fn test_mssql_default_port() {
        let p = params(json!({"type": "mssql"}));
        assert_eq!(p.port_or_default(), Some(1433));
    }

    #[test]
    fn test_unknown_type_fails_validation() {
        let err = ConnectionParams::from_map(json!({"type": "oracle"}).as_object().unwrap());
        assert!(matches!(err, Err(DbError::Validation { .. })));
    }

    #[test]
    fn test_build_url_encodes_password() {
        let p = params(json!({
            "user": "app",
            "passwd": "p@ss word/1",
            "host": "db",
            "database": "shop"
        }));
        let url = p.build_url().unwrap();
        assert_eq!(url, "postgresql://app:p%40ss%20word%2F1@db:5432/shop");
    }

    #[test]
    fn test_build_url_with_connect_args() {
        let p = params(json!({"user": "app", "host": "db", "database": "shop"}))
            .with_connect_arg("sslmode", "require");
        assert_eq!(
            p.build_url_with_args().unwrap(),
            "postgresql://app@db:5432/shop?sslmode=require"
        );
    }

    #[test]
    fn test_sqlite_url() {
        let p = ConnectionParams::sqlite("/tmp/data.db");
        assert_eq!(p.build_url().unwrap(), "sqlite:/tmp/data.db");
        assert_eq!(p.port_or_default(), None);
    }

    #[test]
    fn test_pool_key_prefers_secret_reference() {
        let p = params(json!({"secret_arn": "arn:aws:secretsmanager:eu:1:secret:db"}));
        assert_eq!(p.pool_key().unwrap(), "arn:aws:secretsmanager:eu:1:secret:db");
    }

    #[test]
    fn test_masked_url() {
        assert_eq!(
            masked_url("postgresql://app:secret@db:5432/shop"),
            "postgresql://app:****@db:5432/shop"
        );
        assert_eq!(
            masked_url("postgresql://app@db:5432/shop"),
            "postgresql://app@db:5432/shop"
        );
        assert_eq!(masked_url("sqlite:/tmp/x.db"), "sqlite:/tmp/x.db");
    }
}
