//! Secret indirection for connection parameters.
//!
//! A target configured with `secret_arn` gets its remaining fields (user,
//! password, host, ...) from a [`SecretStore`] at connect time.

use crate::error::{DbError, DbResult};
use crate::models::ConnectionParams;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Source of connection secrets keyed by reference.
pub trait SecretStore: Send + Sync + std::fmt::Debug {
    /// Return the secret stored under `reference` as a JSON object.
    fn get_secret(&self, reference: &str) -> DbResult<Map<String, JsonValue>>;
}

/// In-memory secret store.
#[derive(Debug, Default, Clone)]
pub struct StaticSecretStore {
    secrets: HashMap<String, Map<String, JsonValue>>,
}

impl StaticSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, reference: impl Into<String>, secret: Map<String, JsonValue>) -> Self {
        self.secrets.insert(reference.into(), secret);
        self
    }
}

impl SecretStore for StaticSecretStore {
    fn get_secret(&self, reference: &str) -> DbResult<Map<String, JsonValue>> {
        self.secrets
            .get(reference)
            .cloned()
            .ok_or_else(|| DbError::configuration(format!("Secret '{}' not found", reference)))
    }
}

/// Secret store backed by a JSON file mapping references to objects.
///
/// The file is read on every lookup so rotated credentials are picked up.
/// Lookups block; async callers go through [`resolve_params_async`].
#[derive(Debug, Clone)]
pub struct JsonFileSecretStore {
    path: PathBuf,
}

impl JsonFileSecretStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl SecretStore for JsonFileSecretStore {
    fn get_secret(&self, reference: &str) -> DbResult<Map<String, JsonValue>> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            DbError::configuration(format!(
                "Cannot read secrets file {}: {}",
                self.path.display(),
                e
            ))
        })?;
        let mut all: Map<String, JsonValue> = serde_json::from_str(&content).map_err(|e| {
            DbError::configuration(format!(
                "Invalid secrets file {}: {}",
                self.path.display(),
                e
            ))
        })?;
        match all.remove(reference) {
            Some(JsonValue::Object(secret)) => Ok(secret),
            Some(_) => Err(DbError::configuration(format!(
                "Secret '{}' is not a JSON object",
                reference
            ))),
            None => Err(DbError::configuration(format!(
                "Secret '{}' not found",
                reference
            ))),
        }
    }
}

/// Apply the secret referenced by `params`, if any.
///
/// Fields present in the secret override the configured ones. Connect args
/// are kept.
pub fn resolve_params(
    params: &ConnectionParams,
    store: Option<&Arc<dyn SecretStore>>,
) -> DbResult<ConnectionParams> {
    let Some(reference) = params.secret_arn.as_deref() else {
        return Ok(params.clone());
    };
    let store = store.ok_or_else(|| {
        DbError::configuration(format!(
            "Connection references secret '{}' but no secret store is configured",
            reference
        ))
    })?;

    debug!(secret = %reference, "Resolving connection secret");
    let secret = store.get_secret(reference)?;
    params.overlay(&secret)
}

/// [`resolve_params`] with the store lookup moved to the blocking thread pool.
pub async fn resolve_params_async(
    params: &ConnectionParams,
    store: Option<&Arc<dyn SecretStore>>,
) -> DbResult<ConnectionParams> {
    if !params.needs_secret() {
        return Ok(params.clone());
    }
    let params = params.clone();
    let store = store.cloned();
    tokio::task::spawn_blocking(move || resolve_params(&params, store.as_ref()))
        .await
        .map_err(|e| DbError::internal(format!("Secret lookup task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: JsonValue) -> Map<String, JsonValue> {
        match value {
            JsonValue::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_params_without_secret_unchanged() {
        let params = ConnectionParams::sqlite("a.db");
        assert_eq!(resolve_params(&params, None).unwrap(), params);
    }

    #[test]
    fn test_secret_overrides_fields() {
        let params = ConnectionParams::from_map(&object(json!({
            "type": "pgsql",
            "secret_arn": "arn:db",
            "host": "placeholder",
            "database": "shop",
        })))
        .unwrap();
        let store: Arc<dyn SecretStore> = Arc::new(StaticSecretStore::new().with_secret(
            "arn:db",
            object(json!({"user": "app", "passwd": "pw", "server": "db.internal"})),
        ));

        let resolved = resolve_params(&params, Some(&store)).unwrap();
        assert_eq!(resolved.user.as_deref(), Some("app"));
        assert_eq!(resolved.password.as_deref(), Some("pw"));
        assert_eq!(resolved.host, "db.internal");
        assert_eq!(resolved.database.as_deref(), Some("shop"));
        assert!(resolved.secret_arn.is_none());
    }

    #[test]
    fn test_missing_store_is_configuration_error() {
        let mut params = ConnectionParams::sqlite("a.db");
        params.secret_arn = Some("arn:x".into());
        let err = resolve_params(&params, None).unwrap_err();
        assert!(matches!(err, DbError::Configuration { .. }));
    }

    #[test]
    fn test_json_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.json");
        std::fs::write(&path, r#"{"arn:a": {"user": "u"}, "arn:b": 5}"#).unwrap();
        let store = JsonFileSecretStore::new(&path);

        assert_eq!(store.get_secret("arn:a").unwrap().get("user"), Some(&json!("u")));
        assert!(store.get_secret("arn:b").is_err());
        assert!(store.get_secret("arn:c").is_err());
    }

    #[tokio::test]
    async fn test_async_resolution_reads_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.json");
        std::fs::write(&path, r#"{"arn:db": {"user": "app", "host": "db.internal"}}"#).unwrap();
        let store: Arc<dyn SecretStore> = Arc::new(JsonFileSecretStore::new(&path));

        let mut params = ConnectionParams::sqlite("a.db");
        params.secret_arn = Some("arn:db".into());
        let resolved = resolve_params_async(&params, Some(&store)).await.unwrap();
        assert_eq!(resolved.user.as_deref(), Some("app"));
        assert_eq!(resolved.host, "db.internal");

        let plain = ConnectionParams::sqlite("b.db");
        assert_eq!(resolve_params_async(&plain, None).await.unwrap(), plain);
    }
}
