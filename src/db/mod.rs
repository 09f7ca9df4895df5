//! Database access layer.
//!
//! This module provides:
//! - Engines and per-backend connections
//! - The identity-keyed connection pool and its registry
//! - Statement execution and record streaming
//! - Catalog introspection
//! - Type mappings from driver rows to JSON records
//! - Secret stores for indirect connection parameters
//! - Database dispatch macros for reducing code duplication

#[macro_use]
pub mod macros;
pub mod connection;
pub mod executor;
pub mod params;
pub mod pool;
pub mod schema;
pub mod secrets;
pub mod types;

pub use connection::{DbConnection, Engine};
pub use executor::{QueryOutput, RecordStream, STREAM_BUFFER};
pub use pool::{
    ConnectionHandle, ConnectionPool, DEFAULT_POOL_SIZE, PoolOptions, PoolRegistry, PoolStats,
};
pub use secrets::{JsonFileSecretStore, SecretStore, StaticSecretStore};
