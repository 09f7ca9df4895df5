//! sqlsession library
//!
//! Mapping-based CRUD helpers, an identity-keyed connection pool and scoped
//! sessions with explicit transactions over SQL databases (PostgreSQL, MySQL,
//! SQLite), plus validated administrative statements.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod session;
pub mod sql;

pub use config::Config;
pub use db::{ConnectionPool, Engine, PoolOptions, PoolRegistry};
pub use error::{DbError, DbResult};
pub use models::{Condition, ConnectionParams, Order, Record, Statement, TableRef};
pub use session::Session;
