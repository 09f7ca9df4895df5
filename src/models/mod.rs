//! Data models for sqlsession.
//!
//! This module re-exports all model types used throughout the library.

pub mod connection;
pub mod query;
pub mod schema;

// Re-export commonly used types
pub use connection::{ConnectionParams, DatabaseType, masked_url};
pub use query::{
    Condition, ExecuteResult, Order, OrderTerm, QueryParam, Record, Records, Statement, TableRef,
};
pub use schema::{ColumnDefinition, TableMetadata};
