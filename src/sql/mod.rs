//! SQL text generation.
//!
//! - Dialect quoting and placeholders
//! - Identifier validation
//! - CRUD statement builders
//! - Administrative statements

pub mod admin;
pub mod builder;
pub mod dialect;
pub mod validator;

pub use builder::Aggregate;
pub use dialect::Dialect;
pub use validator::{NameKind, parse_schema_table_name, validate_name};
