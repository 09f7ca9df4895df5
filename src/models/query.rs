//! Query-related data models.
//!
//! This module defines the values flowing into and out of a session: records,
//! bound parameters, statements, and the tagged condition/order/table inputs
//! that CRUD helpers resolve against table metadata.

use crate::models::schema::TableMetadata;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// A row as a column-name to value mapping.
pub type Record = Map<String, JsonValue>;

/// A parameter value for parameterized queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Structured value, bound as JSON
    Json(JsonValue),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Json(_) => "json",
        }
    }
}

impl From<&JsonValue> for QueryParam {
    fn from(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => Self::String(s.clone()),
            JsonValue::Array(_) | JsonValue::Object(_) => Self::Json(value.clone()),
        }
    }
}

impl From<JsonValue> for QueryParam {
    fn from(value: JsonValue) -> Self {
        Self::from(&value)
    }
}

impl From<&str> for QueryParam {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<i64> for QueryParam {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

/// A SQL statement with its bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<QueryParam>,
    /// SQL text carries a secret (e.g. a password literal) and is kept out of logs.
    pub sensitive: bool,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            sensitive: false,
        }
    }

    /// Statement whose SQL text must not be logged.
    pub fn sensitive(sql: impl Into<String>) -> Self {
        Self {
            sensitive: true,
            ..Self::new(sql)
        }
    }

    /// SQL text for log output.
    pub fn log_sql(&self) -> &str {
        if self.sensitive { "<redacted>" } else { &self.sql }
    }

    /// Add a parameter to this statement.
    pub fn bind(mut self, param: impl Into<QueryParam>) -> Self {
        self.params.push(param.into());
        self
    }
}

impl From<&str> for Statement {
    fn from(sql: &str) -> Self {
        Self::new(sql)
    }
}

impl From<String> for Statement {
    fn from(sql: String) -> Self {
        Self::new(sql)
    }
}

/// Outcome of a write statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecuteResult {
    pub rows_affected: u64,
    /// Populated by MySQL (`LAST_INSERT_ID()`) and SQLite (`last_insert_rowid()`).
    pub last_insert_id: Option<i64>,
}

/// Table argument of CRUD helpers: a qualified name to resolve, or metadata
/// that was already resolved.
#[derive(Debug, Clone)]
pub enum TableRef {
    Name(String),
    Handle(TableMetadata),
}

impl From<&str> for TableRef {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for TableRef {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<TableMetadata> for TableRef {
    fn from(table: TableMetadata) -> Self {
        Self::Handle(table)
    }
}

impl From<&TableMetadata> for TableRef {
    fn from(table: &TableMetadata) -> Self {
        Self::Handle(table.clone())
    }
}

/// Row filter of CRUD helpers.
#[derive(Debug, Clone, Default)]
pub enum Condition {
    /// No filter.
    #[default]
    None,
    /// Column equality clauses joined with AND. A null value matches `IS NULL`.
    Equality(Record),
    /// SQL expression used verbatim in the WHERE clause.
    Raw(String),
}

impl Condition {
    pub fn raw(expression: impl Into<String>) -> Self {
        Self::Raw(expression.into())
    }

    /// Build an equality condition from `(column, value)` pairs.
    pub fn eq<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<JsonValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::Equality(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn is_mapping(&self) -> bool {
        matches!(self, Self::Equality(_))
    }
}

impl From<Record> for Condition {
    fn from(map: Record) -> Self {
        Self::Equality(map)
    }
}

impl From<Option<Record>> for Condition {
    fn from(map: Option<Record>) -> Self {
        map.map(Self::Equality).unwrap_or_default()
    }
}

/// One ORDER BY term: a bare column (ascending) or a `(direction, column)` pair.
///
/// The direction is kept as given and checked when the order is resolved
/// against a table, so that an invalid value surfaces as a validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderTerm {
    Column(String),
    Directed { direction: String, column: String },
}

impl From<&str> for OrderTerm {
    fn from(column: &str) -> Self {
        Self::Column(column.to_string())
    }
}

impl From<String> for OrderTerm {
    fn from(column: String) -> Self {
        Self::Column(column)
    }
}

impl From<(&str, &str)> for OrderTerm {
    fn from((direction, column): (&str, &str)) -> Self {
        Self::Directed {
            direction: direction.to_string(),
            column: column.to_string(),
        }
    }
}

/// ORDER BY clause: one term or a list of them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Order(pub Vec<OrderTerm>);

impl Order {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn asc(mut self, column: impl Into<String>) -> Self {
        self.0.push(OrderTerm::Column(column.into()));
        self
    }

    pub fn desc(mut self, column: impl Into<String>) -> Self {
        self.0.push(OrderTerm::Directed {
            direction: "desc".to_string(),
            column: column.into(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Order {
    fn from(column: &str) -> Self {
        Self(vec![column.into()])
    }
}

impl From<(&str, &str)> for Order {
    fn from(pair: (&str, &str)) -> Self {
        Self(vec![pair.into()])
    }
}

impl From<OrderTerm> for Order {
    fn from(term: OrderTerm) -> Self {
        Self(vec![term])
    }
}

impl<T: Into<OrderTerm>> From<Vec<T>> for Order {
    fn from(terms: Vec<T>) -> Self {
        Self(terms.into_iter().map(Into::into).collect())
    }
}

/// Payload of `insert`: a single record or many.
#[derive(Debug, Clone, Default)]
pub struct Records(pub Vec<Record>);

impl From<Record> for Records {
    fn from(record: Record) -> Self {
        Self(vec![record])
    }
}

impl From<Vec<Record>> for Records {
    fn from(records: Vec<Record>) -> Self {
        Self(records)
    }
}
