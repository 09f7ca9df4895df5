//! Schema-related data models.
//!
//! This module defines the table metadata resolved by catalog introspection and
//! consumed by the CRUD statement builders.

use serde::{Deserialize, Serialize};

/// Resolved description of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub name: String,
    /// In ordinal order.
    pub columns: Vec<ColumnDefinition>,
    pub primary_key: Vec<String>,
}

impl TableMetadata {
    /// Create a new, column-less table description.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
        }
    }

    /// Set the schema name.
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Append a column. Primary-key columns are also added to `primary_key`.
    pub fn with_column(mut self, column: ColumnDefinition) -> Self {
        if column.is_primary_key && !self.primary_key.contains(&column.name) {
            self.primary_key.push(column.name.clone());
        }
        self.columns.push(column);
        self
    }

    /// Replace the primary key column list (keeps composite key order).
    pub fn with_primary_key(mut self, columns: Vec<String>) -> Self {
        for column in &mut self.columns {
            column.is_primary_key = columns.contains(&column.name);
        }
        self.primary_key = columns;
        self
    }

    /// `schema.name`, or `name` without a schema.
    pub fn qualified_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema, self.name),
            None => self.name.clone(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    /// Full type as reported by the catalog (e.g., `character varying(30)`)
    pub data_type: String,
    pub nullable: bool,
    pub is_primary_key: bool,
    /// MySQL only (e.g., `auto_increment`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<String>,
}

impl ColumnDefinition {
    /// Create a new column definition.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
            is_primary_key: false,
            extra: None,
        }
    }

    /// Set whether this is a primary key column.
    pub fn with_primary_key(mut self, is_pk: bool) -> Self {
        self.is_primary_key = is_pk;
        self
    }

    pub fn with_extra(mut self, extra: impl Into<String>) -> Self {
        let extra = extra.into();
        self.extra = (!extra.is_empty()).then_some(extra);
        self
    }

    pub fn is_auto_increment(&self) -> bool {
        self.extra
            .as_deref()
            .is_some_and(|e| e.to_ascii_lowercase().contains("auto_increment"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> TableMetadata {
        TableMetadata::new("users")
            .with_schema("public")
            .with_column(ColumnDefinition::new("id", "integer", false).with_primary_key(true))
            .with_column(ColumnDefinition::new("name", "text", true))
    }

    #[test]
    fn test_qualified_name() {
        assert_eq!(users().qualified_name(), "public.users");
        assert_eq!(TableMetadata::new("t").qualified_name(), "t");
    }

    #[test]
    fn test_primary_key_follows_columns() {
        let table = users();
        assert_eq!(table.primary_key, vec!["id".to_string()]);
        assert!(table.has_column("name"));
        assert!(!table.has_column("email"));
    }

    #[test]
    fn test_with_primary_key_marks_columns() {
        let table = users().with_primary_key(vec!["name".to_string(), "id".to_string()]);
        assert!(table.column("name").is_some_and(|c| c.is_primary_key));
        assert_eq!(table.primary_key, vec!["name", "id"]);
    }

    #[test]
    fn test_auto_increment_detection() {
        let col = ColumnDefinition::new("id", "int", false).with_extra("auto_increment");
        assert!(col.is_auto_increment());
        assert!(ColumnDefinition::new("id", "int", false).with_extra("").extra.is_none());
    }
}
