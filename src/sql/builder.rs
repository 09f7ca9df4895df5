//! Statement builders for the mapping-based CRUD helpers.
//!
//! Every builder takes resolved [`TableMetadata`], so column names coming from
//! records, conditions and orders are checked against the catalog before they
//! are quoted into SQL. Values are always bound as parameters.

use crate::error::{DbError, DbResult};
use crate::models::{
    ColumnDefinition, Condition, Order, OrderTerm, QueryParam, Record, Statement, TableMetadata,
};
use crate::sql::dialect::Dialect;
use serde_json::Value as JsonValue;

/// Accumulates bound parameters and hands out matching placeholders.
#[derive(Debug)]
struct ParamList {
    dialect: Dialect,
    params: Vec<QueryParam>,
}

impl ParamList {
    fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            params: Vec::new(),
        }
    }

    fn push(&mut self, column: &ColumnDefinition, value: &JsonValue) -> String {
        self.params.push(QueryParam::from(value));
        self.dialect
            .placeholder(self.params.len(), Some(column.data_type.as_str()))
    }

    fn into_statement(self, sql: String) -> Statement {
        Statement {
            sql,
            params: self.params,
            sensitive: false,
        }
    }
}

fn table_sql(dialect: Dialect, table: &TableMetadata) -> String {
    dialect.qualified_table(table.schema.as_deref(), &table.name)
}

fn require_column<'t>(table: &'t TableMetadata, name: &str) -> DbResult<&'t ColumnDefinition> {
    table.column(name).ok_or_else(|| {
        DbError::validation(format!(
            "Column '{}' does not exist in table '{}'",
            name,
            table.qualified_name()
        ))
    })
}

/// Keep only the fields that name a column of `table` and are not null, in
/// column order. Null fields are left out so column defaults apply.
pub fn preprocess_record<'a>(
    table: &'a TableMetadata,
    record: &'a Record,
) -> Vec<(&'a ColumnDefinition, &'a JsonValue)> {
    table
        .columns
        .iter()
        .filter_map(|column| match record.get(&column.name) {
            Some(value) if !value.is_null() => Some((column, value)),
            _ => None,
        })
        .collect()
}

/// Equality on the primary key columns, with values taken from `record`.
pub fn primary_key_condition(table: &TableMetadata, record: &Record) -> DbResult<Condition> {
    if table.primary_key.is_empty() {
        return Err(DbError::validation(format!(
            "Table '{}' has no primary key; an explicit condition is required",
            table.qualified_name()
        )));
    }

    let mut condition = Record::new();
    for key in &table.primary_key {
        let value = record.get(key).ok_or_else(|| {
            DbError::validation(format!("Missing primary key value for '{}'", key))
        })?;
        condition.insert(key.clone(), value.clone());
    }
    Ok(Condition::Equality(condition))
}

fn where_clause(
    dialect: Dialect,
    table: &TableMetadata,
    condition: &Condition,
    params: &mut ParamList,
) -> DbResult<String> {
    match condition {
        Condition::None => Ok(String::new()),
        Condition::Raw(expression) if expression.trim().is_empty() => Ok(String::new()),
        Condition::Raw(expression) => Ok(format!(" WHERE {}", expression)),
        Condition::Equality(map) if map.is_empty() => Ok(String::new()),
        Condition::Equality(map) => {
            let mut clauses = Vec::with_capacity(map.len());
            for (key, value) in map {
                let column = require_column(table, key)?;
                let quoted = dialect.quote_identifier(&column.name);
                if value.is_null() {
                    clauses.push(format!("{} IS NULL", quoted));
                } else {
                    clauses.push(format!("{} = {}", quoted, params.push(column, value)));
                }
            }
            Ok(format!(" WHERE {}", clauses.join(" AND ")))
        }
    }
}

fn order_clause(dialect: Dialect, table: &TableMetadata, order: &Order) -> DbResult<String> {
    if order.is_empty() {
        return Ok(String::new());
    }

    let mut terms = Vec::with_capacity(order.0.len());
    for term in &order.0 {
        let (column, descending) = match term {
            OrderTerm::Column(column) => (column.as_str(), false),
            OrderTerm::Directed { direction, column } => {
                match direction.as_str() {
                    "asc" => (column.as_str(), false),
                    "desc" => (column.as_str(), true),
                    _ => {
                        return Err(DbError::validation(format!(
                            "Order direction must be 'desc' or 'asc', got '{}'",
                            direction
                        )));
                    }
                }
            }
        };
        let column = require_column(table, column)?;
        let quoted = dialect.quote_identifier(&column.name);
        terms.push(if descending {
            format!("{} DESC", quoted)
        } else {
            quoted
        });
    }
    Ok(format!(" ORDER BY {}", terms.join(", ")))
}

/// `SELECT * FROM table [WHERE ...] [ORDER BY ...]`
pub fn select(
    dialect: Dialect,
    table: &TableMetadata,
    condition: &Condition,
    order: &Order,
) -> DbResult<Statement> {
    let mut params = ParamList::new(dialect);
    let where_sql = where_clause(dialect, table, condition, &mut params)?;
    let order_sql = order_clause(dialect, table, order)?;
    let sql = format!(
        "SELECT * FROM {}{}{}",
        table_sql(dialect, table),
        where_sql,
        order_sql
    );
    Ok(params.into_statement(sql))
}

/// Insert one record. Primary key columns are returned where the backend
/// supports `RETURNING`.
pub fn insert(dialect: Dialect, table: &TableMetadata, record: &Record) -> DbResult<Statement> {
    let fields = preprocess_record(table, record);
    let mut params = ParamList::new(dialect);
    let target = table_sql(dialect, table);

    let mut sql = if fields.is_empty() {
        match dialect {
            Dialect::MySql => format!("INSERT INTO {} () VALUES ()", target),
            Dialect::Postgres | Dialect::Sqlite => {
                format!("INSERT INTO {} DEFAULT VALUES", target)
            }
        }
    } else {
        let columns: Vec<String> = fields
            .iter()
            .map(|(column, _)| dialect.quote_identifier(&column.name))
            .collect();
        let values: Vec<String> = fields
            .iter()
            .map(|(column, value)| params.push(column, value))
            .collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            target,
            columns.join(", "),
            values.join(", ")
        )
    };

    if dialect.supports_returning() && !table.primary_key.is_empty() {
        let returning: Vec<String> = table
            .primary_key
            .iter()
            .map(|key| dialect.quote_identifier(key))
            .collect();
        sql.push_str(" RETURNING ");
        sql.push_str(&returning.join(", "));
    }

    Ok(params.into_statement(sql))
}

/// Update rows matching `condition` with the fields of `record`. Without a
/// condition, rows are matched on the primary key values found in `record`.
pub fn update(
    dialect: Dialect,
    table: &TableMetadata,
    record: &Record,
    condition: &Condition,
) -> DbResult<Statement> {
    let fields = preprocess_record(table, record);
    if fields.is_empty() {
        return Err(DbError::validation(format!(
            "No columns of '{}' to update",
            table.qualified_name()
        )));
    }

    let condition = match condition {
        Condition::None => primary_key_condition(table, record)?,
        other => other.clone(),
    };

    let mut params = ParamList::new(dialect);
    let assignments: Vec<String> = fields
        .iter()
        .map(|(column, value)| {
            format!(
                "{} = {}",
                dialect.quote_identifier(&column.name),
                params.push(column, value)
            )
        })
        .collect();
    let where_sql = where_clause(dialect, table, &condition, &mut params)?;
    let sql = format!(
        "UPDATE {} SET {}{}",
        table_sql(dialect, table),
        assignments.join(", "),
        where_sql
    );
    Ok(params.into_statement(sql))
}

/// Delete rows matching a non-empty equality mapping. Returns `None` for any
/// other condition (an empty mapping included), so a missing filter never
/// turns into a full-table delete.
pub fn delete(
    dialect: Dialect,
    table: &TableMetadata,
    condition: &Condition,
) -> DbResult<Option<Statement>> {
    match condition {
        Condition::Equality(map) if !map.is_empty() => {}
        _ => return Ok(None),
    }
    let mut params = ParamList::new(dialect);
    let where_sql = where_clause(dialect, table, condition, &mut params)?;
    let sql = format!("DELETE FROM {}{}", table_sql(dialect, table), where_sql);
    Ok(Some(params.into_statement(sql)))
}

/// `SELECT COUNT(*) AS "count" FROM table [WHERE ...]`
pub fn count(dialect: Dialect, table: &TableMetadata, condition: &Condition) -> DbResult<Statement> {
    let mut params = ParamList::new(dialect);
    let where_sql = where_clause(dialect, table, condition, &mut params)?;
    let sql = format!(
        "SELECT COUNT(*) AS {} FROM {}{}",
        dialect.quote_identifier("count"),
        table_sql(dialect, table),
        where_sql
    );
    Ok(params.into_statement(sql))
}

/// Single-column aggregate supported by [`aggregate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Max,
    Min,
}

impl Aggregate {
    fn function(self) -> &'static str {
        match self {
            Aggregate::Max => "MAX",
            Aggregate::Min => "MIN",
        }
    }

    pub fn alias(self) -> &'static str {
        match self {
            Aggregate::Max => "max",
            Aggregate::Min => "min",
        }
    }
}

/// `SELECT MAX(column) AS "max" FROM table [WHERE ...]` (or `MIN`).
pub fn aggregate(
    dialect: Dialect,
    table: &TableMetadata,
    function: Aggregate,
    column: &str,
    condition: &Condition,
) -> DbResult<Statement> {
    let column = require_column(table, column)?;
    let mut params = ParamList::new(dialect);
    let where_sql = where_clause(dialect, table, condition, &mut params)?;
    let sql = format!(
        "SELECT {}({}) AS {} FROM {}{}",
        function.function(),
        dialect.quote_identifier(&column.name),
        dialect.quote_identifier(function.alias()),
        table_sql(dialect, table),
        where_sql
    );
    Ok(params.into_statement(sql))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn users() -> TableMetadata {
        TableMetadata::new("users")
            .with_schema("public")
            .with_column(ColumnDefinition::new("id", "integer", false).with_primary_key(true))
            .with_column(ColumnDefinition::new("name", "text", true))
            .with_column(ColumnDefinition::new("age", "integer", true))
    }

    fn record(value: JsonValue) -> Record {
        match value {
            JsonValue::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_preprocess_drops_unknown_and_null() {
        let table = users();
        let data = record(json!({"name": "a", "age": null, "email": "x"}));
        let fields = preprocess_record(&table, &data);
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].0.name, "name");
    }

    #[test]
    fn test_select_with_condition_and_order() {
        let stmt = select(
            Dialect::Postgres,
            &users(),
            &Condition::eq([("name", "bob")]),
            &Order::from(vec![OrderTerm::from(("desc", "age")), OrderTerm::from("id")]),
        )
        .unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT * FROM \"public\".\"users\" WHERE \"name\" = $1::text ORDER BY \"age\" DESC, \"id\""
        );
        assert_eq!(stmt.params, vec![QueryParam::String("bob".to_string())]);
    }

    #[test]
    fn test_null_equality_renders_is_null() {
        let stmt = select(
            Dialect::Sqlite,
            &users(),
            &Condition::from(record(json!({"age": null}))),
            &Order::default(),
        )
        .unwrap();
        assert!(stmt.sql.ends_with("WHERE \"age\" IS NULL"));
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn test_unknown_condition_column_rejected() {
        let err = select(
            Dialect::Postgres,
            &users(),
            &Condition::eq([("missing", 1)]),
            &Order::default(),
        )
        .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_invalid_order_direction_rejected() {
        let err = select(
            Dialect::Postgres,
            &users(),
            &Condition::None,
            &Order::from(("sideways", "id")),
        )
        .unwrap_err();
        assert!(err.is_validation());

        // Directions are matched exactly.
        for direction in ["DESC", "Asc"] {
            let err = select(
                Dialect::Postgres,
                &users(),
                &Condition::None,
                &Order::from((direction, "id")),
            )
            .unwrap_err();
            assert!(err.is_validation());
        }
    }

    #[test]
    fn test_insert_returns_primary_key() {
        let stmt = insert(
            Dialect::Postgres,
            &users(),
            &record(json!({"name": "a", "age": 3})),
        )
        .unwrap();
        assert_eq!(
            stmt.sql,
            "INSERT INTO \"public\".\"users\" (\"name\", \"age\") VALUES ($1::text, $2::integer) RETURNING \"id\""
        );
    }

    #[test]
    fn test_insert_mysql_without_returning() {
        let table = TableMetadata::new("users")
            .with_column(ColumnDefinition::new("id", "int", false).with_primary_key(true))
            .with_column(ColumnDefinition::new("name", "varchar(20)", true));
        let stmt = insert(Dialect::MySql, &table, &record(json!({"name": "a"}))).unwrap();
        assert_eq!(stmt.sql, "INSERT INTO `users` (`name`) VALUES (?)");
    }

    #[test]
    fn test_insert_all_defaults() {
        let stmt = insert(Dialect::Sqlite, &users(), &Record::new()).unwrap();
        assert_eq!(
            stmt.sql,
            "INSERT INTO \"public\".\"users\" DEFAULT VALUES RETURNING \"id\""
        );
    }

    #[test]
    fn test_update_defaults_to_primary_key() {
        let stmt = update(
            Dialect::Sqlite,
            &users(),
            &record(json!({"id": 7, "name": "b"})),
            &Condition::None,
        )
        .unwrap();
        assert_eq!(
            stmt.sql,
            "UPDATE \"public\".\"users\" SET \"id\" = ?, \"name\" = ? WHERE \"id\" = ?"
        );
        assert_eq!(stmt.params.len(), 3);
    }

    #[test]
    fn test_update_missing_primary_key_value() {
        let err = update(
            Dialect::Sqlite,
            &users(),
            &record(json!({"name": "b"})),
            &Condition::None,
        )
        .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_update_raw_condition_verbatim() {
        let stmt = update(
            Dialect::Postgres,
            &users(),
            &record(json!({"age": 1})),
            &Condition::raw("age IS NULL"),
        )
        .unwrap();
        assert!(stmt.sql.ends_with("SET \"age\" = $1::integer WHERE age IS NULL"));
    }

    #[test]
    fn test_delete_requires_mapping() {
        assert!(
            delete(Dialect::Postgres, &users(), &Condition::None)
                .unwrap()
                .is_none()
        );
        assert!(
            delete(Dialect::Postgres, &users(), &Condition::raw("1=1"))
                .unwrap()
                .is_none()
        );
        assert!(
            delete(Dialect::Postgres, &users(), &Condition::Equality(Record::new()))
                .unwrap()
                .is_none()
        );
        let stmt = delete(Dialect::Postgres, &users(), &Condition::eq([("id", 1)]))
            .unwrap()
            .unwrap();
        assert_eq!(
            stmt.sql,
            "DELETE FROM \"public\".\"users\" WHERE \"id\" = $1::integer"
        );
    }

    #[test]
    fn test_count_and_aggregate() {
        let table = users();
        let stmt = count(Dialect::MySql, &table, &Condition::None).unwrap();
        assert_eq!(stmt.sql, "SELECT COUNT(*) AS `count` FROM `public`.`users`");

        let stmt = aggregate(
            Dialect::Postgres,
            &table,
            Aggregate::Max,
            "age",
            &Condition::raw("id > 1"),
        )
        .unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT MAX(\"age\") AS \"max\" FROM \"public\".\"users\" WHERE id > 1"
        );

        let err = aggregate(Dialect::Postgres, &table, Aggregate::Min, "nope", &Condition::None)
            .unwrap_err();
        assert!(err.is_validation());
    }
}
