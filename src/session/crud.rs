//! Mapping-based CRUD helpers and query shortcuts.

use super::{Session, Source};
use crate::db::executor::{self, RecordStream};
use crate::error::{DbError, DbResult};
use crate::models::{Condition, Order, Record, Records, Statement, TableMetadata, TableRef};
use crate::sql::Aggregate;
use crate::sql::builder;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

impl Session {
    /// Insert one or more records and return their primary key values, one
    /// map per record. Unknown and null fields are left out.
    ///
    /// Several records outside an explicit transaction are inserted in one,
    /// so either all of them land or none do.
    pub async fn insert(
        &mut self,
        table: impl Into<TableRef>,
        data: impl Into<Records>,
    ) -> DbResult<Vec<Record>> {
        let table = self.get_table(table).await?;
        let Records(records) = data.into();

        let wrap = records.len() > 1 && !self.in_transaction;
        if wrap {
            self.begin().await?;
        }
        let keys = match self.insert_each(&table, &records).await {
            Ok(keys) => keys,
            Err(e) => {
                if wrap {
                    if let Err(rollback_err) = self.rollback().await {
                        warn!(error = %rollback_err, "Rollback after failed insert failed");
                    }
                }
                return Err(e);
            }
        };
        if wrap {
            self.commit().await?;
        }

        debug!(table = %table.qualified_name(), count = keys.len(), "Inserted records");
        Ok(keys)
    }

    async fn insert_each(
        &mut self,
        table: &TableMetadata,
        records: &[Record],
    ) -> DbResult<Vec<Record>> {
        let dialect = self.dialect()?;
        let returning = dialect.supports_returning() && !table.primary_key.is_empty();

        let mut keys = Vec::with_capacity(records.len());
        for record in records {
            let statement = builder::insert(dialect, table, record)?;
            let key = if returning {
                let output = self.query(&statement).await?;
                output.rows.into_iter().next().unwrap_or_default()
            } else {
                let result = self.execute(statement).await?;
                generated_key(table, record, result.last_insert_id)
            };
            keys.push(key);
        }
        Ok(keys)
    }

    /// Update rows and return how many were affected. Only the first record
    /// of `data` is applied. Without a condition, rows are matched on the
    /// primary key values in the record.
    pub async fn update(
        &mut self,
        table: impl Into<TableRef>,
        data: impl Into<Records>,
        condition: impl Into<Condition>,
    ) -> DbResult<u64> {
        let table = self.get_table(table).await?;
        let dialect = self.dialect()?;
        let Records(records) = data.into();
        let record = records
            .first()
            .ok_or_else(|| DbError::validation("No record to update"))?;
        if records.len() > 1 {
            debug!(ignored = records.len() - 1, "Update applies the first record only");
        }

        let statement = builder::update(dialect, &table, record, &condition.into())?;
        Ok(self.execute(statement).await?.rows_affected)
    }

    /// Delete rows matching a non-empty equality mapping. Any other condition
    /// deletes nothing and returns 0.
    pub async fn delete(
        &mut self,
        table: impl Into<TableRef>,
        condition: impl Into<Condition>,
    ) -> DbResult<u64> {
        let table = self.get_table(table).await?;
        let dialect = self.dialect()?;
        match builder::delete(dialect, &table, &condition.into())? {
            Some(statement) => Ok(self.execute(statement).await?.rows_affected),
            None => {
                warn!(table = %table.qualified_name(), "Delete without a mapping condition ignored");
                Ok(0)
            }
        }
    }

    async fn select_statement(
        &mut self,
        table: impl Into<TableRef>,
        condition: Condition,
        order: Order,
    ) -> DbResult<Statement> {
        let table = self.get_table(table).await?;
        builder::select(self.dialect()?, &table, &condition, &order)
    }

    /// Exactly one matching row.
    pub async fn fetch_one(
        &mut self,
        table: impl Into<TableRef>,
        condition: impl Into<Condition>,
    ) -> DbResult<Record> {
        let statement = self
            .select_statement(table, condition.into(), Order::default())
            .await?;
        self.one(statement).await
    }

    /// The matching row, or `None`. More than one match is an error.
    pub async fn fetch_maybe(
        &mut self,
        table: impl Into<TableRef>,
        condition: impl Into<Condition>,
    ) -> DbResult<Option<Record>> {
        let statement = self
            .select_statement(table, condition.into(), Order::default())
            .await?;
        self.maybe(statement).await
    }

    pub async fn fetch_all(
        &mut self,
        table: impl Into<TableRef>,
        condition: impl Into<Condition>,
        order: impl Into<Order>,
    ) -> DbResult<Vec<Record>> {
        let statement = self
            .select_statement(table, condition.into(), order.into())
            .await?;
        self.all(statement).await
    }

    /// Stream matching rows from a separate connection opened for the
    /// purpose. The session's own connection (and transaction) is not used,
    /// so uncommitted changes are not visible to the stream.
    pub async fn iter_all(
        &mut self,
        table: impl Into<TableRef>,
        condition: impl Into<Condition>,
        order: impl Into<Order>,
    ) -> DbResult<RecordStream> {
        let statement = self
            .select_statement(table, condition.into(), order.into())
            .await?;
        let conn = match &self.source {
            Source::Pooled(pool) => pool.engine().await?.connect().await?,
            Source::Dedicated { engine, .. } => engine.connect().await?,
        };
        Ok(executor::stream_records(conn, statement))
    }

    pub async fn count(
        &mut self,
        table: impl Into<TableRef>,
        condition: impl Into<Condition>,
    ) -> DbResult<i64> {
        let table = self.get_table(table).await?;
        let statement = builder::count(self.dialect()?, &table, &condition.into())?;
        let value = self.scalar(&statement, "count").await?;
        value
            .as_i64()
            .ok_or_else(|| DbError::internal(format!("Unexpected count value: {}", value)))
    }

    /// Largest value of `column`; null when nothing matches.
    pub async fn max(
        &mut self,
        table: impl Into<TableRef>,
        column: &str,
        condition: impl Into<Condition>,
    ) -> DbResult<JsonValue> {
        self.aggregate(table.into(), Aggregate::Max, column, condition.into())
            .await
    }

    /// Smallest value of `column`; null when nothing matches.
    pub async fn min(
        &mut self,
        table: impl Into<TableRef>,
        column: &str,
        condition: impl Into<Condition>,
    ) -> DbResult<JsonValue> {
        self.aggregate(table.into(), Aggregate::Min, column, condition.into())
            .await
    }

    async fn aggregate(
        &mut self,
        table: TableRef,
        function: Aggregate,
        column: &str,
        condition: Condition,
    ) -> DbResult<JsonValue> {
        let table = self.get_table(table).await?;
        let statement = builder::aggregate(self.dialect()?, &table, function, column, &condition)?;
        self.scalar(&statement, function.alias()).await
    }

    /// Value of `column` in the first row (null without rows).
    async fn scalar(&mut self, statement: &Statement, column: &str) -> DbResult<JsonValue> {
        let output = self.query(statement).await?;
        Ok(output
            .rows
            .into_iter()
            .next()
            .and_then(|mut row| row.remove(column))
            .unwrap_or(JsonValue::Null))
    }

    /// Run a query that must return exactly one row.
    pub async fn one(&mut self, statement: impl Into<Statement>) -> DbResult<Record> {
        let mut rows = self.all(statement).await?;
        match rows.len() {
            0 => Err(DbError::NotFound),
            1 => Ok(rows.remove(0)),
            found => Err(DbError::too_many(found)),
        }
    }

    /// Run a query returning at most one row.
    pub async fn maybe(&mut self, statement: impl Into<Statement>) -> DbResult<Option<Record>> {
        let mut rows = self.all(statement).await?;
        match rows.len() {
            0 => Ok(None),
            1 => Ok(Some(rows.remove(0))),
            found => Err(DbError::too_many(found)),
        }
    }

    /// Run a query and return every row.
    pub async fn all(&mut self, statement: impl Into<Statement>) -> DbResult<Vec<Record>> {
        let statement = statement.into();
        let output = self.query(&statement).await?;
        self.column_names = output.columns;
        Ok(output.rows)
    }

    /// Wall-clock time on the server, as an ISO-8601 string.
    pub async fn get_current_timestamp(&mut self) -> DbResult<JsonValue> {
        let sql = self.dialect()?.current_timestamp_sql();
        Ok(self.one(sql).await?.remove("now").unwrap_or(JsonValue::Null))
    }

    /// Server local time without time zone, as an ISO-8601 string.
    pub async fn get_local_timestamp(&mut self) -> DbResult<JsonValue> {
        let sql = self.dialect()?.local_timestamp_sql();
        Ok(self.one(sql).await?.remove("now").unwrap_or(JsonValue::Null))
    }
}

/// Primary key of a record inserted without `RETURNING`: supplied key values
/// win, a missing key column takes the generated id.
fn generated_key(table: &TableMetadata, record: &Record, last_insert_id: Option<i64>) -> Record {
    let mut key = Record::new();
    for column in &table.primary_key {
        if let Some(value) = record.get(column).filter(|v| !v.is_null()) {
            key.insert(column.clone(), value.clone());
        } else if let Some(id) = last_insert_id {
            key.insert(column.clone(), JsonValue::from(id));
        }
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ColumnDefinition;
    use serde_json::json;

    fn table() -> TableMetadata {
        TableMetadata::new("t")
            .with_column(ColumnDefinition::new("id", "int", false).with_primary_key(true))
            .with_column(ColumnDefinition::new("name", "text", true))
    }

    #[test]
    fn test_generated_key_uses_last_insert_id() {
        let record = json!({"name": "a"}).as_object().cloned().unwrap();
        let key = generated_key(&table(), &record, Some(7));
        assert_eq!(key.get("id"), Some(&json!(7)));
        assert_eq!(key.len(), 1);
    }

    #[test]
    fn test_generated_key_prefers_supplied_value() {
        let record = json!({"id": 3, "name": "a"}).as_object().cloned().unwrap();
        let key = generated_key(&table(), &record, Some(7));
        assert_eq!(key.get("id"), Some(&json!(3)));
    }

    #[test]
    fn test_generated_key_without_primary_key() {
        let record = json!({"name": "a"}).as_object().cloned().unwrap();
        let key = generated_key(&TableMetadata::new("log"), &record, Some(1));
        assert!(key.is_empty());
    }
}
