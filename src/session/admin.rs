//! Administrative operations: table maintenance and identity management.

use super::Session;
use crate::db::schema;
use crate::error::DbResult;
use crate::models::Statement;
use crate::sql::admin::{self, TempRelation};
use crate::sql::parse_schema_table_name;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

impl Session {
    /// Whether `schema.table` (or `table`) exists.
    pub async fn exists(&mut self, name: &str) -> DbResult<bool> {
        let (schema, table) = parse_schema_table_name(name)?;
        schema::table_exists(self.handle()?.connection(), schema.as_deref(), &table).await
    }

    pub async fn drop_table(&mut self, name: &str, cascade: bool) -> DbResult<()> {
        self.drop_table_with(name, cascade, false).await
    }

    /// Like [`drop_table`](Self::drop_table), but a missing table is not an error.
    pub async fn drop_table_if_exists(&mut self, name: &str, cascade: bool) -> DbResult<()> {
        self.drop_table_with(name, cascade, true).await
    }

    async fn drop_table_with(&mut self, name: &str, cascade: bool, if_exists: bool) -> DbResult<()> {
        let (schema, table) = parse_schema_table_name(name)?;
        let sql = admin::drop_table(self.dialect()?, schema.as_deref(), &table, cascade, if_exists);
        self.execute(sql).await?;
        self.handle()?.evict_table(&table);
        info!(table = %name, cascade, "Dropped table");
        Ok(())
    }

    /// Refresh planner statistics of a table.
    pub async fn analyze_table(&mut self, name: &str) -> DbResult<()> {
        let (schema, table) = parse_schema_table_name(name)?;
        let sql = admin::analyze_table(self.dialect()?, schema.as_deref(), &table);
        self.execute(sql).await?;
        Ok(())
    }

    /// `VACUUM ANALYZE`; PostgreSQL only, and not inside a transaction.
    pub async fn vacuum_analyze_table(&mut self, name: &str) -> DbResult<()> {
        let (schema, table) = parse_schema_table_name(name)?;
        let sql = admin::vacuum_analyze_table(self.dialect()?, schema.as_deref(), &table)?;
        self.execute(sql).await?;
        Ok(())
    }

    /// Drop the temporary tables and views of this connection. Returns how
    /// many relations were dropped.
    pub async fn drop_temp_tables(&mut self) -> DbResult<usize> {
        let dialect = self.dialect()?;
        let listing = Statement::new(admin::temp_relations_query(dialect)?);
        let relations = self.query(&listing).await?.rows;

        let mut dropped = 0;
        for relation in relations {
            let (Some(JsonValue::String(name)), Some(JsonValue::String(kind))) =
                (relation.get("name"), relation.get("kind"))
            else {
                continue;
            };
            let Some(kind) = TempRelation::parse(kind) else {
                warn!(relation = %name, kind = %kind, "Skipping temporary relation of unknown kind");
                continue;
            };
            self.execute(admin::drop_temp_relation(dialect, kind, name))
                .await?;
            self.handle()?.evict_table(name);
            dropped += 1;
        }

        if dropped > 0 {
            debug!(count = dropped, "Dropped temporary relations");
        }
        Ok(dropped)
    }

    pub async fn add_user(&mut self, user: &str) -> DbResult<()> {
        let sql = admin::add_user(self.dialect()?, user)?;
        self.execute(sql).await?;
        Ok(())
    }

    pub async fn drop_user(&mut self, user: &str) -> DbResult<()> {
        let sql = admin::drop_user(self.dialect()?, user)?;
        self.execute(sql).await?;
        Ok(())
    }

    pub async fn rename_user(&mut self, old_name: &str, new_name: &str) -> DbResult<()> {
        let sql = admin::rename_user(self.dialect()?, old_name, new_name)?;
        self.execute(sql).await?;
        Ok(())
    }

    pub async fn add_group(&mut self, group: &str) -> DbResult<()> {
        let sql = admin::add_group(self.dialect()?, group)?;
        self.execute(sql).await?;
        Ok(())
    }

    pub async fn drop_group(&mut self, group: &str) -> DbResult<()> {
        let sql = admin::drop_group(self.dialect()?, group)?;
        self.execute(sql).await?;
        Ok(())
    }

    pub async fn rename_group(&mut self, old_name: &str, new_name: &str) -> DbResult<()> {
        let sql = admin::rename_group(self.dialect()?, old_name, new_name)?;
        self.execute(sql).await?;
        Ok(())
    }

    pub async fn add_user_to_group(&mut self, user: &str, group: &str) -> DbResult<()> {
        let sql = admin::add_user_to_group(self.dialect()?, user, group)?;
        self.execute(sql).await?;
        Ok(())
    }

    pub async fn drop_user_from_group(&mut self, user: &str, group: &str) -> DbResult<()> {
        let sql = admin::drop_user_from_group(self.dialect()?, user, group)?;
        self.execute(sql).await?;
        Ok(())
    }

    /// `GRANT role TO grantee`.
    pub async fn grant_role(&mut self, role: &str, grantee: &str) -> DbResult<()> {
        let sql = admin::grant_role(self.dialect()?, role, grantee)?;
        self.execute(sql).await?;
        Ok(())
    }

    /// Change a user's password. The password is sent as a quoted literal and
    /// never logged.
    pub async fn set_user_password(&mut self, user: &str, password: &str) -> DbResult<()> {
        let sql = admin::set_user_password(self.dialect()?, user, password)?;
        self.execute(Statement::sensitive(sql)).await?;
        Ok(())
    }

    /// Switch the connection's current role until [`reset_role`](Self::reset_role).
    pub async fn set_role(&mut self, role: &str) -> DbResult<()> {
        let sql = admin::set_role(self.dialect()?, role)?;
        self.execute(sql).await?;
        debug!(role = %role, "Role assumed");
        Ok(())
    }

    pub async fn reset_role(&mut self) -> DbResult<()> {
        let sql = admin::reset_role(self.dialect()?)?;
        self.execute(sql).await?;
        Ok(())
    }
}
