//! Administrative statements: identity management and table maintenance.
//!
//! Names are validated before any SQL text is produced. Operations a backend
//! has no equivalent for fail with an unsupported error instead of emitting
//! statements the server would reject.

use crate::error::DbResult;
use crate::sql::dialect::Dialect;
use crate::sql::validator::{NameKind, validate_name};

fn principal(name: &str) -> DbResult<&str> {
    validate_name(NameKind::Principal, name)?;
    Ok(name)
}

fn postgres_only(dialect: Dialect, operation: &str) -> DbResult<()> {
    match dialect {
        Dialect::Postgres => Ok(()),
        other => Err(other.unsupported(operation)),
    }
}

fn server_only(dialect: Dialect, operation: &str) -> DbResult<()> {
    match dialect {
        Dialect::Postgres | Dialect::MySql => Ok(()),
        Dialect::Sqlite => Err(dialect.unsupported(operation)),
    }
}

pub fn add_user(dialect: Dialect, user: &str) -> DbResult<String> {
    server_only(dialect, "CREATE USER")?;
    Ok(format!("CREATE USER {}", principal(user)?))
}

pub fn drop_user(dialect: Dialect, user: &str) -> DbResult<String> {
    server_only(dialect, "DROP USER")?;
    Ok(format!("DROP USER {}", principal(user)?))
}

pub fn rename_user(dialect: Dialect, old_name: &str, new_name: &str) -> DbResult<String> {
    let (old_name, new_name) = (principal(old_name)?, principal(new_name)?);
    match dialect {
        Dialect::Postgres => Ok(format!("ALTER USER {} RENAME TO {}", old_name, new_name)),
        Dialect::MySql => Ok(format!("RENAME USER {} TO {}", old_name, new_name)),
        Dialect::Sqlite => Err(dialect.unsupported("RENAME USER")),
    }
}

pub fn add_group(dialect: Dialect, group: &str) -> DbResult<String> {
    postgres_only(dialect, "CREATE GROUP")?;
    Ok(format!("CREATE GROUP {}", principal(group)?))
}

pub fn drop_group(dialect: Dialect, group: &str) -> DbResult<String> {
    postgres_only(dialect, "DROP GROUP")?;
    Ok(format!("DROP GROUP {}", principal(group)?))
}

pub fn rename_group(dialect: Dialect, old_name: &str, new_name: &str) -> DbResult<String> {
    postgres_only(dialect, "ALTER GROUP ... RENAME")?;
    Ok(format!(
        "ALTER GROUP {} RENAME TO {}",
        principal(old_name)?,
        principal(new_name)?
    ))
}

pub fn add_user_to_group(dialect: Dialect, user: &str, group: &str) -> DbResult<String> {
    postgres_only(dialect, "ALTER GROUP ... ADD USER")?;
    Ok(format!(
        "ALTER GROUP {} ADD USER {}",
        principal(group)?,
        principal(user)?
    ))
}

pub fn drop_user_from_group(dialect: Dialect, user: &str, group: &str) -> DbResult<String> {
    postgres_only(dialect, "ALTER GROUP ... DROP USER")?;
    Ok(format!(
        "ALTER GROUP {} DROP USER {}",
        principal(group)?,
        principal(user)?
    ))
}

/// `GRANT role TO grantee`
pub fn grant_role(dialect: Dialect, role: &str, grantee: &str) -> DbResult<String> {
    server_only(dialect, "GRANT")?;
    validate_name(NameKind::GrantedRole, role)?;
    Ok(format!("GRANT {} TO {}", role, principal(grantee)?))
}

pub fn set_user_password(dialect: Dialect, user: &str, password: &str) -> DbResult<String> {
    validate_name(NameKind::Plain, user)?;
    let literal = dialect.quote_literal(password);
    match dialect {
        Dialect::Postgres => Ok(format!("ALTER USER {} WITH PASSWORD {}", user, literal)),
        Dialect::MySql => Ok(format!("ALTER USER {} IDENTIFIED BY {}", user, literal)),
        Dialect::Sqlite => Err(dialect.unsupported("ALTER USER ... PASSWORD")),
    }
}

pub fn set_role(dialect: Dialect, role: &str) -> DbResult<String> {
    validate_name(NameKind::Plain, role)?;
    match dialect {
        Dialect::Postgres => Ok(format!("SET role={}", role)),
        Dialect::MySql => Ok(format!("SET ROLE {}", role)),
        Dialect::Sqlite => Err(dialect.unsupported("SET ROLE")),
    }
}

pub fn reset_role(dialect: Dialect) -> DbResult<String> {
    match dialect {
        Dialect::Postgres => Ok("RESET role".to_string()),
        Dialect::MySql => Ok("SET ROLE DEFAULT".to_string()),
        Dialect::Sqlite => Err(dialect.unsupported("RESET ROLE")),
    }
}

/// Schema used for an unqualified table in maintenance statements.
fn maintenance_target(dialect: Dialect, schema: Option<&str>, table: &str) -> String {
    dialect.qualified_table(schema.or(dialect.default_schema()), table)
}

pub fn analyze_table(dialect: Dialect, schema: Option<&str>, table: &str) -> String {
    let target = maintenance_target(dialect, schema, table);
    match dialect {
        Dialect::MySql => format!("ANALYZE TABLE {}", target),
        Dialect::Postgres | Dialect::Sqlite => format!("ANALYZE {}", target),
    }
}

pub fn vacuum_analyze_table(
    dialect: Dialect,
    schema: Option<&str>,
    table: &str,
) -> DbResult<String> {
    postgres_only(dialect, "VACUUM ANALYZE")?;
    Ok(format!(
        "VACUUM ANALYZE {}",
        maintenance_target(dialect, schema, table)
    ))
}

/// `DROP TABLE [IF EXISTS] target [CASCADE]`. SQLite has no `CASCADE`
/// clause, so it is left out there.
pub fn drop_table(
    dialect: Dialect,
    schema: Option<&str>,
    table: &str,
    cascade: bool,
    if_exists: bool,
) -> String {
    let mut sql = String::from("DROP TABLE ");
    if if_exists {
        sql.push_str("IF EXISTS ");
    }
    sql.push_str(&maintenance_target(dialect, schema, table));
    if cascade && dialect != Dialect::Sqlite {
        sql.push_str(" CASCADE");
    }
    sql
}

/// Kind of a session-local temporary relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempRelation {
    Table,
    View,
}

impl TempRelation {
    /// Parse the catalog's relation kind (`relkind` on PostgreSQL, `type` on SQLite).
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "r" | "table" => Some(TempRelation::Table),
            "v" | "view" => Some(TempRelation::View),
            _ => None,
        }
    }
}

/// Query listing the session's temporary relations as `(name, kind)` rows.
pub fn temp_relations_query(dialect: Dialect) -> DbResult<&'static str> {
    match dialect {
        Dialect::Postgres => Ok("SELECT c.relname::text AS name, c.relkind::text AS kind \
             FROM pg_catalog.pg_class c \
             WHERE c.relnamespace = pg_my_temp_schema() AND c.relkind IN ('r', 'v')"),
        Dialect::Sqlite => Ok("SELECT name, type AS kind FROM temp.sqlite_master \
             WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%'"),
        Dialect::MySql => Err(dialect.unsupported("listing temporary tables")),
    }
}

pub fn drop_temp_relation(dialect: Dialect, kind: TempRelation, name: &str) -> String {
    let keyword = match kind {
        TempRelation::Table => "TABLE",
        TempRelation::View => "VIEW",
    };
    match dialect {
        Dialect::Postgres => format!(
            "DROP {} IF EXISTS pg_temp.{} CASCADE",
            keyword,
            dialect.quote_identifier(name)
        ),
        Dialect::MySql => format!(
            "DROP TEMPORARY {} IF EXISTS {}",
            keyword,
            dialect.quote_identifier(name)
        ),
        Dialect::Sqlite => format!(
            "DROP {} IF EXISTS temp.{}",
            keyword,
            dialect.quote_identifier(name)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgres_identity_statements() {
        let d = Dialect::Postgres;
        assert_eq!(add_user(d, "alice").unwrap(), "CREATE USER alice");
        assert_eq!(add_group(d, "staff").unwrap(), "CREATE GROUP staff");
        assert_eq!(
            rename_user(d, "alice", "alice2").unwrap(),
            "ALTER USER alice RENAME TO alice2"
        );
        assert_eq!(
            rename_group(d, "staff", "crew").unwrap(),
            "ALTER GROUP staff RENAME TO crew"
        );
        assert_eq!(
            add_user_to_group(d, "alice", "staff").unwrap(),
            "ALTER GROUP staff ADD USER alice"
        );
        assert_eq!(
            drop_user_from_group(d, "alice", "staff").unwrap(),
            "ALTER GROUP staff DROP USER alice"
        );
        assert_eq!(drop_user(d, "alice").unwrap(), "DROP USER alice");
        assert_eq!(drop_group(d, "staff").unwrap(), "DROP GROUP staff");
        assert_eq!(grant_role(d, "readers", "alice").unwrap(), "GRANT readers TO alice");
        assert_eq!(set_role(d, "alice").unwrap(), "SET role=alice");
        assert_eq!(reset_role(d).unwrap(), "RESET role");
    }

    #[test]
    fn test_injection_rejected_before_sql() {
        let err = add_user(Dialect::Postgres, "bob; DROP TABLE x").unwrap_err();
        assert!(err.is_validation());
        assert!(grant_role(Dialect::Postgres, "1role", "bob").is_err());
        assert!(set_role(Dialect::Postgres, "bob_admin").is_err());
    }

    #[test]
    fn test_password_is_quoted() {
        assert_eq!(
            set_user_password(Dialect::Postgres, "alice", "it's").unwrap(),
            "ALTER USER alice WITH PASSWORD 'it''s'"
        );
        assert_eq!(
            set_user_password(Dialect::Postgres, "alice", "a\\b").unwrap(),
            "ALTER USER alice WITH PASSWORD E'a\\\\b'"
        );
        assert_eq!(
            set_user_password(Dialect::MySql, "alice", "pw").unwrap(),
            "ALTER USER alice IDENTIFIED BY 'pw'"
        );
    }

    #[test]
    fn test_unsupported_backends() {
        assert!(matches!(
            add_group(Dialect::MySql, "staff").unwrap_err(),
            crate::error::DbError::Unsupported { .. }
        ));
        assert!(add_user(Dialect::Sqlite, "alice").is_err());
        assert!(vacuum_analyze_table(Dialect::Sqlite, None, "t").is_err());
        assert!(temp_relations_query(Dialect::MySql).is_err());
    }

    #[test]
    fn test_maintenance_default_schema() {
        assert_eq!(
            analyze_table(Dialect::Postgres, None, "users"),
            "ANALYZE \"public\".\"users\""
        );
        assert_eq!(
            analyze_table(Dialect::MySql, None, "users"),
            "ANALYZE TABLE `users`"
        );
        assert_eq!(
            vacuum_analyze_table(Dialect::Postgres, Some("s"), "t").unwrap(),
            "VACUUM ANALYZE \"s\".\"t\""
        );
    }

    #[test]
    fn test_drop_table_variants() {
        assert_eq!(
            drop_table(Dialect::Postgres, None, "t", true, true),
            "DROP TABLE IF EXISTS \"public\".\"t\" CASCADE"
        );
        assert_eq!(
            drop_table(Dialect::Sqlite, None, "t", true, false),
            "DROP TABLE \"main\".\"t\""
        );
    }

    #[test]
    fn test_drop_temp_relation() {
        assert_eq!(
            drop_temp_relation(Dialect::Postgres, TempRelation::View, "v1"),
            "DROP VIEW IF EXISTS pg_temp.\"v1\" CASCADE"
        );
        assert_eq!(TempRelation::parse("r"), Some(TempRelation::Table));
        assert_eq!(TempRelation::parse("i"), None);
    }
}
