//! Identifier validation for statements that cannot bind their names.
//!
//! Table, user, group and role names end up spliced into SQL text, so each one
//! must fully match an allow-list pattern before any statement is built.

use crate::error::{DbError, DbResult};
use regex::Regex;
use std::sync::LazyLock;

/// Letters accepted in table names besides ASCII.
const NAME_LETTERS: &str = "ŠŽÁÂÉËÍÎÓÔŐÖÚÜÝßáäçéëíóôöúüý";

static TABLE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^[a-zA-Z_{letters}][a-zA-Z0-9_{letters}]*$",
        letters = NAME_LETTERS
    ))
    .expect("invalid table name regex")
});

static PRINCIPAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("invalid principal regex"));

static ROLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("invalid role regex"));

static PLAIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]+$").expect("invalid plain name regex"));

/// Kind of name being validated, which selects the allowed pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    /// Schema or table name part
    Table,
    /// User, group or grantee
    Principal,
    /// Role being granted
    GrantedRole,
    /// Target of `SET role` and password changes
    Plain,
}

impl NameKind {
    fn pattern(self) -> &'static Regex {
        match self {
            NameKind::Table => &TABLE_NAME_RE,
            NameKind::Principal => &PRINCIPAL_RE,
            NameKind::GrantedRole => &ROLE_RE,
            NameKind::Plain => &PLAIN_RE,
        }
    }

    fn label(self) -> &'static str {
        match self {
            NameKind::Table => "table name",
            NameKind::Principal => "user or group name",
            NameKind::GrantedRole => "role name",
            NameKind::Plain => "role or user name",
        }
    }
}

/// Check `value` against the pattern for `kind`.
pub fn validate_name(kind: NameKind, value: &str) -> DbResult<()> {
    if kind.pattern().is_match(value) {
        Ok(())
    } else {
        Err(DbError::validation(format!(
            "Invalid {}: {:?}",
            kind.label(),
            value
        )))
    }
}

/// Split a possibly schema-qualified table name into `(schema, table)`.
///
/// Accepts `table` or `schema.table`. Empty parts, more than one dot, or
/// characters outside the table name pattern are rejected.
pub fn parse_schema_table_name(name: &str) -> DbResult<(Option<String>, String)> {
    let parts: Vec<&str> = name.split('.').collect();
    let (schema, table) = match parts.as_slice() {
        [table] => (None, *table),
        [schema, table] => (Some(*schema), *table),
        _ => {
            return Err(DbError::validation(format!(
                "Invalid table name: {:?} has more than one '.'",
                name
            )));
        }
    };

    if let Some(schema) = schema {
        validate_name(NameKind::Table, schema)?;
    }
    validate_name(NameKind::Table, table)?;

    Ok((schema.map(str::to_string), table.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_and_qualified() {
        assert_eq!(
            parse_schema_table_name("users").unwrap(),
            (None, "users".to_string())
        );
        assert_eq!(
            parse_schema_table_name("public.users").unwrap(),
            (Some("public".to_string()), "users".to_string())
        );
    }

    #[test]
    fn test_parse_accepts_accented_letters() {
        assert!(parse_schema_table_name("údaje").is_ok());
        assert!(parse_schema_table_name("Šablóny").is_ok());
        assert!(parse_schema_table_name("Straße_2").is_ok());
    }

    #[test]
    fn test_parse_rejects_bad_names() {
        for name in [
            "a.b.c",
            ".users",
            "public.",
            "",
            "1users",
            "users;drop",
            "users name",
            "us\"ers",
        ] {
            let err = parse_schema_table_name(name).unwrap_err();
            assert!(err.is_validation(), "{} should be rejected", name);
        }
    }

    #[test]
    fn test_principal_names() {
        assert!(validate_name(NameKind::Principal, "app_user1").is_ok());
        assert!(validate_name(NameKind::Principal, "bob; DROP TABLE x").is_err());
        assert!(validate_name(NameKind::Principal, "").is_err());
    }

    #[test]
    fn test_granted_role_must_start_with_letter() {
        assert!(validate_name(NameKind::GrantedRole, "readers").is_ok());
        assert!(validate_name(NameKind::GrantedRole, "_readers").is_err());
        assert!(validate_name(NameKind::GrantedRole, "9readers").is_err());
    }

    #[test]
    fn test_plain_names_reject_underscore() {
        assert!(validate_name(NameKind::Plain, "alice2").is_ok());
        assert!(validate_name(NameKind::Plain, "alice_2").is_err());
    }
}
