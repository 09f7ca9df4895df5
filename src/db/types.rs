//! Row decoding into JSON records.
//!
//! # Architecture
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Database-specific decoders handle the actual value extraction
//!
//! Temporal values become ISO-8601 strings, DECIMAL/NUMERIC keep their exact
//! textual form and binary columns are base64 encoded.

use crate::sql::Dialect;
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueFormat, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row, Type, TypeInfo};

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    /// Date and time without zone
    Timestamp,
    /// Date and time with zone (PostgreSQL `TIMESTAMPTZ`, MySQL `TIMESTAMP`)
    TimestampTz,
    Date,
    Time,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, dialect: Dialect) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Temporal types first: "interval" and "point" would otherwise match "int"
    match lower.as_str() {
        "timestamptz" => return TypeCategory::TimestampTz,
        "timestamp" if dialect == Dialect::MySql => return TypeCategory::TimestampTz,
        "timestamp" | "datetime" => return TypeCategory::Timestamp,
        "date" => return TypeCategory::Date,
        "time" => return TypeCategory::Time,
        "interval" | "point" | "timetz" => return TypeCategory::Unknown,
        _ => {}
    }

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC is actually a float
        if dialect == Dialect::Sqlite && lower == "numeric" {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    // Integer types
    if lower.contains("int") || lower.contains("serial") || lower.contains("tiny") {
        return TypeCategory::Integer;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    if lower.contains("char") || lower.contains("text") || lower == "name" {
        return TypeCategory::Text;
    }

    TypeCategory::Unknown
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw DECIMAL/NUMERIC values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        match value.format() {
            PgValueFormat::Text => Ok(RawDecimal(value.as_str()?.to_string())),
            PgValueFormat::Binary => pg_numeric_to_string(value.as_bytes()?).map(RawDecimal),
        }
    }
}

/// Render PostgreSQL's binary NUMERIC (base-10000 digit groups) as text.
fn pg_numeric_to_string(bytes: &[u8]) -> Result<String, sqlx::error::BoxDynError> {
    if bytes.len() < 8 {
        return Err("NUMERIC value too short".into());
    }
    let read = |i: usize| i16::from_be_bytes([bytes[i], bytes[i + 1]]);
    let ndigits = read(0).max(0) as usize;
    let weight = read(2) as i32;
    let sign = u16::from_be_bytes([bytes[4], bytes[5]]);
    let dscale = u16::from_be_bytes([bytes[6], bytes[7]]) as usize;

    match sign {
        0xC000 => return Ok("NaN".to_string()),
        0xD000 => return Ok("Infinity".to_string()),
        0xF000 => return Ok("-Infinity".to_string()),
        _ => {}
    }
    if bytes.len() < 8 + ndigits * 2 {
        return Err("NUMERIC value truncated".into());
    }
    // Group j carries weight (weight - j)
    let group = |j: i32| -> i16 {
        if j < 0 || j as usize >= ndigits {
            0
        } else {
            read(8 + 2 * j as usize)
        }
    };

    let mut out = String::new();
    if sign == 0x4000 {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        out.push_str(&group(0).to_string());
        for j in 1..=weight {
            out.push_str(&format!("{:04}", group(j)));
        }
    }
    if dscale > 0 {
        let mut frac = String::with_capacity(dscale + 4);
        let mut j = weight + 1;
        while frac.len() < dscale {
            frac.push_str(&format!("{:04}", group(j)));
            j += 1;
        }
        frac.truncate(dscale);
        out.push('.');
        out.push_str(&frac);
    }
    Ok(out)
}

// =============================================================================
// Value Encoding
// =============================================================================

/// Encode binary data as a base64 JSON string.
pub fn encode_binary_value(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    JsonValue::String(STANDARD.encode(bytes))
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

fn timestamp_value(v: chrono::NaiveDateTime) -> JsonValue {
    JsonValue::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
}

fn timestamptz_value(v: chrono::DateTime<chrono::Utc>) -> JsonValue {
    JsonValue::String(v.to_rfc3339())
}

fn date_value(v: chrono::NaiveDate) -> JsonValue {
    JsonValue::String(v.format("%Y-%m-%d").to_string())
}

fn time_value(v: chrono::NaiveTime) -> JsonValue {
    JsonValue::String(v.format("%H:%M:%S%.f").to_string())
}

// =============================================================================
// Row to JSON Trait
// =============================================================================

/// Trait for converting database rows to JSON records.
pub trait RowToJson {
    fn to_json_map(&self) -> serde_json::Map<String, JsonValue>;
    fn column_names(&self) -> Vec<String>;
}

macro_rules! impl_row_to_json {
    ($row:ty, $dialect:expr, $decoder:path) => {
        impl RowToJson for $row {
            fn to_json_map(&self) -> serde_json::Map<String, JsonValue> {
                self.columns()
                    .iter()
                    .enumerate()
                    .map(|(idx, col)| {
                        let type_name = col.type_info().name();
                        let category = categorize_type(type_name, $dialect);
                        (col.name().to_string(), $decoder(self, idx, category))
                    })
                    .collect()
            }

            fn column_names(&self) -> Vec<String> {
                self.columns()
                    .iter()
                    .map(|col| col.name().to_string())
                    .collect()
            }
        }
    };
}

impl_row_to_json!(MySqlRow, Dialect::MySql, mysql::decode_column);
impl_row_to_json!(PgRow, Dialect::Postgres, postgres::decode_column);
impl_row_to_json!(SqliteRow, Dialect::Sqlite, sqlite::decode_column);

// =============================================================================
// Database-Specific Decoders
// =============================================================================

mod mysql {
    use super::*;

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> JsonValue {
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_binary_col(row, idx),
            TypeCategory::Json => decode_json(row, idx),
            TypeCategory::Timestamp => decode_or_null::<chrono::NaiveDateTime>(row, idx)
                .map(timestamp_value)
                .unwrap_or(JsonValue::Null),
            TypeCategory::TimestampTz => decode_or_null::<chrono::DateTime<chrono::Utc>>(row, idx)
                .map(timestamptz_value)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Date => decode_or_null::<chrono::NaiveDate>(row, idx)
                .map(date_value)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Time => decode_or_null::<chrono::NaiveTime>(row, idx)
                .map(time_value)
                .unwrap_or(JsonValue::Null),
            _ => decode_text(row, idx),
        }
    }

    fn decode_or_null<'r, T>(row: &'r MySqlRow, idx: usize) -> Option<T>
    where
        T: Decode<'r, sqlx::MySql> + Type<sqlx::MySql>,
    {
        row.try_get::<Option<T>, _>(idx).ok().flatten()
    }

    fn decode_decimal(row: &MySqlRow, idx: usize) -> JsonValue {
        match row.try_get::<Option<RawDecimal>, _>(idx) {
            Ok(Some(v)) => JsonValue::String(v.0),
            Ok(None) => JsonValue::Null,
            Err(e) => {
                tracing::error!("Failed to decode DECIMAL: {:?}", e);
                JsonValue::Null
            }
        }
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i8>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        // Unsigned columns reject signed decodes
        if let Ok(Some(v)) = row.try_get::<Option<u64>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<u32>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<u16>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<u8>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        JsonValue::Null
    }

    fn decode_boolean(row: &MySqlRow, idx: usize) -> JsonValue {
        decode_or_null::<bool>(row, idx)
            .map(JsonValue::Bool)
            .unwrap_or(JsonValue::Null)
    }

    fn decode_float(row: &MySqlRow, idx: usize) -> JsonValue {
        if let Some(v) = decode_or_null::<f64>(row, idx) {
            return float_value(v);
        }
        decode_or_null::<f32>(row, idx)
            .map(|v| float_value(v as f64))
            .unwrap_or(JsonValue::Null)
    }

    fn decode_binary_col(row: &MySqlRow, idx: usize) -> JsonValue {
        decode_or_null::<Vec<u8>>(row, idx)
            .map(|v| encode_binary_value(&v))
            .unwrap_or(JsonValue::Null)
    }

    fn decode_json(row: &MySqlRow, idx: usize) -> JsonValue {
        decode_or_null::<JsonValue>(row, idx).unwrap_or(JsonValue::Null)
    }

    fn decode_text(row: &MySqlRow, idx: usize) -> JsonValue {
        decode_or_null::<String>(row, idx)
            .map(JsonValue::String)
            .unwrap_or(JsonValue::Null)
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> JsonValue {
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_or_null::<bool>(row, idx)
                .map(JsonValue::Bool)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_or_null::<Vec<u8>>(row, idx)
                .map(|v| encode_binary_value(&v))
                .unwrap_or(JsonValue::Null),
            TypeCategory::Json => decode_or_null::<JsonValue>(row, idx).unwrap_or(JsonValue::Null),
            TypeCategory::Uuid => decode_or_null::<uuid::Uuid>(row, idx)
                .map(|v| JsonValue::String(v.to_string()))
                .unwrap_or(JsonValue::Null),
            TypeCategory::Timestamp => decode_or_null::<chrono::NaiveDateTime>(row, idx)
                .map(timestamp_value)
                .unwrap_or(JsonValue::Null),
            TypeCategory::TimestampTz => decode_or_null::<chrono::DateTime<chrono::Utc>>(row, idx)
                .map(timestamptz_value)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Date => decode_or_null::<chrono::NaiveDate>(row, idx)
                .map(date_value)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Time => decode_or_null::<chrono::NaiveTime>(row, idx)
                .map(time_value)
                .unwrap_or(JsonValue::Null),
            _ => decode_or_null::<String>(row, idx)
                .map(JsonValue::String)
                .unwrap_or(JsonValue::Null),
        }
    }

    fn decode_or_null<'r, T>(row: &'r PgRow, idx: usize) -> Option<T>
    where
        T: Decode<'r, sqlx::Postgres> + Type<sqlx::Postgres>,
    {
        row.try_get::<Option<T>, _>(idx).ok().flatten()
    }

    fn decode_decimal(row: &PgRow, idx: usize) -> JsonValue {
        match row.try_get::<Option<RawDecimal>, _>(idx) {
            Ok(Some(v)) => JsonValue::String(v.0),
            Ok(None) => JsonValue::Null,
            Err(e) => {
                tracing::error!("Failed to decode NUMERIC: {:?}", e);
                JsonValue::Null
            }
        }
    }

    fn decode_integer(row: &PgRow, idx: usize) -> JsonValue {
        if let Some(v) = decode_or_null::<i64>(row, idx) {
            return JsonValue::Number(v.into());
        }
        if let Some(v) = decode_or_null::<i32>(row, idx) {
            return JsonValue::Number(v.into());
        }
        decode_or_null::<i16>(row, idx)
            .map(|v| JsonValue::Number(v.into()))
            .unwrap_or(JsonValue::Null)
    }

    fn decode_float(row: &PgRow, idx: usize) -> JsonValue {
        if let Some(v) = decode_or_null::<f64>(row, idx) {
            return float_value(v);
        }
        decode_or_null::<f32>(row, idx)
            .map(|v| float_value(v as f64))
            .unwrap_or(JsonValue::Null)
    }
}

mod sqlite {
    use super::*;
    use sqlx::ValueRef;

    /// SQLite values are dynamically typed, so anything but booleans is decoded
    /// by the storage class of the value itself.
    pub fn decode_column(row: &SqliteRow, idx: usize, category: TypeCategory) -> JsonValue {
        let Ok(raw) = row.try_get_raw(idx) else {
            return JsonValue::Null;
        };
        if raw.is_null() {
            return JsonValue::Null;
        }
        let storage = raw.type_info().name().to_ascii_uppercase();

        match (category, storage.as_str()) {
            (TypeCategory::Boolean, "INTEGER" | "BOOLEAN") => row
                .try_get_unchecked::<bool, _>(idx)
                .map(JsonValue::Bool)
                .unwrap_or(JsonValue::Null),
            (_, "INTEGER" | "BOOLEAN") => row
                .try_get_unchecked::<i64, _>(idx)
                .map(|v| JsonValue::Number(v.into()))
                .unwrap_or(JsonValue::Null),
            (_, "REAL" | "NUMERIC") => row
                .try_get_unchecked::<f64, _>(idx)
                .map(float_value)
                .unwrap_or(JsonValue::Null),
            (_, "BLOB") => row
                .try_get_unchecked::<Vec<u8>, _>(idx)
                .map(|v| encode_binary_value(&v))
                .unwrap_or(JsonValue::Null),
            (TypeCategory::Json, _) => decode_text(row, idx)
                .and_then(|s| serde_json::from_str::<JsonValue>(&s).ok())
                .unwrap_or(JsonValue::Null),
            _ => decode_text(row, idx)
                .map(JsonValue::String)
                .unwrap_or(JsonValue::Null),
        }
    }

    fn decode_text(row: &SqliteRow, idx: usize) -> Option<String> {
        row.try_get_unchecked::<String, _>(idx).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_type_integer() {
        assert_eq!(
            categorize_type("INT", Dialect::MySql),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("BIGINT", Dialect::Postgres),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("SERIAL", Dialect::Postgres),
            TypeCategory::Integer
        );
    }

    #[test]
    fn test_categorize_type_not_confused_by_int_substring() {
        assert_eq!(
            categorize_type("INTERVAL", Dialect::Postgres),
            TypeCategory::Unknown
        );
        assert_eq!(
            categorize_type("POINT", Dialect::Postgres),
            TypeCategory::Unknown
        );
    }

    #[test]
    fn test_categorize_type_decimal() {
        assert_eq!(
            categorize_type("DECIMAL", Dialect::MySql),
            TypeCategory::Decimal
        );
        assert_eq!(
            categorize_type("NUMERIC", Dialect::Postgres),
            TypeCategory::Decimal
        );
        // SQLite NUMERIC is a float
        assert_eq!(
            categorize_type("numeric", Dialect::Sqlite),
            TypeCategory::Float
        );
    }

    #[test]
    fn test_categorize_type_temporal() {
        assert_eq!(
            categorize_type("TIMESTAMPTZ", Dialect::Postgres),
            TypeCategory::TimestampTz
        );
        assert_eq!(
            categorize_type("TIMESTAMP", Dialect::Postgres),
            TypeCategory::Timestamp
        );
        assert_eq!(
            categorize_type("TIMESTAMP", Dialect::MySql),
            TypeCategory::TimestampTz
        );
        assert_eq!(
            categorize_type("DATETIME", Dialect::MySql),
            TypeCategory::Timestamp
        );
        assert_eq!(categorize_type("DATE", Dialect::Postgres), TypeCategory::Date);
    }

    #[test]
    fn test_categorize_type_json_and_text() {
        assert_eq!(
            categorize_type("jsonb", Dialect::Postgres),
            TypeCategory::Json
        );
        assert_eq!(
            categorize_type("VARCHAR", Dialect::MySql),
            TypeCategory::Text
        );
    }

    #[test]
    fn test_temporal_formatting() {
        let ts = chrono::NaiveDate::from_ymd_opt(2024, 3, 1)
            .and_then(|d| d.and_hms_opt(12, 30, 5))
            .unwrap();
        assert_eq!(timestamp_value(ts), JsonValue::String("2024-03-01T12:30:05".into()));
        assert_eq!(
            date_value(ts.date()),
            JsonValue::String("2024-03-01".into())
        );
        assert_eq!(
            timestamptz_value(ts.and_utc()),
            JsonValue::String("2024-03-01T12:30:05+00:00".into())
        );
    }

    #[test]
    fn test_encode_binary_value() {
        assert_eq!(
            encode_binary_value(b"hello world"),
            JsonValue::String("aGVsbG8gd29ybGQ=".to_string())
        );
        assert_eq!(
            encode_binary_value(&[0xFF, 0xFE, 0x00, 0x01]),
            JsonValue::String("//4AAQ==".to_string())
        );
    }

    fn numeric_bytes(ndigits: i16, weight: i16, sign: u16, dscale: u16, digits: &[i16]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&ndigits.to_be_bytes());
        out.extend_from_slice(&weight.to_be_bytes());
        out.extend_from_slice(&sign.to_be_bytes());
        out.extend_from_slice(&dscale.to_be_bytes());
        for d in digits {
            out.extend_from_slice(&d.to_be_bytes());
        }
        out
    }

    #[test]
    fn test_pg_numeric_binary_rendering() {
        // 12345.678
        let bytes = numeric_bytes(3, 1, 0, 3, &[1, 2345, 6780]);
        assert_eq!(pg_numeric_to_string(&bytes).unwrap(), "12345.678");
        // -0.00001234
        let bytes = numeric_bytes(1, -2, 0x4000, 8, &[1234]);
        assert_eq!(pg_numeric_to_string(&bytes).unwrap(), "-0.00001234");
        // 0
        let bytes = numeric_bytes(0, 0, 0, 0, &[]);
        assert_eq!(pg_numeric_to_string(&bytes).unwrap(), "0");
        // 20000 (trailing zero groups are omitted on the wire)
        let bytes = numeric_bytes(1, 1, 0, 0, &[2]);
        assert_eq!(pg_numeric_to_string(&bytes).unwrap(), "20000");
        assert!(pg_numeric_to_string(&[0, 1]).is_err());
    }

    #[test]
    fn test_non_finite_float_becomes_string() {
        assert_eq!(float_value(f64::NAN), JsonValue::String("NaN".to_string()));
        assert_eq!(float_value(1.5), serde_json::json!(1.5));
    }
}
