//! Mapping between attribute values and SQLite storage classes.
//!
//! | type      | column    | encoding                     |
//! |-----------|-----------|------------------------------|
//! | integer   | INTEGER   | as is                        |
//! | double    | REAL      | as is                        |
//! | boolean   | INTEGER   | 0 / 1                        |
//! | string    | TEXT      | UTF-8                        |
//! | date      | INTEGER   | nanoseconds since the epoch  |
//! | binary    | BLOB      | as is                        |
//! | uuid      | TEXT      | hyphenated lowercase         |
//!
//! Values SQLite cannot hold exactly are refused: non-finite doubles (NaN
//! binds as NULL) and dates outside the nanosecond range (1677 to 2262).

use chrono::{TimeZone, Utc};
use keep_types::{AttributeType, Value};
use rusqlite::types::{Value as SqlValue, ValueRef};
use uuid::Uuid;

/// Column affinity used for an attribute type.
pub(crate) fn column_type(ty: AttributeType) -> &'static str {
    match ty {
        AttributeType::Integer | AttributeType::Boolean | AttributeType::Date => "INTEGER",
        AttributeType::Double => "REAL",
        AttributeType::String | AttributeType::Uuid => "TEXT",
        AttributeType::Binary => "BLOB",
    }
}

/// Check that `value` survives a trip through the backing file unchanged.
pub(crate) fn storable(value: &Value) -> Result<(), String> {
    match value {
        Value::Double(v) if !v.is_finite() => {
            Err(format!("non-finite double {v} cannot be stored"))
        }
        Value::Date(v) if v.timestamp_nanos_opt().is_none() => {
            Err(format!("date {v} is outside the storable range"))
        }
        _ => Ok(()),
    }
}

pub(crate) fn to_sql(value: &Value) -> Result<SqlValue, String> {
    storable(value)?;
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Integer(v) => SqlValue::Integer(*v),
        Value::Double(v) => SqlValue::Real(*v),
        Value::Boolean(v) => SqlValue::Integer(i64::from(*v)),
        Value::String(v) => SqlValue::Text(v.clone()),
        Value::Date(v) => SqlValue::Integer(
            v.timestamp_nanos_opt()
                .ok_or_else(|| format!("date {v} is outside the storable range"))?,
        ),
        Value::Binary(v) => SqlValue::Blob(v.clone()),
        Value::Uuid(v) => SqlValue::Text(v.hyphenated().to_string()),
    })
}

/// Decode a stored column as `ty`. Errors describe the mismatch.
pub(crate) fn from_sql(ty: AttributeType, raw: ValueRef<'_>) -> Result<Value, String> {
    let text = |bytes: &[u8]| {
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|e| format!("invalid UTF-8 in {ty} column: {e}"))
    };
    match (ty, raw) {
        (_, ValueRef::Null) => Ok(Value::Null),
        (AttributeType::Integer, ValueRef::Integer(v)) => Ok(Value::Integer(v)),
        (AttributeType::Double, ValueRef::Real(v)) => Ok(Value::Double(v)),
        (AttributeType::Double, ValueRef::Integer(v)) => Ok(Value::Double(v as f64)),
        (AttributeType::Boolean, ValueRef::Integer(v)) => Ok(Value::Boolean(v != 0)),
        (AttributeType::String, ValueRef::Text(v)) => text(v).map(Value::String),
        (AttributeType::Date, ValueRef::Integer(ns)) => Ok(Value::Date(Utc.timestamp_nanos(ns))),
        (AttributeType::Binary, ValueRef::Blob(v)) => Ok(Value::Binary(v.to_vec())),
        (AttributeType::Uuid, ValueRef::Text(v)) => {
            let s = text(v)?;
            Uuid::parse_str(&s)
                .map(Value::Uuid)
                .map_err(|e| format!("invalid uuid {s:?}: {e}"))
        }
        (_, other) => Err(format!(
            "{ty} column holds a {} value",
            other.data_type()
        )),
    }
}
