use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TypeError;

/// The semantic type an attribute is declared with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    /// 64-bit signed integer.
    Integer,
    /// 64-bit float.
    Double,
    /// Boolean flag.
    Boolean,
    /// UTF-8 text.
    String,
    /// UTC timestamp with millisecond precision.
    Date,
    /// Opaque bytes.
    Binary,
    /// RFC 4122 UUID.
    Uuid,
}

impl AttributeType {
    /// The value a non-optional attribute receives when nothing better is
    /// known. Dates and UUIDs have no meaningful zero.
    pub fn zero_value(&self) -> Option<Value> {
        match self {
            Self::Integer => Some(Value::Integer(0)),
            Self::Double => Some(Value::Double(0.0)),
            Self::Boolean => Some(Value::Boolean(false)),
            Self::String => Some(Value::String(String::new())),
            Self::Binary => Some(Value::Binary(Vec::new())),
            Self::Date | Self::Uuid => None,
        }
    }

    /// Returns `true` if `value` is a non-null value of this type.
    pub fn accepts(&self, value: &Value) -> bool {
        value.attribute_type() == Some(*self)
    }

    /// Parse a textual literal into a value of this type.
    ///
    /// Binary literals are hex; dates are RFC 3339.
    pub fn parse_literal(&self, text: &str) -> Result<Value, TypeError> {
        let fail = || TypeError::Conversion {
            value: text.to_string(),
            expected: self.to_string(),
        };
        match self {
            Self::Integer => text.parse().map(Value::Integer).map_err(|_| fail()),
            Self::Double => text.parse().map(Value::Double).map_err(|_| fail()),
            Self::Boolean => match text {
                "true" => Ok(Value::Boolean(true)),
                "false" => Ok(Value::Boolean(false)),
                _ => Err(fail()),
            },
            Self::String => Ok(Value::String(text.to_string())),
            Self::Date => DateTime::parse_from_rfc3339(text)
                .map(|dt| Value::Date(dt.with_timezone(&Utc)))
                .map_err(|_| fail()),
            Self::Binary => hex::decode(text).map(Value::Binary).map_err(|_| fail()),
            Self::Uuid => Uuid::parse_str(text).map(Value::Uuid).map_err(|_| fail()),
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer => write!(f, "integer"),
            Self::Double => write!(f, "double"),
            Self::Boolean => write!(f, "boolean"),
            Self::String => write!(f, "string"),
            Self::Date => write!(f, "date"),
            Self::Binary => write!(f, "binary"),
            Self::Uuid => write!(f, "uuid"),
        }
    }
}

/// A single attribute value held by an entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Double(f64),
    Boolean(bool),
    String(String),
    Date(DateTime<Utc>),
    Binary(Vec<u8>),
    Uuid(Uuid),
}

impl Value {
    /// Returns `true` for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The type of this value, or `None` for null.
    pub fn attribute_type(&self) -> Option<AttributeType> {
        match self {
            Self::Null => None,
            Self::Integer(_) => Some(AttributeType::Integer),
            Self::Double(_) => Some(AttributeType::Double),
            Self::Boolean(_) => Some(AttributeType::Boolean),
            Self::String(_) => Some(AttributeType::String),
            Self::Date(_) => Some(AttributeType::Date),
            Self::Binary(_) => Some(AttributeType::Binary),
            Self::Uuid(_) => Some(AttributeType::Uuid),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
            Self::Date(v) => write!(f, "{}", v.to_rfc3339()),
            Self::Binary(v) => write!(f, "0x{}", hex::encode(v)),
            Self::Uuid(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Integer(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Binary(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Date(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Self::Uuid(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn zero_values_match_their_type() {
        for ty in [
            AttributeType::Integer,
            AttributeType::Double,
            AttributeType::Boolean,
            AttributeType::String,
            AttributeType::Binary,
        ] {
            let zero = ty.zero_value().expect("scalar types have a zero");
            assert!(ty.accepts(&zero), "{ty} zero has wrong type");
        }
        assert!(AttributeType::Date.zero_value().is_none());
        assert!(AttributeType::Uuid.zero_value().is_none());
    }

    #[test]
    fn null_is_accepted_by_no_type() {
        assert!(!AttributeType::String.accepts(&Value::Null));
        assert_eq!(Value::Null.attribute_type(), None);
    }

    #[test]
    fn parse_literal_by_type() {
        assert_eq!(
            AttributeType::Integer.parse_literal("-12").unwrap(),
            Value::Integer(-12)
        );
        assert_eq!(
            AttributeType::Boolean.parse_literal("true").unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            AttributeType::Binary.parse_literal("cafe").unwrap(),
            Value::Binary(vec![0xca, 0xfe])
        );
        let date = AttributeType::Date
            .parse_literal("2024-01-02T03:04:05Z")
            .unwrap();
        assert!(matches!(date, Value::Date(_)));
    }

    #[test]
    fn parse_literal_reports_expected_type() {
        let err = AttributeType::Boolean.parse_literal("yes").unwrap_err();
        assert_eq!(
            err,
            TypeError::Conversion {
                value: "yes".into(),
                expected: "boolean".into()
            }
        );
    }

    #[test]
    fn option_converts_to_null() {
        let none: Option<i64> = None;
        assert_eq!(Value::from(none), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::String("x".into()));
    }

    #[test]
    fn attribute_type_serializes_lowercase() {
        let json = serde_json::to_string(&AttributeType::Uuid).unwrap();
        assert_eq!(json, "\"uuid\"");
    }

    proptest! {
        #[test]
        fn integer_literals_parse_to_themselves(n in any::<i64>()) {
            prop_assert_eq!(
                AttributeType::Integer.parse_literal(&n.to_string()).unwrap(),
                Value::Integer(n)
            );
        }
    }
}
