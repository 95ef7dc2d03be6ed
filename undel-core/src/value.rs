/*!
Scalar field values and their portable (snapshot) encoding.
*/

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde_json::Value;

use crate::registry::FieldKind;
use crate::{Result, UndoError};

/// Date format used in snapshots.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// A typed field value as the host entity model holds it.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    /// Arbitrary-precision decimal kept in its canonical string form
    Decimal(String),
    Json(Value),
}

impl ScalarValue {
    /// Build a decimal value, rejecting strings that are not plain decimal numbers.
    ///
    /// # Example
    /// ```rust
    /// use undel_core::ScalarValue;
    ///
    /// assert!(ScalarValue::decimal("12.50").is_ok());
    /// assert!(ScalarValue::decimal("12,50").is_err());
    /// ```
    pub fn decimal<S: Into<String>>(value: S) -> Result<Self> {
        let value = value.into();
        if is_decimal_literal(&value) {
            Ok(Self::Decimal(value))
        } else {
            Err(UndoError::invalid_format(format!(
                "'{value}' is not a decimal number"
            )))
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) | Self::Decimal(v) => Some(v),
            _ => None,
        }
    }

    /// Normalize into the portable form stored in snapshots.
    ///
    /// Timestamps become RFC 3339 UTC strings with microseconds, dates become
    /// `YYYY-MM-DD`, decimals become their string form. Everything else passes
    /// through unchanged.
    pub fn to_portable(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Boolean(v) => Value::Bool(*v),
            Self::Integer(v) => Value::from(*v),
            Self::Float(v) => serde_json::Number::from_f64(*v)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::Text(v) | Self::Decimal(v) => Value::String(v.clone()),
            Self::Timestamp(v) => Value::String(v.to_rfc3339_opts(SecondsFormat::Micros, true)),
            Self::Date(v) => Value::String(v.format(DATE_FORMAT).to_string()),
            Self::Json(v) => v.clone(),
        }
    }

    /// Decode a portable value according to the field kind it is restored into.
    ///
    /// # Errors
    /// * `UndoError::InvalidFormat` - If the value cannot represent the kind
    pub fn from_portable(kind: &FieldKind, value: &Value) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::Null);
        }

        let decoded = match kind {
            FieldKind::Boolean => value.as_bool().map(Self::Boolean),
            FieldKind::Integer | FieldKind::Reference(_) => value.as_i64().map(Self::Integer),
            FieldKind::Float => value.as_f64().map(Self::Float),
            FieldKind::Text => value.as_str().map(|s| Self::Text(s.to_string())),
            FieldKind::Timestamp => value
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|ts| Self::Timestamp(ts.with_timezone(&Utc))),
            FieldKind::Date => value
                .as_str()
                .and_then(|s| NaiveDate::parse_from_str(s, DATE_FORMAT).ok())
                .map(Self::Date),
            FieldKind::Decimal => match value {
                Value::String(s) if is_decimal_literal(s) => Some(Self::Decimal(s.clone())),
                Value::Number(n) => Some(Self::Decimal(n.to_string())),
                _ => None,
            },
            FieldKind::Json => Some(Self::Json(value.clone())),
        };

        decoded.ok_or_else(|| {
            UndoError::invalid_format(format!("value {value} is not a valid {kind}"))
        })
    }
}

fn is_decimal_literal(value: &str) -> bool {
    let digits = value.strip_prefix('-').unwrap_or(value);
    let mut parts = digits.splitn(2, '.');
    let whole = parts.next().unwrap_or_default();
    let fraction = parts.next();

    !whole.is_empty()
        && whole.chars().all(|c| c.is_ascii_digit())
        && fraction.map_or(true, |f| !f.is_empty() && f.chars().all(|c| c.is_ascii_digit()))
}

impl From<bool> for ScalarValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i64> for ScalarValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for ScalarValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<DateTime<Utc>> for ScalarValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

impl From<NaiveDate> for ScalarValue {
    fn from(value: NaiveDate) -> Self {
        Self::Date(value)
    }
}

impl<T: Into<ScalarValue>> From<Option<T>> for ScalarValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}
