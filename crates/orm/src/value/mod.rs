//! Dynamic Values
//!
//! The value representation stored in property bags and carried by metadata
//! defaults, together with the declared field types values are coerced to.

pub mod coerce;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use uuid::Uuid;

pub use coerce::coerce;

/// Dynamically typed field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
    Json(JsonValue),
}

/// The kind of value a field holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    /// Untyped: any value is accepted as-is
    Any,
    Bool,
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    Bytes,
    Uuid,
    DateTime,
    Date,
    Time,
    Json,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Any => "any",
            ValueKind::Bool => "bool",
            ValueKind::Int32 => "int32",
            ValueKind::Int64 => "int64",
            ValueKind::Float32 => "float32",
            ValueKind::Float64 => "float64",
            ValueKind::String => "string",
            ValueKind::Bytes => "bytes",
            ValueKind::Uuid => "uuid",
            ValueKind::DateTime => "datetime",
            ValueKind::Date => "date",
            ValueKind::Time => "time",
            ValueKind::Json => "json",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ValueKind::Int32 | ValueKind::Int64 | ValueKind::Float32 | ValueKind::Float64
        )
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared type of a field: a value kind plus nullability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldType {
    pub kind: ValueKind,
    pub nullable: bool,
}

impl FieldType {
    /// Non-nullable field of the given kind
    pub const fn new(kind: ValueKind) -> Self {
        Self {
            kind,
            nullable: false,
        }
    }

    /// Nullable field of the given kind
    pub const fn nullable(kind: ValueKind) -> Self {
        Self {
            kind,
            nullable: true,
        }
    }

    /// Untyped field accepting any value, including null
    pub const fn any() -> Self {
        Self::nullable(ValueKind::Any)
    }

    /// Type inferred for a bag field from the first value written to it.
    /// Inferred fields are nullable; a first write of null leaves the field untyped.
    pub fn infer(value: &Value) -> Self {
        match value.kind() {
            Some(kind) => Self::nullable(kind),
            None => Self::any(),
        }
    }

    /// The zero value of this type: null for nullable types, the kind's default otherwise
    pub fn zero_value(&self) -> Value {
        if self.nullable {
            return Value::Null;
        }

        match self.kind {
            ValueKind::Any => Value::Null,
            ValueKind::Bool => Value::Bool(false),
            ValueKind::Int32 => Value::Int32(0),
            ValueKind::Int64 => Value::Int64(0),
            ValueKind::Float32 => Value::Float32(0.0),
            ValueKind::Float64 => Value::Float64(0.0),
            ValueKind::String => Value::String(String::new()),
            ValueKind::Bytes => Value::Bytes(Vec::new()),
            ValueKind::Uuid => Value::Uuid(Uuid::nil()),
            ValueKind::DateTime => Value::DateTime(DateTime::<Utc>::default()),
            ValueKind::Date => Value::Date(NaiveDate::default()),
            ValueKind::Time => Value::Time(NaiveTime::default()),
            ValueKind::Json => Value::Json(JsonValue::Null),
        }
    }

    /// True when the value can be stored without conversion
    pub fn accepts(&self, value: &Value) -> bool {
        match value.kind() {
            None => self.nullable,
            Some(kind) => self.kind == ValueKind::Any || self.kind == kind,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nullable && self.kind != ValueKind::Any {
            write!(f, "{}?", self.kind)
        } else {
            write!(f, "{}", self.kind)
        }
    }
}

impl Value {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Kind of the value, `None` for null
    pub fn kind(&self) -> Option<ValueKind> {
        let kind = match self {
            Value::Null => return None,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int32(_) => ValueKind::Int32,
            Value::Int64(_) => ValueKind::Int64,
            Value::Float32(_) => ValueKind::Float32,
            Value::Float64(_) => ValueKind::Float64,
            Value::String(_) => ValueKind::String,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::Uuid(_) => ValueKind::Uuid,
            Value::DateTime(_) => ValueKind::DateTime,
            Value::Date(_) => ValueKind::Date,
            Value::Time(_) => ValueKind::Time,
            Value::Json(_) => ValueKind::Json,
        };
        Some(kind)
    }

    /// Name of the value's type, used in error messages
    pub fn type_name(&self) -> &'static str {
        self.kind().map(|k| k.as_str()).unwrap_or("null")
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int32(i) => Some(*i as i64),
            Value::Int64(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int32(i) => Some(*i as f64),
            Value::Int64(i) => Some(*i as f64),
            Value::Float32(f) => Some(*f as f64),
            Value::Float64(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Convert to JSON value
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int32(i) => JsonValue::Number(serde_json::Number::from(*i)),
            Value::Int64(i) => JsonValue::Number(serde_json::Number::from(*i)),
            Value::Float32(f) => serde_json::Number::from_f64(*f as f64)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::Float64(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::String(s) => JsonValue::String(s.clone()),
            Value::Bytes(b) => JsonValue::Array(
                b.iter()
                    .map(|&x| JsonValue::Number(serde_json::Number::from(x)))
                    .collect(),
            ),
            Value::Uuid(u) => JsonValue::String(u.to_string()),
            Value::DateTime(dt) => JsonValue::String(dt.to_rfc3339()),
            Value::Date(d) => JsonValue::String(d.to_string()),
            Value::Time(t) => JsonValue::String(t.to_string()),
            Value::Json(j) => j.clone(),
        }
    }

    /// Create a value from JSON, keeping strings as strings.
    /// Arrays and objects stay JSON.
    pub fn from_json(json: JsonValue) -> Self {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    if i >= i32::MIN as i64 && i <= i32::MAX as i64 {
                        Value::Int32(i as i32)
                    } else {
                        Value::Int64(i)
                    }
                } else if let Some(f) = n.as_f64() {
                    Value::Float64(f)
                } else {
                    Value::Null
                }
            }
            JsonValue::String(s) => Value::String(s),
            other => Value::Json(other),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int32(i) => write!(f, "{}", i),
            Value::Int64(i) => write!(f, "{}", i),
            Value::Float32(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::String(s) => f.write_str(s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Uuid(u) => write!(f, "{}", u),
            Value::DateTime(dt) => f.write_str(&dt.to_rfc3339()),
            Value::Date(d) => write!(f, "{}", d),
            Value::Time(t) => write!(f, "{}", t),
            Value::Json(j) => write!(f, "{}", j),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int32(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int64(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float32(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float64(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl From<Uuid> for Value {
    fn from(value: Uuid) -> Self {
        Value::Uuid(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::DateTime(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Date(value)
    }
}

impl From<NaiveTime> for Value {
    fn from(value: NaiveTime) -> Self {
        Value::Time(value)
    }
}

impl From<JsonValue> for Value {
    fn from(value: JsonValue) -> Self {
        Value::Json(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}
