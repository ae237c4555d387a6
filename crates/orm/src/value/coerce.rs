//! Value Coercion
//!
//! Converts a value to a declared field type. Null maps to the nullable zero
//! value, numerics widen freely and narrow with a range check, strings parse
//! into the target kind, and every scalar renders to a string.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use uuid::Uuid;

use super::{FieldType, Value, ValueKind};
use crate::error::{OrmError, OrmResult};

/// Coerce `value` to `target`, naming `field` in any error
pub fn coerce(field: &str, value: Value, target: &FieldType) -> OrmResult<Value> {
    if target.kind == ValueKind::Any {
        return Ok(value);
    }

    if value.is_null() {
        return if target.nullable {
            Ok(Value::Null)
        } else {
            Err(mismatch(field, &value, target))
        };
    }

    if target.accepts(&value) {
        return Ok(value);
    }

    let converted = match target.kind {
        ValueKind::Any => Some(value.clone()),
        ValueKind::Bool => to_bool(&value),
        ValueKind::Int32 => to_i64(&value).and_then(|i| i32::try_from(i).ok()).map(Value::Int32),
        ValueKind::Int64 => to_i64(&value).map(Value::Int64),
        ValueKind::Float32 => to_f64(&value)
            .filter(|f| !f.is_finite() || f.abs() <= f32::MAX as f64)
            .map(|f| Value::Float32(f as f32)),
        ValueKind::Float64 => to_f64(&value).map(Value::Float64),
        ValueKind::String => to_string(&value).map(Value::String),
        ValueKind::Bytes => match &value {
            Value::Uuid(u) => Some(Value::Bytes(u.as_bytes().to_vec())),
            _ => None,
        },
        ValueKind::Uuid => to_uuid(&value).map(Value::Uuid),
        ValueKind::DateTime => to_datetime(&value).map(Value::DateTime),
        ValueKind::Date => to_date(&value).map(Value::Date),
        ValueKind::Time => to_time(&value).map(Value::Time),
        ValueKind::Json => Some(Value::Json(value.to_json())),
    };

    converted.ok_or_else(|| mismatch(field, &value, target))
}

fn mismatch(field: &str, value: &Value, target: &FieldType) -> OrmError {
    OrmError::type_coercion(field, value.type_name(), target.to_string())
}

/// Scalars wrapped in JSON convert as if they were the plain value
fn unwrap_json(value: &Value) -> Option<Value> {
    match value {
        Value::Json(json) => match Value::from_json(json.clone()) {
            Value::Json(_) => None,
            scalar => Some(scalar),
        },
        _ => None,
    }
}

fn to_bool(value: &Value) -> Option<Value> {
    match value {
        Value::Bool(b) => Some(Value::Bool(*b)),
        Value::Int32(i) => Some(Value::Bool(*i != 0)),
        Value::Int64(i) => Some(Value::Bool(*i != 0)),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" => Some(Value::Bool(true)),
            "false" | "0" => Some(Value::Bool(false)),
            _ => None,
        },
        Value::Json(_) => unwrap_json(value).and_then(|v| to_bool(&v)),
        _ => None,
    }
}

fn to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Bool(b) => Some(*b as i64),
        Value::Int32(i) => Some(*i as i64),
        Value::Int64(i) => Some(*i),
        Value::Float32(f) => float_to_i64(*f as f64),
        Value::Float64(f) => float_to_i64(*f),
        Value::String(s) => {
            let trimmed = s.trim();
            trimmed
                .parse::<i64>()
                .ok()
                .or_else(|| trimmed.parse::<f64>().ok().and_then(float_to_i64))
        }
        Value::Json(_) => unwrap_json(value).and_then(|v| to_i64(&v)),
        _ => None,
    }
}

fn float_to_i64(f: f64) -> Option<i64> {
    if !f.is_finite() {
        return None;
    }
    let rounded = f.round();
    if rounded < i64::MIN as f64 || rounded > i64::MAX as f64 {
        None
    } else {
        Some(rounded as i64)
    }
}

fn to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Json(_) => unwrap_json(value).and_then(|v| to_f64(&v)),
        other => other.as_f64(),
    }
}

fn to_string(value: &Value) -> Option<String> {
    match value {
        Value::Bytes(_) => None,
        Value::Json(serde_json::Value::String(s)) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn to_uuid(value: &Value) -> Option<Uuid> {
    match value {
        Value::Uuid(u) => Some(*u),
        Value::String(s) => Uuid::parse_str(s.trim()).ok(),
        Value::Bytes(b) => Uuid::from_slice(b).ok(),
        Value::Json(_) => unwrap_json(value).and_then(|v| to_uuid(&v)),
        _ => None,
    }
}

fn to_datetime(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::DateTime(dt) => Some(*dt),
        Value::Date(d) => d.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc()),
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Json(_) => unwrap_json(value).and_then(|v| to_datetime(&v)),
        _ => None,
    }
}

fn to_date(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::Date(d) => Some(*d),
        Value::DateTime(dt) => Some(dt.date_naive()),
        Value::String(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .ok()
            .or_else(|| to_datetime(value).map(|dt| dt.date_naive())),
        Value::Json(_) => unwrap_json(value).and_then(|v| to_date(&v)),
        _ => None,
    }
}

fn to_time(value: &Value) -> Option<NaiveTime> {
    match value {
        Value::Time(t) => Some(*t),
        Value::DateTime(dt) => Some(dt.time()),
        Value::String(s) => s.trim().parse::<NaiveTime>().ok(),
        Value::Json(_) => unwrap_json(value).and_then(|v| to_time(&v)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int32() -> FieldType {
        FieldType::new(ValueKind::Int32)
    }

    #[test]
    fn test_null_to_nullable_yields_zero_value() {
        let ty = FieldType::nullable(ValueKind::Int32);
        assert_eq!(coerce("Age", Value::Null, &ty).unwrap(), Value::Null);
    }

    #[test]
    fn test_null_to_non_nullable_fails() {
        match coerce("Age", Value::Null, &int32()) {
            Err(OrmError::TypeCoercion { field, source_type, target_type }) => {
                assert_eq!(field, "Age");
                assert_eq!(source_type, "null");
                assert_eq!(target_type, "int32");
            }
            other => panic!("Expected coercion error, got {:?}", other),
        }
    }

    #[test]
    fn test_numeric_widening_and_narrowing() {
        let int64 = FieldType::new(ValueKind::Int64);
        assert_eq!(coerce("n", Value::Int32(7), &int64).unwrap(), Value::Int64(7));
        assert_eq!(coerce("n", Value::Int64(7), &int32()).unwrap(), Value::Int32(7));
        assert!(coerce("n", Value::Int64(i64::MAX), &int32()).is_err());
        assert_eq!(coerce("n", Value::Float64(2.6), &int32()).unwrap(), Value::Int32(3));

        let float64 = FieldType::new(ValueKind::Float64);
        assert_eq!(coerce("n", Value::Int32(2), &float64).unwrap(), Value::Float64(2.0));
    }

    #[test]
    fn test_string_parsing() {
        assert_eq!(coerce("n", Value::from(" 42 "), &int32()).unwrap(), Value::Int32(42));
        assert!(coerce("n", Value::from("forty-two"), &int32()).is_err());

        let flag = FieldType::new(ValueKind::Bool);
        assert_eq!(coerce("f", Value::from("TRUE"), &flag).unwrap(), Value::Bool(true));

        let id = Uuid::new_v4();
        let uuid_ty = FieldType::new(ValueKind::Uuid);
        assert_eq!(coerce("id", Value::from(id.to_string()), &uuid_ty).unwrap(), Value::Uuid(id));

        let date_ty = FieldType::new(ValueKind::Date);
        let expected = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(coerce("d", Value::from("2024-03-01"), &date_ty).unwrap(), Value::Date(expected));
    }

    #[test]
    fn test_scalars_render_to_string() {
        let text = FieldType::new(ValueKind::String);
        assert_eq!(coerce("s", Value::Int32(5), &text).unwrap(), Value::from("5"));
        assert_eq!(coerce("s", Value::Bool(true), &text).unwrap(), Value::from("true"));
        assert!(coerce("s", Value::Bytes(vec![1, 2]), &text).is_err());
    }

    #[test]
    fn test_json_scalars_unwrap() {
        let json = Value::Json(serde_json::json!(12));
        assert_eq!(coerce("n", json, &int32()).unwrap(), Value::Int32(12));

        let object = Value::Json(serde_json::json!({"a": 1}));
        assert!(coerce("n", object, &int32()).is_err());
    }

    #[test]
    fn test_any_accepts_everything() {
        let value = Value::Bytes(vec![1]);
        assert_eq!(coerce("x", value.clone(), &FieldType::any()).unwrap(), value);
    }
}
