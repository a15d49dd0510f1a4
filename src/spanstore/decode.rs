//! Field-by-field decoding of stored span documents
//!
//! Required fields that are missing, null or of the wrong type are rejected.
//! Optional collections default to empty when absent but are still rejected
//! when present with the wrong shape. Unknown fields are ignored.

use crate::error::MappingError;
use crate::models::{KeyValue, Log, Process, RefType, Span, SpanRef, TagValue};
use crate::store::Document;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::time::Duration;

/// Decode one row of the spans collection
pub fn decode_span(row: &Document) -> Result<Span, MappingError> {
    let process = required(row, "process", "process")?
        .as_object()
        .ok_or_else(|| MappingError::invalid("process", "expected object"))?;

    Ok(Span {
        trace_id: parse_field(row, "trace_id", "trace_id")?,
        span_id: parse_field(row, "span_id", "span_id")?,
        operation_name: required_str(row, "operation_name", "operation_name")?.to_string(),
        references: optional_array(row, "references", "references")?
            .iter()
            .enumerate()
            .map(|(i, v)| decode_reference(v, &format!("references[{}]", i)))
            .collect::<Result<_, _>>()?,
        flags: decode_flags(row)?,
        start_time: decode_timestamp(required_str(row, "start_time", "start_time")?, "start_time")?,
        duration: decode_duration(row)?,
        tags: decode_key_values(row, "tags", "tags")?,
        logs: optional_array(row, "logs", "logs")?
            .iter()
            .enumerate()
            .map(|(i, v)| decode_log(v, &format!("logs[{}]", i)))
            .collect::<Result<_, _>>()?,
        process: Process {
            service_name: required_str(process, "service_name", "process.service_name")?.to_string(),
            tags: decode_key_values(process, "tags", "process.tags")?,
        },
        warnings: optional_array(row, "warnings", "warnings")?
            .iter()
            .enumerate()
            .map(|(i, v)| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| MappingError::invalid(format!("warnings[{}]", i), "expected string"))
            })
            .collect::<Result<_, _>>()?,
    })
}

fn required<'a>(object: &'a Map<String, Value>, field: &str, path: &str) -> Result<&'a Value, MappingError> {
    match object.get(field) {
        None | Some(Value::Null) => Err(MappingError::MissingField(path.to_string())),
        Some(value) => Ok(value),
    }
}

fn required_str<'a>(object: &'a Map<String, Value>, field: &str, path: &str) -> Result<&'a str, MappingError> {
    required(object, field, path)?
        .as_str()
        .ok_or_else(|| MappingError::invalid(path, "expected string"))
}

fn parse_field<T>(object: &Map<String, Value>, field: &str, path: &str) -> Result<T, MappingError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    required_str(object, field, path)?
        .parse()
        .map_err(|e: T::Err| MappingError::invalid(path, e.to_string()))
}

fn optional_array<'a>(
    object: &'a Map<String, Value>,
    field: &str,
    path: &str,
) -> Result<&'a [Value], MappingError> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(&[]),
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(MappingError::invalid(path, "expected array")),
    }
}

fn decode_flags(row: &Document) -> Result<u32, MappingError> {
    match row.get("flags") {
        None | Some(Value::Null) => Ok(0),
        Some(value) => value
            .as_u64()
            .and_then(|f| u32::try_from(f).ok())
            .ok_or_else(|| MappingError::invalid("flags", "expected 32-bit unsigned integer")),
    }
}

fn decode_duration(row: &Document) -> Result<Duration, MappingError> {
    match row.get("duration") {
        None | Some(Value::Null) => Ok(Duration::ZERO),
        Some(value) => value
            .as_u64()
            .map(Duration::from_nanos)
            .ok_or_else(|| MappingError::invalid("duration", "expected nanoseconds")),
    }
}

fn decode_timestamp(text: &str, path: &str) -> Result<DateTime<Utc>, MappingError> {
    DateTime::parse_from_rfc3339(text)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| MappingError::invalid(path, e.to_string()))
}

fn decode_key_values(
    object: &Map<String, Value>,
    field: &str,
    path: &str,
) -> Result<Vec<KeyValue>, MappingError> {
    optional_array(object, field, path)?
        .iter()
        .enumerate()
        .map(|(i, v)| decode_key_value(v, &format!("{}[{}]", path, i)))
        .collect()
}

fn decode_key_value(value: &Value, path: &str) -> Result<KeyValue, MappingError> {
    let object = value
        .as_object()
        .ok_or_else(|| MappingError::invalid(path, "expected object"))?;
    let key = required_str(object, "key", &format!("{}.key", path))?;
    let value_path = format!("{}.value", path);
    let invalid = |expected: &str| MappingError::invalid(value_path.as_str(), format!("expected {}", expected));

    let tag_value = match required_str(object, "type", &format!("{}.type", path))? {
        "string" => TagValue::String(
            required(object, "value", &value_path)?
                .as_str()
                .ok_or_else(|| invalid("string"))?
                .to_string(),
        ),
        "bool" => TagValue::Bool(
            required(object, "value", &value_path)?
                .as_bool()
                .ok_or_else(|| invalid("bool"))?,
        ),
        "int64" => TagValue::Int64(
            required(object, "value", &value_path)?
                .as_i64()
                .ok_or_else(|| invalid("int64"))?,
        ),
        // Non-finite floats are stored as text; older rows may hold null
        "float64" => TagValue::Float64(match object.get("value") {
            None | Some(Value::Null) => f64::NAN,
            Some(Value::String(text)) => match text.as_str() {
                "NaN" => f64::NAN,
                "+Inf" => f64::INFINITY,
                "-Inf" => f64::NEG_INFINITY,
                _ => return Err(invalid("float64")),
            },
            Some(v) => v.as_f64().ok_or_else(|| invalid("float64"))?,
        }),
        "binary" => {
            let encoded = required(object, "value", &value_path)?
                .as_str()
                .ok_or_else(|| invalid("base64 string"))?;
            TagValue::Binary(
                BASE64
                    .decode(encoded)
                    .map_err(|e| MappingError::invalid(value_path.as_str(), e.to_string()))?,
            )
        }
        other => {
            return Err(MappingError::invalid(
                format!("{}.type", path),
                format!("unknown tag type {:?}", other),
            ))
        }
    };

    Ok(KeyValue::new(key, tag_value))
}

fn decode_reference(value: &Value, path: &str) -> Result<SpanRef, MappingError> {
    let object = value
        .as_object()
        .ok_or_else(|| MappingError::invalid(path, "expected object"))?;

    let ref_type_path = format!("{}.ref_type", path);
    let ref_type = match required_str(object, "ref_type", &ref_type_path)? {
        "child_of" => RefType::ChildOf,
        "follows_from" => RefType::FollowsFrom,
        other => {
            return Err(MappingError::invalid(
                ref_type_path,
                format!("unknown reference type {:?}", other),
            ))
        }
    };

    Ok(SpanRef {
        ref_type,
        trace_id: parse_field(object, "trace_id", &format!("{}.trace_id", path))?,
        span_id: parse_field(object, "span_id", &format!("{}.span_id", path))?,
    })
}

fn decode_log(value: &Value, path: &str) -> Result<Log, MappingError> {
    let object = value
        .as_object()
        .ok_or_else(|| MappingError::invalid(path, "expected object"))?;
    let timestamp_path = format!("{}.timestamp", path);

    Ok(Log {
        timestamp: decode_timestamp(required_str(object, "timestamp", &timestamp_path)?, &timestamp_path)?,
        fields: decode_key_values(object, "fields", &format!("{}.fields", path))?,
    })
}
