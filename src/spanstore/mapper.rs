//! Span to document mapping
//!
//! Each span becomes two documents: the span itself, optionally carrying a
//! flattened `kv` map of every tag as text, and an operation summary keyed by
//! `service:operation`. Search requests only ever carry string tag values, so
//! indexing the text form of each tag keeps equality search cheap.

use crate::error::MappingError;
use crate::models::span::non_finite_text;
use crate::models::{Span, TagValue, SPAN_KIND_TAG};
use crate::store::Document;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Span kind recorded when a span carries no `span.kind` tag
pub const UNSPECIFIED_KIND: &str = "unspecified";

/// Field holding the flattened tag map
pub const KV_FIELD: &str = "kv";

/// Documents derived from one span
#[derive(Debug, Clone)]
pub struct MappedSpan {
    pub span: Document,
    pub operation: Document,
}

#[derive(Serialize)]
struct OperationDocument<'a> {
    #[serde(rename = "_id")]
    id: String,
    service: &'a str,
    operation: &'a str,
    span_kind: String,
}

/// Map a span to its span document and operation summary
pub fn map_span(span: &Span, flatten: bool) -> Result<MappedSpan, MappingError> {
    let mut document = to_document(span)?;
    if flatten {
        let kv = flatten_tags(span)
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        document.insert(KV_FIELD.to_string(), Value::Object(kv));
    }

    let service = span.process.service_name.as_str();
    let operation = to_document(&OperationDocument {
        id: operation_id(service, &span.operation_name),
        service,
        operation: &span.operation_name,
        span_kind: span_kind(span),
    })?;

    Ok(MappedSpan {
        span: document,
        operation,
    })
}

/// Deterministic operation summary key
pub fn operation_id(service: &str, operation: &str) -> String {
    format!("{}:{}", service, operation)
}

/// Span tags then process tags; a process tag replaces a span tag with the same key
pub fn flatten_tags(span: &Span) -> BTreeMap<String, String> {
    span.tags
        .iter()
        .chain(span.process.tags.iter())
        .map(|tag| (tag.key.clone(), canonical_value(&tag.value)))
        .collect()
}

/// Value of the last `span.kind` tag, or `unspecified`
pub fn span_kind(span: &Span) -> String {
    span.tags
        .iter()
        .rev()
        .find(|tag| tag.key == SPAN_KIND_TAG)
        .map(|tag| canonical_value(&tag.value))
        .unwrap_or_else(|| UNSPECIFIED_KIND.to_string())
}

/// Text form of a tag value
///
/// Floats use the shortest representation that round-trips, without an
/// exponent. Binary values are read as UTF-8, replacing invalid sequences.
pub fn canonical_value(value: &TagValue) -> String {
    match value {
        TagValue::String(s) => s.clone(),
        TagValue::Bool(b) => b.to_string(),
        TagValue::Int64(i) => i.to_string(),
        TagValue::Float64(f) => match non_finite_text(*f) {
            Some(text) => text.to_string(),
            None => f.to_string(),
        },
        TagValue::Binary(bytes) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

fn to_document<T: Serialize>(value: &T) -> Result<Document, MappingError> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(MappingError::invalid("document", format!("expected object, got {}", other))),
        Err(e) => Err(MappingError::invalid("document", e.to_string())),
    }
}
