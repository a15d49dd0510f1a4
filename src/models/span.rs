//! Span and trace model
//!
//! Spans arrive from the tracing system's write path and are never mutated
//! afterwards. A [`Trace`] only exists as a read-time aggregate.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Tag key carrying the span kind
pub const SPAN_KIND_TAG: &str = "span.kind";

/// Identifier text that is not valid hex of the expected width
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {kind} id: {value:?}")]
pub struct ParseIdError {
    pub kind: &'static str,
    pub value: String,
}

/// 128-bit trace identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TraceId {
    pub high: u64,
    pub low: u64,
}

impl TraceId {
    pub fn new(high: u64, low: u64) -> Self {
        Self { high, low }
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.high == 0 {
            write!(f, "{:016x}", self.low)
        } else {
            write!(f, "{:016x}{:016x}", self.high, self.low)
        }
    }
}

impl FromStr for TraceId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseIdError {
            kind: "trace",
            value: s.to_string(),
        };
        if s.is_empty() || s.len() > 32 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(err());
        }

        let split = s.len().saturating_sub(16);
        let high = if split > 0 {
            u64::from_str_radix(&s[..split], 16).map_err(|_| err())?
        } else {
            0
        };
        let low = u64::from_str_radix(&s[split..], 16).map_err(|_| err())?;

        Ok(Self { high, low })
    }
}

impl Serialize for TraceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// 64-bit span identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SpanId(pub u64);

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for SpanId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.len() > 16 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ParseIdError {
                kind: "span",
                value: s.to_string(),
            });
        }
        u64::from_str_radix(s, 16).map(SpanId).map_err(|_| ParseIdError {
            kind: "span",
            value: s.to_string(),
        })
    }
}

impl Serialize for SpanId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Typed tag value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum TagValue {
    String(String),
    Bool(bool),
    Int64(i64),
    Float64(#[serde(serialize_with = "serialize_float")] f64),
    Binary(#[serde(serialize_with = "serialize_base64")] Vec<u8>),
}

/// Key/value pair used for span tags, process tags and log fields
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyValue {
    pub key: String,
    #[serde(flatten)]
    pub value: TagValue,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: TagValue) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    pub fn string(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(key, TagValue::String(value.into()))
    }

    pub fn bool(key: impl Into<String>, value: bool) -> Self {
        Self::new(key, TagValue::Bool(value))
    }

    pub fn int64(key: impl Into<String>, value: i64) -> Self {
        Self::new(key, TagValue::Int64(value))
    }

    pub fn float64(key: impl Into<String>, value: f64) -> Self {
        Self::new(key, TagValue::Float64(value))
    }

    pub fn binary(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self::new(key, TagValue::Binary(value.into()))
    }
}

/// The emitting process
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Process {
    pub service_name: String,
    pub tags: Vec<KeyValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefType {
    ChildOf,
    FollowsFrom,
}

/// Causal link to another span
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanRef {
    pub ref_type: RefType,
    pub trace_id: TraceId,
    pub span_id: SpanId,
}

/// Timestamped event recorded on a span
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Log {
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub fields: Vec<KeyValue>,
}

/// A single timed unit of work
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Span {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub operation_name: String,
    pub references: Vec<SpanRef>,
    pub flags: u32,
    #[serde(serialize_with = "serialize_timestamp")]
    pub start_time: DateTime<Utc>,
    #[serde(serialize_with = "serialize_duration_nanos")]
    pub duration: Duration,
    pub tags: Vec<KeyValue>,
    pub logs: Vec<Log>,
    pub process: Process,
    pub warnings: Vec<String>,
}

impl Span {
    /// Create a span with no tags, logs or references
    pub fn new(
        trace_id: TraceId,
        span_id: SpanId,
        operation_name: impl Into<String>,
        service_name: impl Into<String>,
        start_time: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            trace_id,
            span_id,
            operation_name: operation_name.into(),
            references: Vec::new(),
            flags: 0,
            start_time,
            duration,
            tags: Vec::new(),
            logs: Vec::new(),
            process: Process {
                service_name: service_name.into(),
                tags: Vec::new(),
            },
            warnings: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_tag(mut self, tag: KeyValue) -> Self {
        self.tags.push(tag);
        self
    }

    #[must_use]
    pub fn with_process_tag(mut self, tag: KeyValue) -> Self {
        self.process.tags.push(tag);
        self
    }

    #[must_use]
    pub fn with_reference(mut self, reference: SpanRef) -> Self {
        self.references.push(reference);
        self
    }
}

/// All spans sharing one trace identifier
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    pub trace_id: TraceId,
    pub spans: Vec<Span>,
}

/// Render a timestamp so that text order equals time order
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Saturating conversion to integer nanoseconds
pub fn duration_nanos(duration: &Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

fn serialize_timestamp<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_timestamp(ts))
}

fn serialize_duration_nanos<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration_nanos(d))
}

/// Text form of a float JSON cannot carry as a number
pub fn non_finite_text(value: f64) -> Option<&'static str> {
    if value.is_nan() {
        Some("NaN")
    } else if value == f64::INFINITY {
        Some("+Inf")
    } else if value == f64::NEG_INFINITY {
        Some("-Inf")
    } else {
        None
    }
}

fn serialize_float<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    match non_finite_text(*value) {
        Some(text) => serializer.serialize_str(text),
        None => serializer.serialize_f64(*value),
    }
}

fn serialize_base64<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&BASE64.encode(bytes))
}
