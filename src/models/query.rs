//! Read-side parameter and result types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Parameters for trace search
///
/// `start_time_min` is mandatory; searches without it are rejected before
/// any query runs. Duration bounds only apply when strictly positive and a
/// `num_traces` of zero means no limit.
#[derive(Debug, Clone, Default)]
pub struct TraceQueryParameters {
    pub service_name: Option<String>,
    pub operation_name: Option<String>,
    /// Tag equality filters, matched against the flattened tag map
    pub tags: BTreeMap<String, String>,
    pub start_time_min: Option<DateTime<Utc>>,
    pub start_time_max: Option<DateTime<Utc>>,
    pub duration_min: Duration,
    pub duration_max: Duration,
    pub num_traces: usize,
}

impl TraceQueryParameters {
    /// Search everything that started at or after `since`
    pub fn since(since: DateTime<Utc>) -> Self {
        Self {
            start_time_min: Some(since),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service_name = Some(service.into());
        self
    }

    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation_name = Some(operation.into());
        self
    }

    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_start_time_max(mut self, until: DateTime<Utc>) -> Self {
        self.start_time_max = Some(until);
        self
    }

    #[must_use]
    pub fn with_duration_range(mut self, min: Duration, max: Duration) -> Self {
        self.duration_min = min;
        self.duration_max = max;
        self
    }

    #[must_use]
    pub fn with_limit(mut self, num_traces: usize) -> Self {
        self.num_traces = num_traces;
        self
    }
}

/// Parameters for listing operations of a service
///
/// An empty `span_kind` matches every kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationQuery {
    pub service_name: String,
    pub span_kind: String,
}

impl OperationQuery {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            span_kind: String::new(),
        }
    }

    #[must_use]
    pub fn with_span_kind(mut self, span_kind: impl Into<String>) -> Self {
        self.span_kind = span_kind.into();
        self
    }
}

/// A distinct (operation, span kind) pair observed for a service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Operation {
    pub name: String,
    pub span_kind: String,
}

impl Operation {
    pub fn new(name: impl Into<String>, span_kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            span_kind: span_kind.into(),
        }
    }
}
