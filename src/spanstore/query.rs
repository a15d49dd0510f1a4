//! Query construction for the read operations
//!
//! Every literal goes through a bound parameter. Clause order is fixed so the
//! same parameters always produce the same query text.

use crate::error::{Error, Result};
use crate::models::span::{duration_nanos, format_timestamp};
use crate::models::{OperationQuery, TraceId, TraceQueryParameters};
use crate::store::{collection_ref, Query, QueryParam};
use std::time::Duration;

const OP_SERVICE: &str = "json_extract(operations.doc, '$.service')";
const OP_OPERATION: &str = "json_extract(operations.doc, '$.operation')";
const OP_SPAN_KIND: &str = "json_extract(operations.doc, '$.span_kind')";

const SPAN_TRACE_ID: &str = "json_extract(spans.doc, '$.trace_id')";
const SPAN_SERVICE: &str = "json_extract(spans.doc, '$.process.service_name')";
const SPAN_OPERATION: &str = "json_extract(spans.doc, '$.operation_name')";
const SPAN_START_TIME: &str = "json_extract(spans.doc, '$.start_time')";
const SPAN_DURATION: &str = "json_extract(spans.doc, '$.duration')";

/// Builds queries against the spans and operations collections
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    spans: String,
    operations: String,
}

impl QueryBuilder {
    pub fn new(workspace: &str, spans: &str, operations: &str) -> Self {
        Self {
            spans: collection_ref(workspace, spans),
            operations: collection_ref(workspace, operations),
        }
    }

    /// Distinct service names, ascending
    pub fn services(&self) -> Query {
        Query::new(format!(
            "SELECT {OP_SERVICE} AS service FROM {} AS operations GROUP BY service ORDER BY service",
            self.operations
        ))
    }

    /// Distinct (operation, kind) pairs of one service, ascending
    ///
    /// An empty span kind matches every kind.
    pub fn operations(&self, params: &OperationQuery) -> Query {
        let mut query = Query::new(format!(
            "SELECT {OP_OPERATION} AS operation, {OP_SPAN_KIND} AS spankind FROM {} AS operations WHERE {OP_SERVICE} = ",
            self.operations
        ));
        query.push_param(params.service_name.as_str());

        if !params.span_kind.is_empty() {
            query
                .push_sql(&format!(" AND {OP_SPAN_KIND} = "))
                .push_param(params.span_kind.as_str());
        }

        query.push_sql(" GROUP BY operation, spankind ORDER BY operation, spankind");
        query
    }

    /// Every span of one trace
    pub fn trace_by_id(&self, trace_id: &TraceId) -> Query {
        let mut query = Query::new(format!(
            "SELECT spans.* FROM {} AS spans WHERE {SPAN_TRACE_ID} = ",
            self.spans
        ));
        query.push_param(trace_id.to_string());
        query
    }

    /// Every span of a set of traces
    pub fn traces_by_ids(&self, trace_ids: &[TraceId]) -> Query {
        let mut query = Query::new(format!(
            "SELECT spans.* FROM {} AS spans WHERE {SPAN_TRACE_ID} IN (",
            self.spans
        ));
        for (i, trace_id) in trace_ids.iter().enumerate() {
            if i > 0 {
                query.push_sql(", ");
            }
            query.push_param(trace_id.to_string());
        }
        query.push_sql(")");
        query
    }

    /// Distinct trace IDs matching a search, newest first
    ///
    /// Fails with [`Error::Input`] when the start-time lower bound is missing.
    pub fn find_trace_ids(&self, params: &TraceQueryParameters) -> Result<Query> {
        let start_time_min = params
            .start_time_min
            .as_ref()
            .ok_or_else(|| Error::Input("start time required".to_string()))?;

        let mut conditions = Conditions::default();

        if let Some(service) = params.service_name.as_deref().filter(|s| !s.is_empty()) {
            conditions.push(format!("{SPAN_SERVICE} = ?"), [service.into()]);
        }
        if let Some(operation) = params.operation_name.as_deref().filter(|s| !s.is_empty()) {
            conditions.push(format!("{SPAN_OPERATION} = ?"), [operation.into()]);
        }

        conditions.push(
            format!("{SPAN_START_TIME} >= ?"),
            [format_timestamp(start_time_min).into()],
        );
        if let Some(start_time_max) = &params.start_time_max {
            conditions.push(
                format!("{SPAN_START_TIME} <= ?"),
                [format_timestamp(start_time_max).into()],
            );
        }

        if params.duration_min > Duration::ZERO {
            conditions.push(
                format!("{SPAN_DURATION} >= ?"),
                [nanos_param(&params.duration_min)],
            );
        }
        if params.duration_max > Duration::ZERO {
            conditions.push(
                format!("{SPAN_DURATION} <= ?"),
                [nanos_param(&params.duration_max)],
            );
        }

        for (key, value) in &params.tags {
            conditions.push(
                "EXISTS (SELECT 1 FROM json_each(spans.doc, '$.kv') AS kv WHERE kv.key = ? AND kv.value = ?)".to_string(),
                [key.as_str().into(), value.as_str().into()],
            );
        }

        let mut query = Query::new(format!(
            "SELECT {SPAN_TRACE_ID} AS trace_id, MIN({SPAN_START_TIME}) AS start_time FROM {} AS spans WHERE {}",
            self.spans,
            conditions.clauses.join(" AND ")
        ));
        query.params = conditions.params;
        query.push_sql(" GROUP BY trace_id ORDER BY start_time DESC, trace_id");

        if params.num_traces > 0 {
            let limit = i64::try_from(params.num_traces).unwrap_or(i64::MAX);
            query.push_sql(" LIMIT ").push_param(limit);
        }

        Ok(query)
    }
}

/// WHERE clauses with their parameters, in clause order
#[derive(Default)]
struct Conditions {
    clauses: Vec<String>,
    params: Vec<QueryParam>,
}

impl Conditions {
    fn push<const N: usize>(&mut self, clause: String, params: [QueryParam; N]) {
        self.clauses.push(clause);
        self.params.extend(params);
    }
}

fn nanos_param(duration: &Duration) -> QueryParam {
    QueryParam::Integer(i64::try_from(duration_nanos(duration)).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn builder() -> QueryBuilder {
        QueryBuilder::new("tracing", "spans", "operations")
    }

    fn text(value: &str) -> QueryParam {
        QueryParam::Text(value.to_string())
    }

    #[test]
    fn test_services_query() {
        let query = builder().services();

        assert_eq!(
            query.sql,
            "SELECT json_extract(operations.doc, '$.service') AS service FROM \"tracing.operations\" AS operations GROUP BY service ORDER BY service"
        );
        assert!(query.params.is_empty());
    }

    #[test]
    fn test_operations_query_matches_all_kinds() {
        let query = builder().operations(&OperationQuery::new("svc"));

        assert!(!query.sql.contains("$.span_kind') = ?"));
        assert!(query.sql.ends_with("GROUP BY operation, spankind ORDER BY operation, spankind"));
        assert_eq!(query.params, vec![text("svc")]);
    }

    #[test]
    fn test_operations_query_with_kind() {
        let query = builder().operations(&OperationQuery::new("svc").with_span_kind("server"));

        assert!(query
            .sql
            .contains("WHERE json_extract(operations.doc, '$.service') = ? AND json_extract(operations.doc, '$.span_kind') = ?"));
        assert_eq!(query.params, vec![text("svc"), text("server")]);
    }

    #[test]
    fn test_trace_queries() {
        let query = builder().trace_by_id(&TraceId::new(0, 0x2a));
        assert_eq!(
            query.sql,
            "SELECT spans.* FROM \"tracing.spans\" AS spans WHERE json_extract(spans.doc, '$.trace_id') = ?"
        );
        assert_eq!(query.params, vec![text("000000000000002a")]);

        let query = builder().traces_by_ids(&[TraceId::new(0, 1), TraceId::new(0, 2)]);
        assert!(query.sql.ends_with("IN (?, ?)"));
        assert_eq!(query.params.len(), 2);
    }

    #[test]
    fn test_find_trace_ids_requires_start_time() {
        let err = builder()
            .find_trace_ids(&TraceQueryParameters::default().with_service("svc"))
            .unwrap_err();
        assert!(matches!(err, Error::Input(_)));
    }

    #[test]
    fn test_find_trace_ids_minimal() {
        let since = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let query = builder().find_trace_ids(&TraceQueryParameters::since(since)).unwrap();

        assert_eq!(
            query.sql,
            "SELECT json_extract(spans.doc, '$.trace_id') AS trace_id, \
             MIN(json_extract(spans.doc, '$.start_time')) AS start_time \
             FROM \"tracing.spans\" AS spans \
             WHERE json_extract(spans.doc, '$.start_time') >= ? \
             GROUP BY trace_id ORDER BY start_time DESC, trace_id"
        );
        assert_eq!(query.params, vec![text("2024-01-01T00:00:00.000000000Z")]);
    }

    #[test]
    fn test_find_trace_ids_all_filters() {
        let since = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let until = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let params = TraceQueryParameters::since(since)
            .with_service("svc")
            .with_operation("op")
            .with_start_time_max(until)
            .with_duration_range(Duration::from_millis(1), Duration::from_secs(2))
            .with_tag("http.status_code", "500")
            .with_tag("error", "true")
            .with_limit(20);

        let query = builder().find_trace_ids(&params).unwrap();

        let service = query.sql.find("process.service_name").unwrap();
        let operation = query.sql.find("operation_name").unwrap();
        let start = query.sql.find("$.start_time') >= ?").unwrap();
        assert!(service < operation && operation < start);
        assert!(query.sql.ends_with(" LIMIT ?"));
        assert_eq!(query.sql.matches("json_each").count(), 2);

        assert_eq!(
            query.params,
            vec![
                text("svc"),
                text("op"),
                text("2024-01-01T00:00:00.000000000Z"),
                text("2024-01-02T00:00:00.000000000Z"),
                QueryParam::Integer(1_000_000),
                QueryParam::Integer(2_000_000_000),
                text("error"),
                text("true"),
                text("http.status_code"),
                text("500"),
                QueryParam::Integer(20),
            ]
        );
    }

    #[test]
    fn test_find_trace_ids_ignores_zero_durations_and_limit() {
        let since = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let params = TraceQueryParameters::since(since).with_duration_range(Duration::ZERO, Duration::ZERO);

        let query = builder().find_trace_ids(&params).unwrap();

        assert!(!query.sql.contains("$.duration"));
        assert!(!query.sql.contains("LIMIT"));
        assert_eq!(query.params.len(), 1);
    }

    #[test]
    fn test_literals_are_never_spliced() {
        let since = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let hostile = "x' OR '1'='1";
        let params = TraceQueryParameters::since(since)
            .with_service(hostile)
            .with_tag(hostile, hostile);

        let query = builder().find_trace_ids(&params).unwrap();

        assert!(!query.sql.contains(hostile));
        assert_eq!(query.params.iter().filter(|p| **p == text(hostile)).count(), 3);
    }
}
