//! Read operations and trace assembly

use crate::error::{Error, Result, StoreError};
use crate::metrics::record_query;
use crate::models::{Operation, OperationQuery, Trace, TraceId, TraceQueryParameters};
use crate::spanstore::decode::decode_span;
use crate::spanstore::paginate::Paginator;
use crate::spanstore::query::QueryBuilder;
use crate::store::{Document, DocumentStore, Query};
use futures::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Trace IDs bound per batch-fetch query, well below SQLite's variable limit
pub const FETCH_CHUNK_SIZE: usize = 1000;

/// Executes read queries and assembles their rows into traces
#[derive(Clone)]
pub struct TraceReader {
    store: Arc<dyn DocumentStore>,
    queries: QueryBuilder,
    paginator: Paginator,
    shutdown: CancellationToken,
}

impl TraceReader {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        queries: QueryBuilder,
        page_size: usize,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            paginator: Paginator::new(store.clone(), page_size),
            store,
            queries,
            shutdown,
        }
    }

    /// Distinct service names, ascending
    #[tracing::instrument(skip(self))]
    pub async fn get_services(&self) -> Result<Vec<String>> {
        let rows = self.run("get_services", self.queries.services()).await?;

        Ok(rows
            .iter()
            .filter_map(|row| row.get("service").and_then(|v| v.as_str()))
            .map(str::to_string)
            .collect())
    }

    /// Distinct (operation, span kind) pairs of a service
    #[tracing::instrument(skip(self, params), fields(service = %params.service_name, span_kind = %params.span_kind))]
    pub async fn get_operations(&self, params: &OperationQuery) -> Result<Vec<Operation>> {
        let rows = self
            .run("get_operations", self.queries.operations(params))
            .await?;

        let mut operations = Vec::with_capacity(rows.len());
        for row in &rows {
            let Some(name) = row.get("operation").and_then(|v| v.as_str()) else {
                tracing::warn!("Skipping operation row without a name");
                continue;
            };
            let span_kind = row.get("spankind").and_then(|v| v.as_str()).unwrap_or("");
            operations.push(Operation::new(name, span_kind));
        }
        Ok(operations)
    }

    /// Every span of one trace
    ///
    /// Fails with [`Error::TraceNotFound`] when no span matches and with
    /// [`Error::Mapping`] when a row does not decode.
    #[tracing::instrument(skip(self, trace_id), fields(trace_id = %trace_id))]
    pub async fn get_trace(&self, trace_id: &TraceId) -> Result<Trace> {
        let rows = self
            .run("get_trace", self.queries.trace_by_id(trace_id))
            .await?;

        if rows.is_empty() {
            return Err(Error::TraceNotFound);
        }

        let spans = rows
            .iter()
            .map(decode_span)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Trace {
            trace_id: *trace_id,
            spans,
        })
    }

    /// Trace IDs matching a search, newest first
    pub async fn find_trace_ids(&self, params: &TraceQueryParameters) -> Result<Vec<TraceId>> {
        self.find_trace_ids_with(params, &self.shutdown.child_token())
            .await
    }

    /// [`find_trace_ids`](Self::find_trace_ids) under a caller-supplied cancellation token
    #[tracing::instrument(skip(self, params, cancel), fields(service = ?params.service_name, limit = params.num_traces))]
    pub async fn find_trace_ids_with(
        &self,
        params: &TraceQueryParameters,
        cancel: &CancellationToken,
    ) -> Result<Vec<TraceId>> {
        let query = self.queries.find_trace_ids(params)?;
        let started = Instant::now();

        // Returning early drops the stream, which stops its producer
        let mut rows = self.paginator.stream(query, cancel);
        let mut trace_ids = Vec::new();

        loop {
            let row = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = self.shutdown.cancelled() => return Err(Error::Cancelled),
                row = rows.next() => row,
            };
            let Some(row) = row else { break };

            let row = row?;
            match row.get("trace_id") {
                Some(serde_json::Value::String(text)) => match text.parse::<TraceId>() {
                    Ok(trace_id) => trace_ids.push(trace_id),
                    Err(e) => tracing::warn!(error = %e, "Skipping unparseable trace id"),
                },
                _ => tracing::warn!("Skipping row without a trace id"),
            }
        }

        record_query("find_trace_ids", started.elapsed());
        tracing::debug!(count = trace_ids.len(), "Resolved trace ids");
        Ok(trace_ids)
    }

    /// Traces matching a search
    pub async fn find_traces(&self, params: &TraceQueryParameters) -> Result<Vec<Trace>> {
        let trace_ids = self.find_trace_ids(params).await?;
        self.fetch_traces(&trace_ids).await
    }

    /// Every span of each listed trace, grouped by trace
    ///
    /// IDs without spans are absent from the result. Rows that fail to decode
    /// are logged and skipped. Traces appear in the order their first span
    /// was returned.
    #[tracing::instrument(skip(self, trace_ids), fields(count = trace_ids.len()))]
    pub async fn fetch_traces(&self, trace_ids: &[TraceId]) -> Result<Vec<Trace>> {
        if trace_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut rows = Vec::new();
        for chunk in trace_ids.chunks(FETCH_CHUNK_SIZE) {
            rows.extend(
                self.run("fetch_traces", self.queries.traces_by_ids(chunk))
                    .await?,
            );
        }

        Ok(assemble(&rows))
    }

    async fn run(&self, operation: &'static str, query: Query) -> Result<Vec<Document>> {
        let started = Instant::now();
        let rows = cancellable(&self.shutdown, self.store.query(&query)).await??;
        record_query(operation, started.elapsed());
        Ok(rows)
    }
}

/// Group span rows into traces in first-appearance order
pub fn assemble(rows: &[Document]) -> Vec<Trace> {
    let mut traces: Vec<Trace> = Vec::new();
    let mut index: HashMap<TraceId, usize> = HashMap::new();

    for row in rows {
        let span = match decode_span(row) {
            Ok(span) => span,
            Err(e) => {
                tracing::warn!(
                    id = row.get("_id").and_then(|v| v.as_str()).unwrap_or(""),
                    error = %e,
                    "Skipping malformed span row"
                );
                continue;
            }
        };

        let slot = *index.entry(span.trace_id).or_insert_with(|| {
            traces.push(Trace {
                trace_id: span.trace_id,
                spans: Vec::new(),
            });
            traces.len() - 1
        });
        traces[slot].spans.push(span);
    }

    traces
}

async fn cancellable<T>(
    token: &CancellationToken,
    future: impl Future<Output = std::result::Result<T, StoreError>>,
) -> Result<std::result::Result<T, StoreError>> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Error::Cancelled),
        result = future => Ok(result),
    }
}
