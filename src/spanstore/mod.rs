//! Span store backed by a document store
//!
//! [`SpanStore`] is what the host tracing system talks to. Writes are mapped
//! to documents and handed to a [`BatchWriter`]; reads are built by
//! [`QueryBuilder`], executed against the store and decoded back into spans.
//!
//! ```ignore
//! let documents = Arc::new(SqliteDocumentStore::new(&cfg.database.url).await?);
//! let store = SpanStore::new(documents, cfg.store.clone());
//! store.setup().await?;
//!
//! store.write_span(&span).await?;
//! let services = store.get_services().await?;
//!
//! store.close().await;
//! ```

pub mod decode;
pub mod mapper;
pub mod paginate;
pub mod query;
pub mod reader;
pub mod schema;
pub mod writer;

use crate::config::StoreConfig;
use crate::error::Result;
use crate::models::{Operation, OperationQuery, Span, Trace, TraceId, TraceQueryParameters};
use crate::store::DocumentStore;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub use mapper::{map_span, MappedSpan};
pub use paginate::{Paginator, RowStream};
pub use query::QueryBuilder;
pub use reader::TraceReader;
pub use writer::{BatchWriter, Destination, WriteRequest, WriterConfig};

/// Read side of a span store
#[async_trait]
pub trait SpanReader: Send + Sync {
    async fn get_services(&self) -> Result<Vec<String>>;

    async fn get_operations(&self, query: &OperationQuery) -> Result<Vec<Operation>>;

    async fn get_trace(&self, trace_id: &TraceId) -> Result<Trace>;

    async fn find_traces(&self, params: &TraceQueryParameters) -> Result<Vec<Trace>>;

    async fn find_trace_ids(&self, params: &TraceQueryParameters) -> Result<Vec<TraceId>>;
}

/// Write side of a span store
#[async_trait]
pub trait SpanWriter: Send + Sync {
    /// Queue a span for storage
    ///
    /// Returning `Ok` means the span was accepted, not that it is persisted.
    async fn write_span(&self, span: &Span) -> Result<()>;
}

pub struct SpanStore {
    store: Arc<dyn DocumentStore>,
    config: StoreConfig,
    reader: TraceReader,
    writer: BatchWriter,
    spans: Destination,
    operations: Destination,
    shutdown: CancellationToken,
}

impl SpanStore {
    /// Build the store and start its writer workers
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(store: Arc<dyn DocumentStore>, config: StoreConfig) -> Self {
        crate::metrics::describe_metrics();

        let shutdown = CancellationToken::new();
        let queries = QueryBuilder::new(&config.workspace, &config.spans, &config.operations);
        let reader = TraceReader::new(store.clone(), queries, config.page_size, shutdown.clone());
        let writer = BatchWriter::spawn(store.clone(), WriterConfig::from(&config));

        Self {
            spans: Destination::new(&config.workspace, &config.spans),
            operations: Destination::new(&config.workspace, &config.operations),
            store,
            config,
            reader,
            writer,
            shutdown,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn reader(&self) -> &TraceReader {
        &self.reader
    }

    /// Provision the workspace and collections when `create` is enabled
    pub async fn setup(&self) -> Result<()> {
        if !self.config.create {
            tracing::debug!("Schema creation disabled, skipping setup");
            return Ok(());
        }

        schema::ensure_schema(
            self.store.as_ref(),
            &self.config.workspace,
            &[self.config.spans.as_str(), self.config.operations.as_str()],
            self.config.retention(),
        )
        .await
    }

    /// Cancel in-flight reads, flush pending writes and stop the writer
    pub async fn close(&self) {
        self.shutdown.cancel();
        self.writer.stop().await;
    }

    /// [`SpanReader::find_trace_ids`] under a caller-supplied cancellation token
    pub async fn find_trace_ids_with(
        &self,
        params: &TraceQueryParameters,
        cancel: &CancellationToken,
    ) -> Result<Vec<TraceId>> {
        self.reader.find_trace_ids_with(params, cancel).await
    }
}

#[async_trait]
impl SpanReader for SpanStore {
    async fn get_services(&self) -> Result<Vec<String>> {
        self.reader.get_services().await
    }

    async fn get_operations(&self, query: &OperationQuery) -> Result<Vec<Operation>> {
        self.reader.get_operations(query).await
    }

    async fn get_trace(&self, trace_id: &TraceId) -> Result<Trace> {
        self.reader.get_trace(trace_id).await
    }

    async fn find_traces(&self, params: &TraceQueryParameters) -> Result<Vec<Trace>> {
        self.reader.find_traces(params).await
    }

    async fn find_trace_ids(&self, params: &TraceQueryParameters) -> Result<Vec<TraceId>> {
        self.reader.find_trace_ids(params).await
    }
}

#[async_trait]
impl SpanWriter for SpanStore {
    async fn write_span(&self, span: &Span) -> Result<()> {
        let MappedSpan { span: document, operation } = map_span(span, self.config.flatten_tags)?;

        self.writer
            .enqueue(WriteRequest {
                destination: self.spans.clone(),
                document,
            })
            .await?;
        self.writer
            .enqueue(WriteRequest {
                destination: self.operations.clone(),
                document: operation,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::models::{KeyValue, SpanId};
    use crate::store::testing::RecordingStore;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn config(create: bool) -> StoreConfig {
        StoreConfig {
            create,
            workers: 1,
            ..StoreConfig::default()
        }
    }

    fn span() -> Span {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Span::new(TraceId::new(0, 1), SpanId(2), "foo", "svc", start, Duration::from_millis(5))
            .with_tag(KeyValue::string("span.kind", "client"))
    }

    #[tokio::test]
    async fn test_setup_skipped_unless_enabled() {
        let store = Arc::new(RecordingStore::new());
        let spans = SpanStore::new(store.clone(), config(false));

        spans.setup().await.unwrap();

        assert!(store.workspaces.lock().unwrap().is_empty());
        assert!(store.collections.lock().unwrap().is_empty());
        spans.close().await;
    }

    #[tokio::test]
    async fn test_setup_creates_collections() {
        let store = Arc::new(RecordingStore::new());
        let spans = SpanStore::new(store.clone(), config(true));

        spans.setup().await.unwrap();
        spans.setup().await.unwrap();

        assert_eq!(store.collections.lock().unwrap().len(), 2);
        spans.close().await;
    }

    #[tokio::test]
    async fn test_write_span_emits_both_documents() {
        let store = Arc::new(RecordingStore::new());
        let spans = SpanStore::new(store.clone(), config(false));

        spans.write_span(&span()).await.unwrap();
        spans.close().await;

        let mut calls = store.insert_calls();
        calls.sort_by(|a, b| a.collection.cmp(&b.collection));
        assert_eq!(calls.len(), 2);

        assert_eq!(calls[0].collection, "operations");
        assert_eq!(calls[0].documents[0]["_id"], "svc:foo");
        assert_eq!(calls[0].documents[0]["span_kind"], "client");

        assert_eq!(calls[1].workspace, "tracing");
        assert_eq!(calls[1].collection, "spans");
        assert_eq!(calls[1].documents[0]["span_id"], "0000000000000002");
        assert_eq!(calls[1].documents[0]["kv"]["span.kind"], "client");
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let store = Arc::new(RecordingStore::new());
        let spans = SpanStore::new(store, config(false));

        spans.close().await;

        let err = spans.write_span(&span()).await.unwrap_err();
        assert!(matches!(err, Error::WriterClosed));
    }

    #[tokio::test]
    async fn test_reads_after_close_are_cancelled() {
        let store = Arc::new(RecordingStore::new());
        let spans = SpanStore::new(store.clone(), config(false));

        spans.close().await;

        let err = spans.get_services().await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(store.query_count(), 0);
    }
}
