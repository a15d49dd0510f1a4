use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Duration;

/// Register metric descriptions (can be called multiple times safely)
///
/// The library only records through the `metrics` facade; installing a
/// recorder/exporter is up to the host process.
pub fn describe_metrics() {
    describe_counter!(
        "trace_store_documents_written_total",
        "Documents accepted by the document store"
    );
    describe_counter!(
        "trace_store_documents_failed_total",
        "Documents dropped after a failed flush"
    );
    describe_histogram!(
        "trace_store_flush_duration_seconds",
        "Bulk insert duration in seconds"
    );
    describe_counter!(
        "trace_store_queries_total",
        "Read queries issued to the document store"
    );
    describe_histogram!(
        "trace_store_query_duration_seconds",
        "Read query duration in seconds"
    );
}

/// Record the outcome of one flush
pub fn record_flush(collection: &str, written: usize, failed: usize, elapsed: Duration) {
    counter!(
        "trace_store_documents_written_total",
        "collection" => collection.to_string(),
    )
    .increment(written as u64);

    if failed > 0 {
        counter!(
            "trace_store_documents_failed_total",
            "collection" => collection.to_string(),
        )
        .increment(failed as u64);
    }

    histogram!(
        "trace_store_flush_duration_seconds",
        "collection" => collection.to_string(),
    )
    .record(elapsed.as_secs_f64());
}

/// Record a read query
pub fn record_query(operation: &'static str, elapsed: Duration) {
    counter!("trace_store_queries_total", "operation" => operation).increment(1);
    histogram!("trace_store_query_duration_seconds", "operation" => operation)
        .record(elapsed.as_secs_f64());
}
