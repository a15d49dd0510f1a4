//! Batched background writer
//!
//! Write requests go through a bounded queue to a fixed pool of worker tasks.
//! Each worker buffers documents per destination collection and bulk-inserts a
//! buffer when it reaches the batch size or when the flush interval elapses.
//! A full queue makes `enqueue` wait for room. Flush failures are logged and
//! the affected documents are dropped.

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::metrics::record_flush;
use crate::store::{Document, DocumentStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Target collection of a write
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    pub workspace: String,
    pub collection: String,
}

impl Destination {
    pub fn new(workspace: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            workspace: workspace.into(),
            collection: collection.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub destination: Destination,
    pub document: Document,
}

#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub workers: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub queue_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self::from(&StoreConfig::default())
    }
}

impl From<&StoreConfig> for WriterConfig {
    fn from(config: &StoreConfig) -> Self {
        Self {
            workers: config.workers,
            batch_size: config.batch_size,
            flush_interval: config.flush_interval(),
            queue_capacity: config.queue_capacity,
        }
    }
}

type SharedReceiver = Arc<Mutex<mpsc::Receiver<WriteRequest>>>;

/// Handle to the writer worker pool
pub struct BatchWriter {
    sender: Mutex<Option<mpsc::Sender<WriteRequest>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl BatchWriter {
    /// Start the worker pool
    pub fn spawn(store: Arc<dyn DocumentStore>, config: WriterConfig) -> Self {
        let workers = config.workers.max(1);
        let batch_size = config.batch_size.max(1);
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let rx: SharedReceiver = Arc::new(Mutex::new(rx));

        let handles = (0..workers)
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    store.clone(),
                    rx.clone(),
                    batch_size,
                    config.flush_interval,
                ))
            })
            .collect();

        tracing::info!(
            workers,
            batch_size,
            flush_interval_ms = config.flush_interval.as_millis() as u64,
            "Span writer started"
        );

        Self {
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
        }
    }

    /// Queue a document, waiting while the queue is full
    ///
    /// Fails with [`Error::WriterClosed`] once [`stop`](Self::stop) has run.
    pub async fn enqueue(&self, request: WriteRequest) -> Result<()> {
        let sender = self
            .sender
            .lock()
            .await
            .clone()
            .ok_or(Error::WriterClosed)?;

        sender.send(request).await.map_err(|_| Error::WriterClosed)
    }

    /// Close the queue, flush everything buffered and wait for the workers
    ///
    /// Safe to call more than once. A concurrent caller waits until the
    /// workers have drained before returning.
    pub async fn stop(&self) {
        // Held across the joins so a second caller cannot return early
        let mut workers = self.workers.lock().await;
        drop(self.sender.lock().await.take());

        if workers.is_empty() {
            return;
        }

        for handle in workers.drain(..) {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Span writer worker panicked");
            }
        }

        tracing::info!("Span writer stopped");
    }
}

async fn worker_loop(
    id: usize,
    store: Arc<dyn DocumentStore>,
    rx: SharedReceiver,
    batch_size: usize,
    flush_interval: Duration,
) {
    let mut buffers: HashMap<Destination, Vec<Document>> = HashMap::new();
    let mut ticker = tokio::time::interval_at(Instant::now() + flush_interval, flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            request = next_request(&rx) => match request {
                Some(WriteRequest { destination, document }) => {
                    let buffer = buffers.entry(destination.clone()).or_default();
                    buffer.push(document);
                    if buffer.len() >= batch_size {
                        let batch = std::mem::take(buffer);
                        flush(store.as_ref(), &destination, batch).await;
                    }
                }
                // Queue closed and drained
                None => {
                    flush_all(store.as_ref(), &mut buffers).await;
                    break;
                }
            },
            _ = ticker.tick() => {
                flush_all(store.as_ref(), &mut buffers).await;
            }
        }
    }

    tracing::debug!(worker = id, "Span writer worker exiting");
}

async fn next_request(rx: &Mutex<mpsc::Receiver<WriteRequest>>) -> Option<WriteRequest> {
    rx.lock().await.recv().await
}

async fn flush_all(store: &dyn DocumentStore, buffers: &mut HashMap<Destination, Vec<Document>>) {
    for (destination, buffer) in buffers.iter_mut() {
        if !buffer.is_empty() {
            let batch = std::mem::take(buffer);
            flush(store, destination, batch).await;
        }
    }
}

async fn flush(store: &dyn DocumentStore, destination: &Destination, batch: Vec<Document>) {
    let count = batch.len();
    let started = Instant::now();

    match store
        .add_documents(&destination.workspace, &destination.collection, batch)
        .await
    {
        Ok(statuses) => {
            let mut failed = 0;
            for status in statuses.iter().filter(|s| s.is_error()) {
                failed += 1;
                tracing::warn!(
                    workspace = %destination.workspace,
                    collection = %destination.collection,
                    id = status.id.as_deref().unwrap_or(""),
                    error = status.error.as_deref().unwrap_or(""),
                    "Document rejected"
                );
            }
            tracing::debug!(
                collection = %destination.collection,
                count,
                failed,
                "Flushed batch"
            );
            record_flush(&destination.collection, count.saturating_sub(failed), failed, started.elapsed());
        }
        Err(e) => {
            tracing::error!(
                workspace = %destination.workspace,
                collection = %destination.collection,
                count,
                error = %e,
                "Failed to write batch"
            );
            record_flush(&destination.collection, 0, count, started.elapsed());
        }
    }
}
