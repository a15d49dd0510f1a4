//! Cursor-driven streaming of large result sets
//!
//! A background task walks the pages of a query and hands rows to the
//! consumer through a bounded channel. The stream ends when the store
//! reports no further cursor or returns a short page, when the store fails
//! (the error is the last item), or when the query is cancelled. A stream
//! cannot be restarted; run the query again instead.

use crate::error::StoreError;
use crate::store::{Document, DocumentStore, Page, Query};
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Issues paginated queries against a store
#[derive(Clone)]
pub struct Paginator {
    store: Arc<dyn DocumentStore>,
    page_size: usize,
}

impl Paginator {
    pub fn new(store: Arc<dyn DocumentStore>, page_size: usize) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
        }
    }

    /// Start streaming the rows of `query`
    ///
    /// Cancelling `cancel` (or dropping the returned stream) stops further
    /// page requests and ends the stream.
    pub fn stream(&self, query: Query, cancel: &CancellationToken) -> RowStream {
        let token = cancel.child_token();
        let (tx, rx) = mpsc::channel(self.page_size);

        tokio::spawn(produce(
            self.store.clone(),
            query,
            self.page_size,
            token.clone(),
            tx,
        ));

        RowStream {
            rx,
            _guard: token.drop_guard(),
        }
    }
}

/// Rows of a paginated query
pub struct RowStream {
    rx: mpsc::Receiver<Result<Document, StoreError>>,
    _guard: DropGuard,
}

impl Stream for RowStream {
    type Item = Result<Document, StoreError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

enum Step {
    Continue,
    Stop,
}

async fn produce(
    store: Arc<dyn DocumentStore>,
    query: Query,
    page_size: usize,
    cancel: CancellationToken,
    tx: mpsc::Sender<Result<Document, StoreError>>,
) {
    let mut page = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        result = store.query_page(&query, page_size) => result,
    };
    let mut pages = 0usize;

    loop {
        let Page { rows, next_cursor } = match page {
            Ok(page) => page,
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                return;
            }
        };
        pages += 1;
        let full_page = rows.len() >= page_size;

        if let Step::Stop = forward(rows, &tx, &cancel).await {
            if let Some(cursor) = next_cursor {
                release(store.as_ref(), &cursor).await;
            }
            tracing::debug!(pages, "Paginated query stopped early");
            return;
        }

        let cursor = match next_cursor {
            Some(cursor) if full_page => cursor,
            Some(cursor) => {
                release(store.as_ref(), &cursor).await;
                break;
            }
            None => break,
        };

        page = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                release(store.as_ref(), &cursor).await;
                tracing::debug!(pages, "Paginated query cancelled");
                return;
            }
            result = store.next_page(&cursor, page_size) => result,
        };
    }

    tracing::debug!(pages, "Paginated query complete");
}

async fn forward(
    rows: Vec<Document>,
    tx: &mpsc::Sender<Result<Document, StoreError>>,
    cancel: &CancellationToken,
) -> Step {
    for row in rows {
        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Step::Stop,
            sent = tx.send(Ok(row)) => sent,
        };
        // Receiver gone: nobody wants the remaining rows
        if sent.is_err() {
            return Step::Stop;
        }
    }
    Step::Continue
}

async fn release(store: &dyn DocumentStore, cursor: &str) {
    if let Err(e) = store.close_cursor(cursor).await {
        tracing::warn!(error = %e, "Failed to close cursor");
    }
}
