//! Background retention task for the SQLite document store
//!
//! Periodically deletes documents older than their collection's retention.

use super::sqlite::{PurgeStats, SqliteDocumentStore};
use crate::error::StoreError;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tokio_util::sync::CancellationToken;

/// Spawn background cleanup task
///
/// Runs a purge every `interval` until `shutdown` is cancelled. Failures are
/// logged and the loop keeps going.
///
/// # Example
///
/// ```ignore
/// let shutdown = CancellationToken::new();
/// spawn_cleanup_task(store.clone(), Duration::from_secs(3600), shutdown.clone());
/// ```
pub fn spawn_cleanup_task(
    store: Arc<SqliteDocumentStore>,
    interval: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        cleanup_loop(store, interval, shutdown).await;
    })
}

async fn cleanup_loop(store: Arc<SqliteDocumentStore>, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = run_cleanup_now(&store).await {
                    tracing::error!(error = %e, "Retention cleanup failed");
                }
            }
        }
    }

    tracing::info!("Retention cleanup task shutting down");
}

/// Run a purge immediately
pub async fn run_cleanup_now(store: &SqliteDocumentStore) -> Result<Vec<PurgeStats>, StoreError> {
    let stats = store.purge_expired().await?;

    for entry in stats.iter().filter(|s| s.deleted > 0) {
        tracing::info!(
            workspace = %entry.workspace,
            collection = %entry.collection,
            deleted = entry.deleted,
            "Expired documents deleted"
        );
    }

    Ok(stats)
}
