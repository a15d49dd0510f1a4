//! Create-if-missing setup of the workspace and collections

use crate::error::{Result, StoreError};
use crate::store::DocumentStore;
use std::time::Duration;

/// Make sure the workspace and both collections exist
///
/// Missing objects are created; an object created concurrently by someone
/// else counts as success. Any other lookup or creation failure aborts.
/// Retention applies only to collections created here.
pub async fn ensure_schema(
    store: &dyn DocumentStore,
    workspace: &str,
    collections: &[&str],
    retention: Duration,
) -> Result<()> {
    match store.get_workspace(workspace).await {
        Ok(()) => {}
        Err(e) if e.is_not_found() => {
            if created(store.create_workspace(workspace).await)? {
                tracing::info!(workspace, "Created workspace");
            }
        }
        Err(e) => return Err(e.into()),
    }

    for collection in collections {
        match store.get_collection(workspace, collection).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                if created(store.create_collection(workspace, collection, retention).await)? {
                    tracing::info!(
                        workspace,
                        collection,
                        retention_secs = retention.as_secs(),
                        "Created collection"
                    );
                } else {
                    tracing::debug!(workspace, collection, "Collection created concurrently");
                }
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}

/// `true` when this call created the object, `false` when it already existed
fn created(result: std::result::Result<(), StoreError>) -> Result<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.is_already_exists() => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::store::testing::RecordingStore;
    use std::sync::atomic::Ordering;

    const RETENTION: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn test_creates_missing_objects() {
        let store = RecordingStore::new();

        ensure_schema(&store, "tracing", &["spans", "operations"], RETENTION)
            .await
            .unwrap();

        assert!(store.workspaces.lock().unwrap().contains("tracing"));
        let collections = store.collections.lock().unwrap();
        assert_eq!(collections.len(), 2);
        assert_eq!(
            collections[&("tracing".to_string(), "spans".to_string())],
            RETENTION
        );
    }

    #[tokio::test]
    async fn test_existing_objects_are_left_alone() {
        let store = RecordingStore::new();
        store.workspaces.lock().unwrap().insert("tracing".to_string());
        store
            .collections
            .lock()
            .unwrap()
            .insert(("tracing".to_string(), "spans".to_string()), Duration::ZERO);

        ensure_schema(&store, "tracing", &["spans", "operations"], RETENTION)
            .await
            .unwrap();

        let collections = store.collections.lock().unwrap();
        assert_eq!(
            collections[&("tracing".to_string(), "spans".to_string())],
            Duration::ZERO
        );
        assert_eq!(
            collections[&("tracing".to_string(), "operations".to_string())],
            RETENTION
        );
    }

    #[tokio::test]
    async fn test_lookup_failure_aborts() {
        let store = RecordingStore::new();
        store.fail_lookups.store(true, Ordering::SeqCst);

        let err = ensure_schema(&store, "tracing", &["spans"], RETENTION)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Upstream(StoreError::Query(_))));
        assert!(store.workspaces.lock().unwrap().is_empty());
    }

    #[test]
    fn test_already_exists_counts_as_created() {
        assert!(created(Ok(())).unwrap());
        assert!(!created(Err(StoreError::AlreadyExists("spans".to_string()))).unwrap());
        assert!(created(Err(StoreError::Query("denied".to_string()))).is_err());
    }
}
