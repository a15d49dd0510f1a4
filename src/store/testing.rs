//! In-memory [`DocumentStore`] that records calls and replays canned results

use super::{Document, DocumentStatus, DocumentStore, Page, Query};
use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// One recorded bulk insert
#[derive(Debug, Clone)]
pub struct InsertCall {
    pub workspace: String,
    pub collection: String,
    pub documents: Vec<Document>,
    pub at: tokio::time::Instant,
}

#[derive(Default)]
pub struct RecordingStore {
    pub queries: Mutex<Vec<Query>>,
    pub query_results: Mutex<VecDeque<Result<Vec<Document>, StoreError>>>,
    pub page_requests: Mutex<Vec<String>>,
    pub pages: Mutex<VecDeque<Result<Page, StoreError>>>,
    pub closed_cursors: Mutex<Vec<String>>,
    pub inserts: Mutex<Vec<InsertCall>>,
    pub workspaces: Mutex<HashSet<String>>,
    pub collections: Mutex<HashMap<(String, String), Duration>>,
    pub fail_inserts: AtomicBool,
    pub fail_lookups: AtomicBool,
    pub stall_next_page: AtomicBool,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_query_result(&self, rows: Vec<Document>) {
        self.query_results.lock().unwrap().push_back(Ok(rows));
    }

    pub fn push_query_error(&self, error: StoreError) {
        self.query_results.lock().unwrap().push_back(Err(error));
    }

    pub fn push_page(&self, rows: Vec<Document>, next_cursor: Option<&str>) {
        self.pages.lock().unwrap().push_back(Ok(Page {
            rows,
            next_cursor: next_cursor.map(str::to_string),
        }));
    }

    pub fn push_page_error(&self, error: StoreError) {
        self.pages.lock().unwrap().push_back(Err(error));
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().unwrap().len()
    }

    pub fn insert_calls(&self) -> Vec<InsertCall> {
        self.inserts.lock().unwrap().clone()
    }

    fn next_page_result(&self) -> Result<Page, StoreError> {
        self.pages.lock().unwrap().pop_front().unwrap_or_else(|| Ok(Page::default()))
    }
}

#[async_trait]
impl DocumentStore for RecordingStore {
    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        self.queries.lock().unwrap().push(query.clone());
        self.query_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn query_page(&self, query: &Query, _page_size: usize) -> Result<Page, StoreError> {
        self.queries.lock().unwrap().push(query.clone());
        self.next_page_result()
    }

    async fn next_page(&self, cursor: &str, _page_size: usize) -> Result<Page, StoreError> {
        self.page_requests.lock().unwrap().push(cursor.to_string());
        if self.stall_next_page.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        self.next_page_result()
    }

    async fn close_cursor(&self, cursor: &str) -> Result<(), StoreError> {
        self.closed_cursors.lock().unwrap().push(cursor.to_string());
        Ok(())
    }

    async fn add_documents(
        &self,
        workspace: &str,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<Vec<DocumentStatus>, StoreError> {
        let count = documents.len();
        self.inserts.lock().unwrap().push(InsertCall {
            workspace: workspace.to_string(),
            collection: collection.to_string(),
            documents,
            at: tokio::time::Instant::now(),
        });

        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Query("insert rejected".to_string()));
        }
        Ok((0..count).map(|i| DocumentStatus::added(i.to_string())).collect())
    }

    async fn get_workspace(&self, workspace: &str) -> Result<(), StoreError> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(StoreError::Query("unauthorized".to_string()));
        }
        if self.workspaces.lock().unwrap().contains(workspace) {
            Ok(())
        } else {
            Err(StoreError::NotFound(workspace.to_string()))
        }
    }

    async fn create_workspace(&self, workspace: &str) -> Result<(), StoreError> {
        if self.workspaces.lock().unwrap().insert(workspace.to_string()) {
            Ok(())
        } else {
            Err(StoreError::AlreadyExists(workspace.to_string()))
        }
    }

    async fn get_collection(&self, workspace: &str, collection: &str) -> Result<(), StoreError> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(StoreError::Query("unauthorized".to_string()));
        }
        let key = (workspace.to_string(), collection.to_string());
        if self.collections.lock().unwrap().contains_key(&key) {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("{}.{}", workspace, collection)))
        }
    }

    async fn create_collection(
        &self,
        workspace: &str,
        collection: &str,
        retention: Duration,
    ) -> Result<(), StoreError> {
        let key = (workspace.to_string(), collection.to_string());
        let mut collections = self.collections.lock().unwrap();
        if collections.contains_key(&key) {
            return Err(StoreError::AlreadyExists(format!("{}.{}", workspace, collection)));
        }
        collections.insert(key, retention);
        Ok(())
    }
}
