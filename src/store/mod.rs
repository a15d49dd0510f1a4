//! Document store abstraction
//!
//! The span store talks to a schema-less document store through
//! [`DocumentStore`]. Queries are SQL text with positional `?` parameters;
//! every literal value is bound, only collection identifiers are spliced in
//! and they go through [`quote_identifier`].
//!
//! ## Layout
//!
//! Each collection is a table `"<workspace>.<collection>"` with the columns
//! `_id`, `_event_time` and `doc` (a JSON object). Rows handed back by a store
//! expand the `doc` object into the row itself, so `SELECT *` yields the
//! document fields next to `_id` and `_event_time`.

pub mod cleanup;
pub mod sqlite;

#[cfg(test)]
pub mod testing;

use crate::error::StoreError;
use async_trait::async_trait;
use std::time::Duration;

pub use cleanup::{run_cleanup_now, spawn_cleanup_task};
pub use sqlite::SqliteDocumentStore;

/// A schema-less document (JSON object)
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Column holding the JSON document body
pub const DOC_COLUMN: &str = "doc";

/// Document identifier field
pub const ID_FIELD: &str = "_id";

/// Bound query parameter
#[derive(Debug, Clone, PartialEq)]
pub enum QueryParam {
    Text(String),
    Integer(i64),
}

impl From<&str> for QueryParam {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for QueryParam {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

/// Query text plus its positional parameters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub sql: String,
    pub params: Vec<QueryParam>,
}

impl Query {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Append raw SQL text
    pub fn push_sql(&mut self, sql: &str) -> &mut Self {
        self.sql.push_str(sql);
        self
    }

    /// Append a `?` placeholder and bind `param` to it
    pub fn push_param(&mut self, param: impl Into<QueryParam>) -> &mut Self {
        self.sql.push('?');
        self.params.push(param.into());
        self
    }
}

/// One page of a paginated query
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub rows: Vec<Document>,
    /// Token for the following page; `None` once the result set is exhausted
    pub next_cursor: Option<String>,
}

/// Outcome of a single document in a bulk insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentStatus {
    pub id: Option<String>,
    pub error: Option<String>,
}

impl DocumentStatus {
    pub fn added(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            error: None,
        }
    }

    pub fn failed(id: Option<String>, error: impl Into<String>) -> Self {
        Self {
            id,
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Client interface of the external document store
///
/// Implementations must be safe for concurrent use; the span store shares a
/// single instance between readers and all writer workers.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Run a query and return every row
    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError>;

    /// Run a query and return its first page
    async fn query_page(&self, query: &Query, page_size: usize) -> Result<Page, StoreError>;

    /// Fetch the page following `cursor`
    async fn next_page(&self, cursor: &str, page_size: usize) -> Result<Page, StoreError>;

    /// Release server-side state behind a cursor that will not be followed
    async fn close_cursor(&self, _cursor: &str) -> Result<(), StoreError> {
        Ok(())
    }

    /// Insert or replace documents, reporting a status per document
    async fn add_documents(
        &self,
        workspace: &str,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<Vec<DocumentStatus>, StoreError>;

    /// `Err(StoreError::NotFound)` when the workspace does not exist
    async fn get_workspace(&self, workspace: &str) -> Result<(), StoreError>;

    async fn create_workspace(&self, workspace: &str) -> Result<(), StoreError>;

    /// `Err(StoreError::NotFound)` when the collection does not exist
    async fn get_collection(&self, workspace: &str, collection: &str) -> Result<(), StoreError>;

    /// Create a collection whose documents expire after `retention`
    /// (zero keeps them forever)
    async fn create_collection(
        &self,
        workspace: &str,
        collection: &str,
        retention: Duration,
    ) -> Result<(), StoreError>;
}

/// Quote an identifier, doubling embedded quotes
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Table reference for a collection, e.g. `"tracing.spans"`
pub fn collection_ref(workspace: &str, collection: &str) -> String {
    quote_identifier(&format!("{}.{}", workspace, collection))
}
