use thiserror::Error;

/// Result alias used by the span store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to the host by read, write and setup operations
#[derive(Debug, Error)]
pub enum Error {
    /// Query parameters rejected before anything was sent to the store
    #[error("Invalid query parameters: {0}")]
    Input(String),

    /// Single-trace fetch matched no rows
    #[error("Trace not found")]
    TraceNotFound,

    /// Failure reported by the document store
    #[error("Upstream store error: {0}")]
    Upstream(#[from] StoreError),

    /// A stored row could not be decoded
    #[error("Malformed document: {0}")]
    Mapping(#[from] MappingError),

    /// The batched writer has been stopped
    #[error("Writer is closed")]
    WriterClosed,

    /// The operation was cancelled before it completed
    #[error("Operation cancelled")]
    Cancelled,
}

/// Errors reported by a [`crate::store::DocumentStore`]
#[derive(Debug, Error)]
pub enum StoreError {
    /// Workspace, collection or cursor does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Workspace or collection was already created
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The store rejected or failed to run a query
    #[error("Query failed: {0}")]
    Query(String),

    /// A document handed to the store is not a JSON object
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}

/// Row data that does not decode into the domain model
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    #[error("missing field `{0}`")]
    MissingField(String),

    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: String, reason: String },
}

impl MappingError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
