//! SQLite document store
//!
//! This module provides a [`DocumentStore`] backed by SQLite with:
//! - Connection pooling
//! - Automatic migrations for the workspace/collection registry
//! - One JSON document table per collection
//! - Cursor-based pagination over arbitrary queries

use super::{
    collection_ref, quote_identifier, Document, DocumentStatus, DocumentStore, Page, Query,
    QueryParam, DOC_COLUMN, ID_FIELD,
};
use crate::error::StoreError;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use dashmap::DashMap;
use serde_json::Value;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow,
};
use sqlx::{Column, Row, Sqlite, TypeInfo, ValueRef};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Documents removed from one collection by a retention purge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeStats {
    pub workspace: String,
    pub collection: String,
    pub deleted: u64,
}

/// Position of an open cursor
#[derive(Debug, Clone)]
struct CursorState {
    query: Query,
    offset: usize,
}

/// SQLite-backed document store
///
/// Manages the SQLite connection pool and the open pagination cursors.
pub struct SqliteDocumentStore {
    pool: SqlitePool,
    cursors: DashMap<String, CursorState>,
}

impl SqliteDocumentStore {
    /// Open (or create) a store with automatic migration
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite database URL (e.g., "sqlite:./data/traces.db")
    ///
    /// # Example
    ///
    /// ```ignore
    /// let store = SqliteDocumentStore::new("sqlite::memory:").await?;
    /// ```
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30))
            .pragma("temp_store", "memory")
            .pragma("synchronous", "NORMAL");

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, running migrations on it
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::debug!("Document store migrations completed");

        Ok(Self {
            pool,
            cursors: DashMap::new(),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Number of cursors still holding state
    pub fn open_cursors(&self) -> usize {
        self.cursors.len()
    }

    /// Delete documents older than their collection's retention
    pub async fn purge_expired(&self) -> Result<Vec<PurgeStats>, StoreError> {
        let collections: Vec<(String, String, i64)> = sqlx::query_as(
            "SELECT workspace, name, retention_secs FROM _collections WHERE retention_secs > 0",
        )
        .fetch_all(&self.pool)
        .await?;

        let now = current_millis();
        let mut stats = Vec::with_capacity(collections.len());

        for (workspace, collection, retention_secs) in collections {
            let cutoff = now.saturating_sub(retention_secs.saturating_mul(1000));
            let sql = format!(
                "DELETE FROM {} WHERE _event_time < ?",
                collection_ref(&workspace, &collection)
            );
            let result = sqlx::query(&sql).bind(cutoff).execute(&self.pool).await?;

            stats.push(PurgeStats {
                workspace,
                collection,
                deleted: result.rows_affected(),
            });
        }

        Ok(stats)
    }

    async fn fetch_documents(
        &self,
        sql: &str,
        params: &[QueryParam],
    ) -> Result<Vec<Document>, StoreError> {
        let rows = bind_params(sqlx::query(sql), params)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_document).collect()
    }

    async fn fetch_page(
        &self,
        query: Query,
        offset: usize,
        page_size: usize,
    ) -> Result<Page, StoreError> {
        let page_size = page_size.max(1);
        let sql = format!("SELECT * FROM ({}) LIMIT ? OFFSET ?", query.sql);

        // One extra row tells us whether another page follows
        let mut params = query.params.clone();
        params.push(QueryParam::Integer(to_i64(page_size + 1)));
        params.push(QueryParam::Integer(to_i64(offset)));

        let mut rows = self.fetch_documents(&sql, &params).await?;

        let next_cursor = if rows.len() > page_size {
            rows.truncate(page_size);
            let cursor = Uuid::new_v4().to_string();
            self.cursors.insert(
                cursor.clone(),
                CursorState {
                    query,
                    offset: offset + page_size,
                },
            );
            Some(cursor)
        } else {
            None
        };

        Ok(Page { rows, next_cursor })
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        self.fetch_documents(&query.sql, &query.params).await
    }

    async fn query_page(&self, query: &Query, page_size: usize) -> Result<Page, StoreError> {
        self.fetch_page(query.clone(), 0, page_size).await
    }

    async fn next_page(&self, cursor: &str, page_size: usize) -> Result<Page, StoreError> {
        let (_, state) = self
            .cursors
            .remove(cursor)
            .ok_or_else(|| StoreError::NotFound(format!("cursor {}", cursor)))?;

        self.fetch_page(state.query, state.offset, page_size).await
    }

    async fn close_cursor(&self, cursor: &str) -> Result<(), StoreError> {
        self.cursors.remove(cursor);
        Ok(())
    }

    async fn add_documents(
        &self,
        workspace: &str,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<Vec<DocumentStatus>, StoreError> {
        self.get_collection(workspace, collection).await?;

        let sql = format!(
            "INSERT INTO {} (_id, _event_time, doc) VALUES (?, ?, ?)
             ON CONFLICT(_id) DO UPDATE SET _event_time = excluded._event_time, doc = excluded.doc",
            collection_ref(workspace, collection)
        );
        let now = current_millis();
        let mut statuses = Vec::with_capacity(documents.len());

        let mut tx = self.pool.begin().await?;

        for document in documents {
            let id = match document.get(ID_FIELD) {
                None => Uuid::new_v4().to_string(),
                Some(Value::String(id)) => id.clone(),
                Some(other) => {
                    statuses.push(DocumentStatus::failed(
                        None,
                        format!("`{}` must be a string, got {}", ID_FIELD, other),
                    ));
                    continue;
                }
            };
            let body = serde_json::to_string(&document)?;

            match sqlx::query(&sql)
                .bind(&id)
                .bind(now)
                .bind(body)
                .execute(&mut *tx)
                .await
            {
                Ok(_) => statuses.push(DocumentStatus::added(id)),
                Err(e) => statuses.push(DocumentStatus::failed(Some(id), e.to_string())),
            }
        }

        tx.commit().await?;

        Ok(statuses)
    }

    async fn get_workspace(&self, workspace: &str) -> Result<(), StoreError> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM _workspaces WHERE name = ?")
            .bind(workspace)
            .fetch_optional(&self.pool)
            .await?;

        match found {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(format!("workspace {}", workspace))),
        }
    }

    async fn create_workspace(&self, workspace: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO _workspaces (name, created_at) VALUES (?, ?) ON CONFLICT(name) DO NOTHING",
        )
        .bind(workspace)
        .bind(current_millis())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists(format!("workspace {}", workspace)));
        }
        Ok(())
    }

    async fn get_collection(&self, workspace: &str, collection: &str) -> Result<(), StoreError> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM _collections WHERE workspace = ? AND name = ?")
                .bind(workspace)
                .bind(collection)
                .fetch_optional(&self.pool)
                .await?;

        match found {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(format!(
                "collection {}.{}",
                workspace, collection
            ))),
        }
    }

    async fn create_collection(
        &self,
        workspace: &str,
        collection: &str,
        retention: Duration,
    ) -> Result<(), StoreError> {
        self.get_workspace(workspace).await?;

        let table = collection_ref(workspace, collection);
        let event_time_index = quote_identifier(&format!("{}.{}._event_time", workspace, collection));
        let retention_secs = i64::try_from(retention.as_secs()).unwrap_or(i64::MAX);

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "INSERT INTO _collections (workspace, name, retention_secs, created_at)
             VALUES (?, ?, ?, ?) ON CONFLICT(workspace, name) DO NOTHING",
        )
        .bind(workspace)
        .bind(collection)
        .bind(retention_secs)
        .bind(current_millis())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists(format!(
                "collection {}.{}",
                workspace, collection
            )));
        }

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                _id TEXT PRIMARY KEY,
                _event_time INTEGER NOT NULL,
                {} TEXT NOT NULL
            )",
            table, DOC_COLUMN
        ))
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} (_event_time)",
            event_time_index, table
        ))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}

fn bind_params<'q>(
    mut query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &'q [QueryParam],
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            QueryParam::Text(text) => query.bind(text.as_str()),
            QueryParam::Integer(value) => query.bind(*value),
        };
    }
    query
}

/// Convert a result row into a document
///
/// Columns map to fields by their storage class; the `doc` column's JSON
/// object is merged into the row instead of being nested.
fn row_to_document(row: &SqliteRow) -> Result<Document, StoreError> {
    let mut document = Document::new();

    for column in row.columns() {
        let name = column.name();
        let ordinal = column.ordinal();

        let type_name = {
            let raw = row.try_get_raw(ordinal)?;
            if raw.is_null() {
                None
            } else {
                Some(raw.type_info().name().to_string())
            }
        };

        let value = match type_name.as_deref() {
            None => Value::Null,
            Some("INTEGER") => Value::from(row.try_get::<i64, _>(ordinal)?),
            Some("REAL") => serde_json::Number::from_f64(row.try_get::<f64, _>(ordinal)?)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Some("BLOB") => Value::String(BASE64.encode(row.try_get::<Vec<u8>, _>(ordinal)?)),
            Some(_) => {
                let text: String = row.try_get(ordinal)?;
                if name == DOC_COLUMN {
                    match serde_json::from_str(&text)? {
                        Value::Object(fields) => {
                            document.extend(fields);
                            continue;
                        }
                        other => other,
                    }
                } else {
                    Value::String(text)
                }
            }
        };

        document.insert(name.to_string(), value);
    }

    Ok(document)
}

fn current_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
