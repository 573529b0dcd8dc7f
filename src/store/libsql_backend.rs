//! libSQL backend for the conversation store.
//!
//! Contexts live in one row per conversation; log entries are append-only
//! rows ordered by rowid. Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::info;

use crate::error::StoreError;
use crate::store::backend::StoreBackend;

/// libSQL-backed [`StoreBackend`].
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and initialize the schema.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Unavailable {
                reason: format!("Failed to create database directory: {e}"),
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Unavailable {
                reason: format!("Failed to open libSQL database: {e}"),
            })?;

        let conn = db.connect().map_err(|e| StoreError::Unavailable {
            reason: format!("Failed to create connection: {e}"),
        })?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Conversation database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests and demos).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StoreError::Unavailable {
                reason: format!("Failed to create in-memory database: {e}"),
            })?;

        let conn = db.connect().map_err(|e| StoreError::Unavailable {
            reason: format!("Failed to create connection: {e}"),
        })?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        self.conn
            .execute(
                "CREATE TABLE IF NOT EXISTS contexts (
                    conversation_id TEXT PRIMARY KEY,
                    context TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )",
                (),
            )
            .await
            .map_err(|e| classify("init contexts", e))?;

        self.conn
            .execute(
                "CREATE TABLE IF NOT EXISTS processing_log (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    conversation_id TEXT NOT NULL,
                    entry TEXT NOT NULL
                )",
                (),
            )
            .await
            .map_err(|e| classify("init processing_log", e))?;

        self.conn
            .execute(
                "CREATE INDEX IF NOT EXISTS idx_processing_log_conversation
                 ON processing_log (conversation_id, id)",
                (),
            )
            .await
            .map_err(|e| classify("init index", e))?;

        Ok(())
    }
}

/// Map a libsql error, treating lock contention as transient.
fn classify(op: &str, e: libsql::Error) -> StoreError {
    let message = e.to_string();
    if message.contains("locked") || message.contains("busy") {
        StoreError::Unavailable {
            reason: format!("{op}: {message}"),
        }
    } else {
        StoreError::Backend(format!("{op}: {message}"))
    }
}

#[async_trait]
impl StoreBackend for LibSqlBackend {
    async fn get_context(&self, conversation: &str) -> Result<Option<String>, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT context FROM contexts WHERE conversation_id = ?1",
                params![conversation],
            )
            .await
            .map_err(|e| classify("get_context", e))?;

        match rows.next().await.map_err(|e| classify("get_context", e))? {
            Some(row) => {
                let encoded: String = row.get(0).map_err(|e| classify("get_context row", e))?;
                Ok(Some(encoded))
            }
            None => Ok(None),
        }
    }

    async fn put_context(&self, conversation: &str, encoded: &str) -> Result<(), StoreError> {
        let now = chrono::Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO contexts (conversation_id, context, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (conversation_id) DO UPDATE SET context = ?2, updated_at = ?3",
                params![conversation, encoded, now],
            )
            .await
            .map_err(|e| classify("put_context", e))?;
        Ok(())
    }

    async fn append_log(&self, conversation: &str, entry: &str) -> Result<u64, StoreError> {
        self.conn
            .execute(
                "INSERT INTO processing_log (conversation_id, entry) VALUES (?1, ?2)",
                params![conversation, entry],
            )
            .await
            .map_err(|e| classify("append_log", e))?;

        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM processing_log WHERE conversation_id = ?1",
                params![conversation],
            )
            .await
            .map_err(|e| classify("append_log count", e))?;

        match rows.next().await.map_err(|e| classify("append_log count", e))? {
            Some(row) => {
                let count: i64 = row.get(0).map_err(|e| classify("append_log count row", e))?;
                Ok(count as u64)
            }
            None => Ok(0),
        }
    }

    async fn read_log(&self, conversation: &str) -> Result<Vec<String>, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT entry FROM processing_log WHERE conversation_id = ?1 ORDER BY id ASC",
                params![conversation],
            )
            .await
            .map_err(|e| classify("read_log", e))?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await.map_err(|e| classify("read_log", e))? {
            entries.push(row.get::<String>(0).map_err(|e| classify("read_log row", e))?);
        }
        Ok(entries)
    }

    async fn delete_context(&self, conversation: &str) -> Result<(), StoreError> {
        self.conn
            .execute(
                "DELETE FROM contexts WHERE conversation_id = ?1",
                params![conversation],
            )
            .await
            .map_err(|e| classify("delete_context", e))?;
        Ok(())
    }

    async fn delete_log(&self, conversation: &str) -> Result<(), StoreError> {
        self.conn
            .execute(
                "DELETE FROM processing_log WHERE conversation_id = ?1",
                params![conversation],
            )
            .await
            .map_err(|e| classify("delete_log", e))?;
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
