//! Session, message and document bookkeeping.
//!
//! The retrieval core only needs a handful of hooks from here: open a
//! session, append chat turns with their citations and artifacts, record
//! indexed documents, read recent turns back and attach feedback.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};

use crate::core::errors::ApiError;
use crate::llm::ChatMessage;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub user_id: String,
    pub persona: String,
    pub title: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    // Computed fields
    #[serde(default)]
    pub message_count: i64,
    #[serde(default)]
    pub document_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub id: i64,
    pub session_id: String,
    pub role: String,
    pub content: String,
    /// Sources, artifacts, suggestions and tool calls attached to the turn.
    pub metadata: Option<Value>,
    pub feedback: Option<String>,
    pub created_at: String,
}

impl HistoryMessage {
    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage::new(&self.role, self.content.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub document_id: String,
    pub session_id: String,
    pub file_name: String,
    pub chunk_count: usize,
    pub page_count: usize,
}

#[derive(Clone)]
pub struct HistoryStore {
    pool: SqlitePool,
}

impl HistoryStore {
    pub async fn new(db_path: PathBuf) -> Result<Self, ApiError> {
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| ApiError::internal(format!("Failed to connect to history db: {}", e)))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                persona TEXT NOT NULL DEFAULT '',
                title TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to init sessions table: {}", e)))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                metadata JSON,
                feedback TEXT,
                created_at TEXT NOT NULL,
                PRIMARY KEY (session_id, document_id),
                FOREIGN KEY(session_id) REFERENCES sessions(id) ON DELETE CASCADE
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to init messages table: {}", e)))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (
                document_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                file_name TEXT NOT NULL,
                chunk_count INTEGER NOT NULL DEFAULT 0,
                page_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                FOREIGN KEY(session_id) REFERENCES sessions(id) ON DELETE CASCADE
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to init documents table: {}", e)))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_session_id ON messages(session_id)")
            .execute(&pool)
            .await
            .map_err(|e| ApiError::internal(format!("Failed to create index: {}", e)))?;

        Ok(Self { pool })
    }

    pub async fn create_session(
        &self,
        user_id: &str,
        persona: &str,
        title: Option<String>,
    ) -> Result<String, ApiError> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO sessions (id, user_id, persona, title, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&session_id)
        .bind(user_id)
        .bind(persona)
        .bind(title)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to create session: {}", e)))?;

        Ok(session_id)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<SessionInfo>, ApiError> {
        let row = sqlx::query(
            "SELECT s.id, s.user_id, s.persona, s.title, s.created_at, s.updated_at,
                (SELECT COUNT(*) FROM messages m WHERE m.session_id = s.id) AS msg_count,
                (SELECT COUNT(*) FROM documents d WHERE d.session_id = s.id) AS doc_count
             FROM sessions s WHERE s.id = ?",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(row.map(|row| SessionInfo {
            id: row.try_get::<String, _>("id").unwrap_or_default(),
            user_id: row.try_get::<String, _>("user_id").unwrap_or_default(),
            persona: row.try_get::<String, _>("persona").unwrap_or_default(),
            title: row.try_get::<Option<String>, _>("title").unwrap_or(None),
            created_at: row.try_get::<String, _>("created_at").unwrap_or_default(),
            updated_at: row.try_get::<String, _>("updated_at").unwrap_or_default(),
            message_count: row.try_get::<i64, _>("msg_count").unwrap_or(0),
            document_count: row.try_get::<i64, _>("doc_count").unwrap_or(0),
        }))
    }

    /// Removes the session row; messages and documents cascade.
    pub async fn delete_session(&self, session_id: &str) -> Result<bool, ApiError> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn add_message(
        &self,
        session_id: &str,
        role: &str,
        content: &str,
        metadata: Option<Value>,
    ) -> Result<i64, ApiError> {
        let now = chrono::Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        let touched = sqlx::query("UPDATE sessions SET updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(session_id)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;
        if touched.rows_affected() == 0 {
            return Err(ApiError::NotFound(format!("Session {} not found", session_id)));
        }

        let result = sqlx::query(
            "INSERT INTO messages (session_id, role, content, metadata, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(role)
        .bind(content)
        .bind(metadata)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::internal)?;

        tx.commit().await.map_err(ApiError::internal)?;

        Ok(result.last_insert_rowid())
    }

    /// The last `limit` messages of a session, oldest first.
    pub async fn recent_messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>, ApiError> {
        let rows = sqlx::query(
            "SELECT * FROM (SELECT * FROM messages WHERE session_id = ? ORDER BY id DESC LIMIT ?) ORDER BY id ASC",
        )
        .bind(session_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(rows.iter().map(row_to_message).collect())
    }

    pub async fn get_message(&self, message_id: i64) -> Result<Option<HistoryMessage>, ApiError> {
        let row = sqlx::query("SELECT * FROM messages WHERE id = ?")
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        Ok(row.as_ref().map(row_to_message))
    }

    /// The user turn that a given message answered.
    pub async fn preceding_user_message(
        &self,
        session_id: &str,
        message_id: i64,
    ) -> Result<Option<HistoryMessage>, ApiError> {
        let row = sqlx::query(
            "SELECT * FROM messages WHERE session_id = ? AND id < ? AND role = 'user' ORDER BY id DESC LIMIT 1",
        )
        .bind(session_id)
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::internal)?;
        Ok(row.as_ref().map(row_to_message))
    }

    pub async fn set_feedback(&self, message_id: i64, feedback: &str) -> Result<(), ApiError> {
        let result = sqlx::query("UPDATE messages SET feedback = ? WHERE id = ?")
            .bind(feedback)
            .bind(message_id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound(format!("Message {} not found", message_id)));
        }
        Ok(())
    }

    pub async fn record_document(&self, document: &DocumentRecord) -> Result<(), ApiError> {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT OR REPLACE INTO documents (document_id, session_id, file_name, chunk_count, page_count, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&document.document_id)
        .bind(&document.session_id)
        .bind(&document.file_name)
        .bind(document.chunk_count as i64)
        .bind(document.page_count as i64)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;
        Ok(())
    }

    pub async fn delete_document(&self, session_id: &str, document_id: &str) -> Result<bool, ApiError> {
        let result = sqlx::query("DELETE FROM documents WHERE session_id = ? AND document_id = ?")
            .bind(session_id)
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_documents(&self, session_id: &str) -> Result<Vec<DocumentRecord>, ApiError> {
        let rows = sqlx::query(
            "SELECT document_id, session_id, file_name, chunk_count, page_count FROM documents
             WHERE session_id = ? ORDER BY created_at ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(rows
            .iter()
            .map(|row| DocumentRecord {
                document_id: row.try_get::<String, _>("document_id").unwrap_or_default(),
                session_id: row.try_get::<String, _>("session_id").unwrap_or_default(),
                file_name: row.try_get::<String, _>("file_name").unwrap_or_default(),
                chunk_count: row.try_get::<i64, _>("chunk_count").unwrap_or(0).max(0) as usize,
                page_count: row.try_get::<i64, _>("page_count").unwrap_or(0).max(0) as usize,
            })
            .collect())
    }
}

fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> HistoryMessage {
    HistoryMessage {
        id: row.try_get::<i64, _>("id").unwrap_or_default(),
        session_id: row.try_get::<String, _>("session_id").unwrap_or_default(),
        role: row.try_get::<String, _>("role").unwrap_or_default(),
        content: row.try_get::<String, _>("content").unwrap_or_default(),
        metadata: row.try_get::<Option<Value>, _>("metadata").unwrap_or(None),
        feedback: row.try_get::<Option<String>, _>("feedback").unwrap_or(None),
        created_at: row.try_get::<String, _>("created_at").unwrap_or_default(),
    }
}
