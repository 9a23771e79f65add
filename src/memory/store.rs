//! SQLite table of per-user interaction summaries.
//!
//! Records are keyed by user only; sessions never appear here.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};

use crate::core::errors::ApiError;
use crate::vector_math::{cosine_similarity, deserialize_embedding, serialize_embedding};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub user_id: String,
    pub summary: String,
    /// `"up"`, `"down"` or empty.
    pub feedback: String,
    pub created_at: String,
}

#[derive(Clone)]
pub struct MemoryStore {
    pool: SqlitePool,
}

impl MemoryStore {
    pub async fn new(db_path: PathBuf) -> Result<Self, ApiError> {
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(ApiError::store)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS user_memory (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                summary TEXT NOT NULL,
                feedback TEXT NOT NULL DEFAULT '',
                embedding BLOB,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .map_err(ApiError::store)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_user_memory_user ON user_memory(user_id, feedback)",
        )
        .execute(&pool)
        .await
        .map_err(ApiError::store)?;

        Ok(Self { pool })
    }

    pub async fn insert(&self, record: &MemoryRecord, embedding: &[f32]) -> Result<(), ApiError> {
        sqlx::query(
            "INSERT OR REPLACE INTO user_memory (id, user_id, summary, feedback, embedding, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&record.id)
        .bind(&record.user_id)
        .bind(&record.summary)
        .bind(&record.feedback)
        .bind(serialize_embedding(embedding))
        .bind(&record.created_at)
        .execute(&self.pool)
        .await
        .map_err(ApiError::store)?;
        Ok(())
    }

    /// The user's records closest to `query_embedding`, best first.
    pub async fn search(
        &self,
        user_id: &str,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<(MemoryRecord, f32)>, ApiError> {
        let rows = sqlx::query(
            "SELECT id, user_id, summary, feedback, created_at, embedding
             FROM user_memory WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::store)?;

        let mut scored: Vec<(MemoryRecord, f32)> = rows
            .iter()
            .filter_map(|row| {
                let bytes: Option<Vec<u8>> = row.get("embedding");
                let bytes = bytes.filter(|b| !b.is_empty())?;
                let score = cosine_similarity(query_embedding, &deserialize_embedding(&bytes));
                Some((Self::row_to_record(row), score))
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    /// Oldest-first records carrying the given feedback value.
    pub async fn with_feedback(
        &self,
        user_id: &str,
        feedback: &str,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, ApiError> {
        let rows = sqlx::query(
            "SELECT id, user_id, summary, feedback, created_at
             FROM user_memory WHERE user_id = ? AND feedback = ?
             ORDER BY created_at ASC, rowid ASC LIMIT ?",
        )
        .bind(user_id)
        .bind(feedback)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::store)?;

        Ok(rows.iter().map(Self::row_to_record).collect())
    }

    pub async fn count_for_user(&self, user_id: &str) -> Result<usize, ApiError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_memory WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(ApiError::store)?;
        Ok(count.max(0) as usize)
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> MemoryRecord {
        MemoryRecord {
            id: row.get("id"),
            user_id: row.get("user_id"),
            summary: row.get("summary"),
            feedback: row.get("feedback"),
            created_at: row.get("created_at"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> MemoryStore {
        let tmp = std::env::temp_dir().join(format!("docquery-memory-store-{}.db", uuid::Uuid::new_v4()));
        MemoryStore::new(tmp).await.unwrap()
    }

    fn record(id: &str, user: &str, summary: &str, feedback: &str, created_at: &str) -> MemoryRecord {
        MemoryRecord {
            id: id.to_string(),
            user_id: user.to_string(),
            summary: summary.to_string(),
            feedback: feedback.to_string(),
            created_at: created_at.to_string(),
        }
    }

    #[tokio::test]
    async fn search_is_scoped_to_user_and_ranked() {
        let store = test_store().await;
        store
            .insert(&record("m1", "alice", "near", "", "2026-01-01T00:00:00Z"), &[1.0, 0.0])
            .await
            .unwrap();
        store
            .insert(&record("m2", "alice", "far", "", "2026-01-01T00:00:01Z"), &[0.0, 1.0])
            .await
            .unwrap();
        store
            .insert(&record("m3", "bob", "bob's", "", "2026-01-01T00:00:02Z"), &[1.0, 0.0])
            .await
            .unwrap();

        let results = store.search("alice", &[1.0, 0.1], 5).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0.summary, "near");
        assert!(results.iter().all(|(r, _)| r.user_id == "alice"));
    }

    #[tokio::test]
    async fn feedback_lookup_is_oldest_first_and_limited() {
        let store = test_store().await;
        for i in 0..4 {
            store
                .insert(
                    &record(&format!("m{i}"), "alice", &format!("liked {i}"), "up", &format!("2026-01-01T00:00:0{i}Z")),
                    &[1.0],
                )
                .await
                .unwrap();
        }
        store
            .insert(&record("d", "alice", "disliked", "down", "2026-01-01T00:00:09Z"), &[1.0])
            .await
            .unwrap();

        let liked = store.with_feedback("alice", "up", 3).await.unwrap();

        assert_eq!(liked.len(), 3);
        assert_eq!(liked[0].summary, "liked 0");
        assert_eq!(store.count_for_user("alice").await.unwrap(), 5);
    }
}
