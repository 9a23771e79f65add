//! SQLite-backed RAG store implementation.
//!
//! In-process vector store using SQLite for metadata and
//! brute-force cosine similarity for search.

use std::path::PathBuf;

use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions,
    SqliteSynchronous,
};
use sqlx::query::Query;
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool};

use super::store::{ChunkFilter, ChunkSearchResult, RagStore, StoredChunk};
use crate::core::config::AppPaths;
use crate::core::errors::ApiError;
use crate::vector_math::{cosine_similarity, deserialize_embedding, serialize_embedding};

const CHUNK_COLUMNS: &str = "chunk_id, content, document_id, session_id, user_id, ordinal, pages";

pub struct SqliteRagStore {
    pool: SqlitePool,
}

impl SqliteRagStore {
    pub async fn new(paths: &AppPaths) -> Result<Self, ApiError> {
        Self::with_path(paths.rag_db_path.clone()).await
    }

    pub async fn with_path(db_path: PathBuf) -> Result<Self, ApiError> {
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(ApiError::store)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS rag_chunks (
                chunk_id TEXT NOT NULL,
                content TEXT NOT NULL,
                document_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                ordinal INTEGER NOT NULL DEFAULT 0,
                pages TEXT NOT NULL DEFAULT '[]',
                embedding BLOB,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')),
                PRIMARY KEY (session_id, user_id, chunk_id)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::store)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_rag_session_user ON rag_chunks(session_id, user_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::store)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_rag_document ON rag_chunks(document_id)")
            .execute(&self.pool)
            .await
            .map_err(ApiError::store)?;

        Ok(())
    }

    /// `WHERE` clause for the populated filter fields, with its bind values
    /// in placeholder order.
    fn where_clause(filter: &ChunkFilter) -> (String, Vec<&str>) {
        let mut conditions = Vec::new();
        let mut binds = Vec::new();

        if let Some(session_id) = filter.session_id.as_deref() {
            conditions.push("session_id = ?");
            binds.push(session_id);
        }
        if let Some(user_id) = filter.user_id.as_deref() {
            conditions.push("user_id = ?");
            binds.push(user_id);
        }
        if let Some(document_id) = filter.document_id.as_deref() {
            conditions.push("document_id = ?");
            binds.push(document_id);
        }

        if conditions.is_empty() {
            (String::new(), binds)
        } else {
            (format!(" WHERE {}", conditions.join(" AND ")), binds)
        }
    }

    fn bind_all<'q>(
        mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
        binds: Vec<&'q str>,
    ) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        for value in binds {
            query = query.bind(value);
        }
        query
    }

    fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> StoredChunk {
        let pages_str: String = row.get("pages");
        let ordinal: i64 = row.get("ordinal");

        StoredChunk {
            chunk_id: row.get("chunk_id"),
            content: row.get("content"),
            document_id: row.get("document_id"),
            session_id: row.get("session_id"),
            user_id: row.get("user_id"),
            ordinal: ordinal.max(0) as u32,
            pages: serde_json::from_str(&pages_str).unwrap_or_default(),
        }
    }

    async fn insert_chunks(
        conn: &mut SqliteConnection,
        items: &[(StoredChunk, Vec<f32>)],
    ) -> Result<(), ApiError> {
        for (chunk, embedding) in items {
            let blob = serialize_embedding(embedding);
            let pages = serde_json::to_string(&chunk.pages).map_err(ApiError::internal)?;

            sqlx::query(
                "INSERT OR REPLACE INTO rag_chunks
                    (chunk_id, content, document_id, session_id, user_id, ordinal, pages, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )
            .bind(&chunk.chunk_id)
            .bind(&chunk.content)
            .bind(&chunk.document_id)
            .bind(&chunk.session_id)
            .bind(&chunk.user_id)
            .bind(chunk.ordinal as i64)
            .bind(&pages)
            .bind(&blob)
            .execute(&mut *conn)
            .await
            .map_err(ApiError::store)?;
        }
        Ok(())
    }

    fn reject_unscoped(filter: &ChunkFilter, operation: &str) -> Result<(), ApiError> {
        if filter.is_empty() {
            return Err(ApiError::BadRequest(format!(
                "Refusing unscoped {} on the shared chunk index",
                operation
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RagStore for SqliteRagStore {
    async fn upsert(&self, items: Vec<(StoredChunk, Vec<f32>)>) -> Result<(), ApiError> {
        if items.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(ApiError::store)?;
        Self::insert_chunks(&mut *tx, &items).await?;
        tx.commit().await.map_err(ApiError::store)?;
        Ok(())
    }

    async fn replace_document(
        &self,
        scope: &ChunkFilter,
        items: Vec<(StoredChunk, Vec<f32>)>,
    ) -> Result<(), ApiError> {
        let (Some(session_id), Some(user_id), Some(document_id)) = (
            scope.session_id.as_deref(),
            scope.user_id.as_deref(),
            scope.document_id.as_deref(),
        ) else {
            return Err(ApiError::BadRequest(
                "Replacing a document needs its session, user and document id".to_string(),
            ));
        };
        if let Some((stray, _)) = items.iter().find(|(chunk, _)| !scope.matches(chunk)) {
            return Err(ApiError::BadRequest(format!(
                "Chunk {} does not belong to document {}",
                stray.chunk_id, document_id
            )));
        }

        let mut tx = self.pool.begin().await.map_err(ApiError::store)?;
        Self::insert_chunks(&mut *tx, &items).await?;

        let stale = sqlx::query(
            "DELETE FROM rag_chunks
             WHERE session_id = ? AND user_id = ? AND document_id = ? AND ordinal >= ?",
        )
        .bind(session_id)
        .bind(user_id)
        .bind(document_id)
        .bind(items.len() as i64)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::store)?;

        tx.commit().await.map_err(ApiError::store)?;

        if stale.rows_affected() > 0 {
            tracing::debug!(
                "Dropped {} stale chunks of document {}",
                stale.rows_affected(),
                document_id
            );
        }
        Ok(())
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        limit: usize,
        filter: &ChunkFilter,
    ) -> Result<Vec<ChunkSearchResult>, ApiError> {
        Self::reject_unscoped(filter, "search")?;

        let (clause, binds) = Self::where_clause(filter);
        let sql = format!("SELECT {}, embedding FROM rag_chunks{}", CHUNK_COLUMNS, clause);
        let rows = Self::bind_all(sqlx::query(&sql), binds)
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::store)?;

        let mut scored: Vec<ChunkSearchResult> = rows
            .iter()
            .filter_map(|row| {
                let embedding_bytes: Option<Vec<u8>> = row.get("embedding");
                let embedding_bytes = embedding_bytes.filter(|bytes| !bytes.is_empty())?;
                let stored_emb = deserialize_embedding(&embedding_bytes);

                Some(ChunkSearchResult {
                    score: cosine_similarity(query_embedding, &stored_emb),
                    chunk: Self::row_to_chunk(row),
                })
            })
            .filter(|result| filter.matches(&result.chunk))
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit.max(1));

        Ok(scored)
    }

    async fn delete(&self, filter: &ChunkFilter) -> Result<usize, ApiError> {
        Self::reject_unscoped(filter, "delete")?;

        let (clause, binds) = Self::where_clause(filter);
        let sql = format!("DELETE FROM rag_chunks{}", clause);
        let result = Self::bind_all(sqlx::query(&sql), binds)
            .execute(&self.pool)
            .await
            .map_err(ApiError::store)?;

        Ok(result.rows_affected() as usize)
    }

    async fn count(&self, filter: &ChunkFilter) -> Result<usize, ApiError> {
        let (clause, binds) = Self::where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM rag_chunks{}", clause);
        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for value in binds {
            query = query.bind(value);
        }
        let count = query.fetch_one(&self.pool).await.map_err(ApiError::store)?;

        Ok(count.max(0) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> SqliteRagStore {
        let tmp = std::env::temp_dir().join(format!("docquery-rag-test-{}.db", uuid::Uuid::new_v4()));
        SqliteRagStore::with_path(tmp).await.unwrap()
    }

    fn make_chunk(document: &str, ordinal: u32, session: &str, user: &str, content: &str) -> StoredChunk {
        StoredChunk {
            chunk_id: StoredChunk::chunk_id_for(document, ordinal),
            content: content.to_string(),
            document_id: document.to_string(),
            session_id: session.to_string(),
            user_id: user.to_string(),
            ordinal,
            pages: vec![ordinal + 1],
        }
    }

    #[tokio::test]
    async fn upsert_and_search() {
        let store = test_store().await;
        let embedding = vec![1.0, 0.0, 0.0];

        store
            .upsert(vec![(make_chunk("d1", 0, "s1", "u1", "Hello world"), embedding.clone())])
            .await
            .unwrap();
        assert_eq!(store.count(&ChunkFilter::default()).await.unwrap(), 1);

        let results = store
            .search(&embedding, 10, &ChunkFilter::session("s1").for_user("u1"))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.chunk_id, "d1_chunk_0");
        assert_eq!(results[0].chunk.pages, vec![1]);
        assert!(results[0].score > 0.99);
    }

    #[tokio::test]
    async fn upsert_is_idempotent_by_chunk_id() {
        let store = test_store().await;
        let items = || {
            vec![
                (make_chunk("d1", 0, "s1", "u1", "alpha"), vec![1.0, 0.0]),
                (make_chunk("d1", 1, "s1", "u1", "beta"), vec![0.0, 1.0]),
            ]
        };

        store.upsert(items()).await.unwrap();
        store.upsert(items()).await.unwrap();

        assert_eq!(store.count(&ChunkFilter::document("d1")).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn search_never_crosses_session_or_user() {
        let store = test_store().await;
        let near_duplicate = vec![0.9, 0.1];

        store
            .upsert(vec![
                (make_chunk("a", 0, "sA", "uA", "cell biology"), vec![0.5, 0.5]),
                (make_chunk("b", 0, "sB", "uB", "cell biology!"), near_duplicate.clone()),
                (make_chunk("c", 0, "sA", "uB", "cell biology?"), near_duplicate.clone()),
            ])
            .await
            .unwrap();

        for k in [0, 1, 3, 100] {
            let results = store
                .search(&near_duplicate, k, &ChunkFilter::session("sA").for_user("uA"))
                .await
                .unwrap();
            assert_eq!(results.len(), 1, "k = {k}");
            assert_eq!(results[0].chunk.document_id, "a");
        }
    }

    #[tokio::test]
    async fn search_orders_by_similarity_and_clamps_k() {
        let store = test_store().await;
        store
            .upsert(vec![
                (make_chunk("d", 0, "s", "u", "far"), vec![0.0, 1.0]),
                (make_chunk("d", 1, "s", "u", "near"), vec![1.0, 0.1]),
                (make_chunk("d", 2, "s", "u", "mid"), vec![0.6, 0.6]),
            ])
            .await
            .unwrap();

        let filter = ChunkFilter::session("s");
        let results = store.search(&[1.0, 0.0], 50, &filter).await.unwrap();
        let contents: Vec<&str> = results.iter().map(|r| r.chunk.content.as_str()).collect();
        assert_eq!(contents, vec!["near", "mid", "far"]);

        let single = store.search(&[1.0, 0.0], 0, &filter).await.unwrap();
        assert_eq!(single.len(), 1);
    }

    #[tokio::test]
    async fn delete_by_document_and_session() {
        let store = test_store().await;
        store
            .upsert(vec![
                (make_chunk("d1", 0, "s1", "u1", "x"), vec![1.0]),
                (make_chunk("d2", 0, "s1", "u1", "y"), vec![1.0]),
                (make_chunk("d3", 0, "s2", "u1", "z"), vec![1.0]),
            ])
            .await
            .unwrap();

        assert_eq!(store.delete(&ChunkFilter::document("d1")).await.unwrap(), 1);
        assert_eq!(store.delete(&ChunkFilter::session("s1")).await.unwrap(), 1);
        assert_eq!(store.count(&ChunkFilter::default()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn same_chunk_id_for_two_owners_keeps_both_rows() {
        let store = test_store().await;
        store
            .upsert(vec![(make_chunk("notes", 0, "s_alice", "alice", "alice's notes"), vec![1.0, 0.0])])
            .await
            .unwrap();
        store
            .upsert(vec![(make_chunk("notes", 0, "s_bob", "bob", "bob's notes"), vec![1.0, 0.0])])
            .await
            .unwrap();

        let alice = store
            .search(&[1.0, 0.0], 5, &ChunkFilter::session("s_alice").for_user("alice"))
            .await
            .unwrap();
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].chunk.content, "alice's notes");

        let removed = store
            .delete(&ChunkFilter::owned_document("notes", "s_alice", "alice"))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(
            store.count(&ChunkFilter::session("s_bob").for_user("bob")).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn replace_document_drops_stale_ordinals_of_that_owner_only() {
        let store = test_store().await;
        let long_version = |session: &str, user: &str| -> Vec<(StoredChunk, Vec<f32>)> {
            (0..4)
                .map(|i| (make_chunk("d", i, session, user, "old"), vec![1.0, 0.0]))
                .collect()
        };
        store.upsert(long_version("s1", "u1")).await.unwrap();
        store.upsert(long_version("s2", "u2")).await.unwrap();

        let scope = ChunkFilter::owned_document("d", "s1", "u1");
        store
            .replace_document(
                &scope,
                vec![
                    (make_chunk("d", 0, "s1", "u1", "new"), vec![1.0, 0.0]),
                    (make_chunk("d", 1, "s1", "u1", "new"), vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        let remaining = store.search(&[1.0, 0.0], 10, &scope).await.unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|r| r.chunk.content == "new"));
        assert_eq!(
            store.count(&ChunkFilter::owned_document("d", "s2", "u2")).await.unwrap(),
            4
        );
    }

    #[tokio::test]
    async fn replace_document_rejects_partial_scope_and_foreign_chunks() {
        let store = test_store().await;

        let partial = store
            .replace_document(
                &ChunkFilter::document("d"),
                vec![(make_chunk("d", 0, "s1", "u1", "x"), vec![1.0])],
            )
            .await;
        assert!(matches!(partial, Err(ApiError::BadRequest(_))));

        let foreign = store
            .replace_document(
                &ChunkFilter::owned_document("d", "s1", "u1"),
                vec![(make_chunk("d", 0, "s1", "u2", "x"), vec![1.0])],
            )
            .await;
        assert!(matches!(foreign, Err(ApiError::BadRequest(_))));
        assert_eq!(store.count(&ChunkFilter::default()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unscoped_delete_and_search_are_rejected() {
        let store = test_store().await;
        store
            .upsert(vec![(make_chunk("d1", 0, "s1", "u1", "x"), vec![1.0])])
            .await
            .unwrap();

        let err = store.delete(&ChunkFilter::default()).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
        assert!(store.search(&[1.0], 1, &ChunkFilter::default()).await.is_err());
        assert_eq!(store.count(&ChunkFilter::default()).await.unwrap(), 1);
    }
}
