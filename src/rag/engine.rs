//! RAG orchestrator.
//!
//! Owns the per-document lifecycle: extract, chunk, embed, store, query,
//! delete. Queries are fail-open; indexing is all-or-nothing.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::chunker::{Chunker, PageText};
use super::extract::Extractor;
use super::store::{ChunkFilter, ChunkSearchResult, RagStore, StoredChunk};
use crate::core::config::RagSettings;
use crate::core::errors::ApiError;
use crate::llm::EmbeddingGateway;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub chunk_count: usize,
    pub page_count: usize,
    pub extracted_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlIndexStats {
    #[serde(flatten)]
    pub stats: IndexStats,
    pub file_type: String,
}

/// One retrieved chunk with the metadata needed for citation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub text: String,
    pub chunk_id: String,
    pub document_id: String,
    pub pages: Vec<u32>,
    pub score: f32,
}

impl From<ChunkSearchResult> for RetrievedChunk {
    fn from(result: ChunkSearchResult) -> Self {
        Self {
            text: result.chunk.content,
            chunk_id: result.chunk.chunk_id,
            document_id: result.chunk.document_id,
            pages: result.chunk.pages,
            score: result.score,
        }
    }
}

/// Ranked chunks, best first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub chunks: Vec<RetrievedChunk>,
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn texts(&self) -> Vec<&str> {
        self.chunks.iter().map(|c| c.text.as_str()).collect()
    }
}

/// A citation shown alongside an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub index: usize,
    pub excerpt: String,
    pub pages: Vec<u32>,
}

/// Stable id for one uploaded file within one session.
pub fn derive_document_id(session_id: &str, file_name: &str, content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(session_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(file_name.as_bytes());
    hasher.update([0u8]);
    hasher.update(content);
    let digest = hex::encode(hasher.finalize());
    format!("doc_{}", &digest[..24])
}

/// Citations with excerpts of at most `excerpt_chars` characters (plus an
/// ellipsis when cut).
pub fn build_sources(chunks: &[RetrievedChunk], excerpt_chars: usize) -> Vec<Source> {
    chunks
        .iter()
        .enumerate()
        .map(|(idx, chunk)| {
            let excerpt = if chunk.text.chars().count() > excerpt_chars {
                let cut: String = chunk.text.chars().take(excerpt_chars).collect();
                format!("{}...", cut)
            } else {
                chunk.text.clone()
            };
            Source {
                index: idx + 1,
                excerpt: excerpt.trim().to_string(),
                pages: chunk.pages.clone(),
            }
        })
        .collect()
}

pub struct RagEngine {
    chunker: Chunker,
    embeddings: EmbeddingGateway,
    store: Arc<dyn RagStore>,
    extractor: Arc<dyn Extractor>,
    http: reqwest::Client,
    scratch_dir: PathBuf,
    excerpt_chars: usize,
}

impl RagEngine {
    pub fn new(
        settings: &RagSettings,
        embeddings: EmbeddingGateway,
        store: Arc<dyn RagStore>,
        extractor: Arc<dyn Extractor>,
        scratch_dir: PathBuf,
    ) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.download_timeout_secs))
            .build()
            .map_err(ApiError::internal)?;

        Ok(Self {
            chunker: Chunker::new(settings.chunk_size, settings.chunk_overlap),
            embeddings,
            store,
            extractor,
            http,
            scratch_dir,
            excerpt_chars: settings.excerpt_chars,
        })
    }

    pub fn store(&self) -> &Arc<dyn RagStore> {
        &self.store
    }

    /// Extract a file and index its pages.
    pub async fn index(
        &self,
        file: &Path,
        document_id: &str,
        session_id: &str,
        user_id: &str,
    ) -> Result<IndexStats, ApiError> {
        let pages = self.extractor.extract(file).await?;
        if pages.iter().all(|page| page.text.trim().is_empty()) {
            return Err(ApiError::Extraction(format!(
                "No text could be extracted from {}",
                file.display()
            )));
        }
        self.index_pages(pages, document_id, session_id, user_id).await
    }

    /// Chunk, embed and store already-extracted pages.
    ///
    /// Every chunk is embedded before anything is written, so a failure
    /// leaves the store untouched. The new chunks replace the document's
    /// previous chunks within this session and user only.
    pub async fn index_pages(
        &self,
        pages: Vec<PageText>,
        document_id: &str,
        session_id: &str,
        user_id: &str,
    ) -> Result<IndexStats, ApiError> {
        let chunks = self.chunker.chunk(&pages);
        if chunks.is_empty() {
            return Err(ApiError::Extraction(format!(
                "Document {} has no text to index",
                document_id
            )));
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embeddings.embed(&texts).await?;

        let items: Vec<(StoredChunk, Vec<f32>)> = chunks
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(ordinal, (chunk, vector))| {
                let ordinal = ordinal as u32;
                (
                    StoredChunk {
                        chunk_id: StoredChunk::chunk_id_for(document_id, ordinal),
                        content: chunk.text,
                        document_id: document_id.to_string(),
                        session_id: session_id.to_string(),
                        user_id: user_id.to_string(),
                        ordinal,
                        pages: chunk.source_pages,
                    },
                    vector,
                )
            })
            .collect();
        let chunk_count = items.len();

        self.store
            .replace_document(
                &ChunkFilter::owned_document(document_id, session_id, user_id),
                items,
            )
            .await?;

        let extracted_text = pages
            .iter()
            .map(|page| page.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        tracing::info!(
            "Indexed document {} for session {}: {} chunks from {} pages",
            document_id,
            session_id,
            chunk_count,
            pages.len()
        );

        Ok(IndexStats {
            chunk_count,
            page_count: pages.len(),
            extracted_text,
        })
    }

    /// Download a remote file to scratch space and index it. The scratch
    /// file is removed whether or not indexing succeeds.
    pub async fn index_from_url(
        &self,
        url: &str,
        file_name: &str,
        document_id: &str,
        session_id: &str,
        user_id: &str,
    ) -> Result<UrlIndexStats, ApiError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ApiError::Extraction(format!("Download failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(ApiError::Extraction(format!(
                "Download failed with status {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ApiError::Extraction(format!("Download failed: {}", e)))?;

        let safe_name: String = file_name
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let scratch = self
            .scratch_dir
            .join(format!("{}_{}", uuid::Uuid::new_v4().simple(), safe_name));
        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(ApiError::internal)?;
        tokio::fs::write(&scratch, &bytes)
            .await
            .map_err(ApiError::internal)?;

        let result = self.index(&scratch, document_id, session_id, user_id).await;

        if let Err(err) = tokio::fs::remove_file(&scratch).await {
            tracing::warn!("Failed to remove scratch file {}: {}", scratch.display(), err);
        }

        let file_type = Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        Ok(UrlIndexStats {
            stats: result?,
            file_type,
        })
    }

    /// Ranked chunks for a question within one user's session.
    ///
    /// Never fails: embedding or store errors yield an empty result.
    pub async fn query(
        &self,
        question: &str,
        session_id: &str,
        user_id: &str,
        n_results: usize,
    ) -> QueryResult {
        let query_vector = match self.embeddings.embed_one(question).await {
            Ok(vector) => vector,
            Err(err) => {
                tracing::warn!("RAG query embedding failed: {}", err);
                return QueryResult::default();
            }
        };

        let filter = ChunkFilter::session(session_id).for_user(user_id);
        let results = match self.store.search(&query_vector, n_results, &filter).await {
            Ok(results) => results,
            Err(err) => {
                tracing::warn!("RAG query failed for session {}: {}", session_id, err);
                return QueryResult::default();
            }
        };

        if !results.is_empty() {
            return QueryResult {
                chunks: results.into_iter().map(RetrievedChunk::from).collect(),
            };
        }

        self.session_only_fallback(&query_vector, session_id, user_id, n_results)
            .await
    }

    /// Retry a query with the session-only filter when the compound filter
    /// found nothing, keeping only the requesting user's records.
    async fn session_only_fallback(
        &self,
        query_vector: &[f32],
        session_id: &str,
        user_id: &str,
        n_results: usize,
    ) -> QueryResult {
        let session_filter = ChunkFilter::session(session_id);
        match self.store.count(&session_filter).await {
            Ok(0) => return QueryResult::default(),
            Ok(_) => {}
            Err(err) => {
                tracing::warn!("RAG fallback count failed for session {}: {}", session_id, err);
                return QueryResult::default();
            }
        }

        tracing::warn!(
            "RAG compound filter returned 0 chunks for session={} user={}; retrying with session_id-only filter",
            session_id,
            user_id
        );

        match self.store.search(query_vector, n_results, &session_filter).await {
            Ok(results) => {
                let total = results.len();
                let chunks: Vec<RetrievedChunk> = results
                    .into_iter()
                    .filter(|r| r.chunk.user_id == user_id)
                    .map(RetrievedChunk::from)
                    .collect();
                if chunks.len() < total {
                    tracing::warn!(
                        "RAG fallback dropped {} chunks owned by other users in session {}",
                        total - chunks.len(),
                        session_id
                    );
                }
                QueryResult { chunks }
            }
            Err(err) => {
                tracing::warn!("RAG fallback query failed for session {}: {}", session_id, err);
                QueryResult::default()
            }
        }
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<usize, ApiError> {
        let deleted = self.store.delete(&ChunkFilter::session(session_id)).await?;
        tracing::info!("Deleted {} chunks for session {}", deleted, session_id);
        Ok(deleted)
    }

    /// Delete one document's chunks within a user's session.
    pub async fn delete_document(
        &self,
        document_id: &str,
        session_id: &str,
        user_id: &str,
    ) -> Result<usize, ApiError> {
        let filter = ChunkFilter::owned_document(document_id, session_id, user_id);
        let deleted = self.store.delete(&filter).await?;
        tracing::info!(
            "Deleted {} chunks for document {} in session {}",
            deleted,
            document_id,
            session_id
        );
        Ok(deleted)
    }

    pub fn build_sources(&self, chunks: &[RetrievedChunk]) -> Vec<Source> {
        build_sources(chunks, self.excerpt_chars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::test_support::{HashEmbedder, ScriptedProvider};
    use crate::llm::LlmProvider;
    use crate::rag::extract::PlainTextExtractor;
    use crate::rag::sqlite::SqliteRagStore;

    async fn engine_with(provider: Arc<dyn LlmProvider>) -> (RagEngine, Arc<dyn RagStore>) {
        let db = std::env::temp_dir().join(format!("docquery-engine-test-{}.db", uuid::Uuid::new_v4()));
        let store: Arc<dyn RagStore> = Arc::new(SqliteRagStore::with_path(db).await.unwrap());
        let engine = RagEngine::new(
            &RagSettings::default(),
            EmbeddingGateway::new(provider, "test-embed", 64),
            store.clone(),
            Arc::new(PlainTextExtractor::default()),
            std::env::temp_dir().join("docquery-engine-scratch"),
        )
        .unwrap();
        (engine, store)
    }

    async fn engine() -> (RagEngine, Arc<dyn RagStore>) {
        engine_with(Arc::new(HashEmbedder::default())).await
    }

    fn three_pages() -> Vec<PageText> {
        vec![
            PageText::new(1, "Page1 text about photosynthesis."),
            PageText::new(2, "Page2 text about cellular respiration."),
            PageText::new(3, "Page3 text about fermentation."),
        ]
    }

    #[tokio::test]
    async fn index_then_query_returns_page_provenance() {
        let (engine, _) = engine().await;

        let stats = engine
            .index_pages(three_pages(), "doc1", "S1", "U1")
            .await
            .unwrap();
        assert_eq!(stats.page_count, 3);
        assert!(stats.chunk_count >= 1);
        assert!(stats.extracted_text.contains("Page2 text"));

        let result = engine.query("What is in page 2?", "S1", "U1", 3).await;
        assert!(!result.is_empty());
        assert!(result.chunks.iter().any(|c| c.pages.contains(&2)));

        let other_session = engine.query("What is in page 2?", "S2", "U1", 3).await;
        assert!(other_session.is_empty());
    }

    #[tokio::test]
    async fn reindexing_same_document_does_not_duplicate() {
        let (engine, store) = engine().await;

        let first = engine.index_pages(three_pages(), "doc1", "S1", "U1").await.unwrap();
        engine.index_pages(three_pages(), "doc1", "S1", "U1").await.unwrap();

        let count = store.count(&ChunkFilter::document("doc1")).await.unwrap();
        assert_eq!(count, first.chunk_count);
    }

    #[tokio::test]
    async fn empty_extraction_fails_without_writing() {
        let (engine, store) = engine().await;

        let err = engine
            .index_pages(vec![PageText::new(1, "   ")], "doc1", "S1", "U1")
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::Extraction(_)));
        assert_eq!(store.count(&ChunkFilter::default()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn embedding_failure_leaves_no_partial_state_and_query_fails_open() {
        let (engine, store) = engine_with(Arc::new(ScriptedProvider::failing())).await;

        assert!(engine.index_pages(three_pages(), "doc1", "S1", "U1").await.is_err());
        assert_eq!(store.count(&ChunkFilter::default()).await.unwrap(), 0);
        assert!(engine.query("anything", "S1", "U1", 5).await.is_empty());
    }

    #[tokio::test]
    async fn other_users_in_same_session_are_never_returned() {
        let (engine, _) = engine().await;
        engine.index_pages(three_pages(), "docA", "shared", "alice").await.unwrap();

        let result = engine.query("photosynthesis", "shared", "mallory", 10).await;

        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn delete_session_and_document_cascade() {
        let (engine, store) = engine().await;
        engine.index_pages(three_pages(), "doc1", "S1", "U1").await.unwrap();
        engine.index_pages(three_pages(), "doc2", "S1", "U1").await.unwrap();
        engine.index_pages(three_pages(), "doc3", "S2", "U1").await.unwrap();

        assert!(engine.delete_document("doc1", "S1", "U1").await.unwrap() > 0);
        assert!(engine.delete_session("S1").await.unwrap() > 0);

        assert!(engine.query("photosynthesis", "S1", "U1", 5).await.is_empty());
        assert!(store.count(&ChunkFilter::document("doc3")).await.unwrap() > 0);
        assert!(!engine.query("fermentation", "S2", "U1", 5).await.is_empty());
    }

    #[tokio::test]
    async fn same_document_id_for_two_users_stays_separate() {
        let (engine, store) = engine().await;
        engine
            .index_pages(vec![PageText::new(1, "Alice studies mitochondria.")], "notes", "S_alice", "alice")
            .await
            .unwrap();
        engine
            .index_pages(vec![PageText::new(1, "Bob studies ribosomes.")], "notes", "S_bob", "bob")
            .await
            .unwrap();

        let alice = engine.query("mitochondria", "S_alice", "alice", 5).await;
        assert_eq!(alice.len(), 1);
        assert!(alice.chunks[0].text.contains("Alice"));

        engine
            .index_pages(vec![PageText::new(1, "Alice studies mitochondria again.")], "notes", "S_alice", "alice")
            .await
            .unwrap();
        let removed = engine.delete_document("notes", "S_alice", "alice").await.unwrap();

        assert_eq!(removed, 1);
        let bob = engine.query("ribosomes", "S_bob", "bob", 5).await;
        assert_eq!(bob.len(), 1);
        assert!(bob.chunks[0].text.contains("Bob"));
        assert_eq!(store.count(&ChunkFilter::document("notes")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn reindexing_shorter_text_drops_stale_chunks() {
        let settings = RagSettings {
            chunk_size: 40,
            chunk_overlap: 5,
            ..RagSettings::default()
        };
        let db = std::env::temp_dir().join(format!("docquery-engine-test-{}.db", uuid::Uuid::new_v4()));
        let store: Arc<dyn RagStore> = Arc::new(SqliteRagStore::with_path(db).await.unwrap());
        let engine = RagEngine::new(
            &settings,
            EmbeddingGateway::new(Arc::new(HashEmbedder::default()), "test-embed", 64),
            store.clone(),
            Arc::new(PlainTextExtractor::default()),
            std::env::temp_dir().join("docquery-engine-scratch"),
        )
        .unwrap();

        let long = engine.index_pages(three_pages(), "doc1", "S1", "U1").await.unwrap();
        assert!(long.chunk_count > 1);
        let short = engine
            .index_pages(vec![PageText::new(1, "Short.")], "doc1", "S1", "U1")
            .await
            .unwrap();

        assert_eq!(short.chunk_count, 1);
        let scope = ChunkFilter::owned_document("doc1", "S1", "U1");
        assert_eq!(store.count(&scope).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn index_reads_files_through_extractor() {
        let (engine, _) = engine().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.md");
        tokio::fs::write(&path, "# Enzymes\n\nEnzymes lower activation energy.")
            .await
            .unwrap();

        let stats = engine.index(&path, "doc-md", "S1", "U1").await.unwrap();

        assert_eq!(stats.page_count, 1);
        assert!(stats.extracted_text.contains("activation energy"));
    }

    #[test]
    fn sources_truncate_excerpts_and_number_from_one() {
        let chunks = vec![
            RetrievedChunk {
                text: "x".repeat(250),
                chunk_id: "d_chunk_0".to_string(),
                document_id: "d".to_string(),
                pages: vec![1, 2],
                score: 0.9,
            },
            RetrievedChunk {
                text: "  short passage  ".to_string(),
                chunk_id: "d_chunk_1".to_string(),
                document_id: "d".to_string(),
                pages: vec![3],
                score: 0.5,
            },
        ];

        let sources = build_sources(&chunks, 200);

        assert_eq!(sources[0].index, 1);
        assert_eq!(sources[0].excerpt.len(), 203);
        assert!(sources[0].excerpt.ends_with("..."));
        assert_eq!(sources[0].pages, vec![1, 2]);
        assert_eq!(sources[1].excerpt, "short passage");
    }

    #[test]
    fn document_ids_are_stable_per_session_and_content() {
        let a = derive_document_id("S1", "notes.txt", b"hello");
        assert_eq!(a, derive_document_id("S1", "notes.txt", b"hello"));
        assert_ne!(a, derive_document_id("S2", "notes.txt", b"hello"));
        assert!(a.starts_with("doc_"));
    }
}
