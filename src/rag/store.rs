//! RagStore trait: the abstract interface over the shared chunk index.
//!
//! One physical index holds every user's chunks. [`ChunkFilter`] is the only
//! thing standing between tenants, so implementations must apply every
//! populated filter field.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::errors::ApiError;

/// A stored RAG chunk with its ownership metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredChunk {
    /// Deterministic id, `{document_id}_chunk_{ordinal}`. Unique only within
    /// its owning session and user.
    pub chunk_id: String,
    pub content: String,
    pub document_id: String,
    pub session_id: String,
    pub user_id: String,
    /// Position of the chunk within its document.
    pub ordinal: u32,
    /// Source page numbers, sorted.
    pub pages: Vec<u32>,
}

impl StoredChunk {
    pub fn chunk_id_for(document_id: &str, ordinal: u32) -> String {
        format!("{}_chunk_{}", document_id, ordinal)
    }
}

/// Result of a similarity search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkSearchResult {
    pub chunk: StoredChunk,
    /// Cosine similarity (higher = better).
    pub score: f32,
}

/// Conjunctive metadata filter. Every populated field must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkFilter {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub document_id: Option<String>,
}

impl ChunkFilter {
    pub fn session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Self::default()
        }
    }

    pub fn document(document_id: impl Into<String>) -> Self {
        Self {
            document_id: Some(document_id.into()),
            ..Self::default()
        }
    }

    /// One document as owned by one user's session.
    pub fn owned_document(
        document_id: impl Into<String>,
        session_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            session_id: Some(session_id.into()),
            user_id: Some(user_id.into()),
            document_id: Some(document_id.into()),
        }
    }

    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.session_id.is_none() && self.user_id.is_none() && self.document_id.is_none()
    }

    pub fn matches(&self, chunk: &StoredChunk) -> bool {
        self.session_id.as_deref().map_or(true, |s| s == chunk.session_id)
            && self.user_id.as_deref().map_or(true, |u| u == chunk.user_id)
            && self.document_id.as_deref().map_or(true, |d| d == chunk.document_id)
    }
}

#[async_trait]
pub trait RagStore: Send + Sync {
    /// Insert or replace chunks by owner and id, all-or-nothing.
    async fn upsert(&self, items: Vec<(StoredChunk, Vec<f32>)>) -> Result<(), ApiError>;

    /// Make `items` the complete chunk set of one owned document: upsert
    /// them and drop any older chunks of that document past the new count,
    /// in one transaction. Every item must belong to `scope`.
    async fn replace_document(
        &self,
        scope: &ChunkFilter,
        items: Vec<(StoredChunk, Vec<f32>)>,
    ) -> Result<(), ApiError>;

    /// Nearest neighbours among records matching `filter`, best first.
    ///
    /// `limit` is clamped to at least 1; asking for more than exist is fine.
    /// An empty filter is rejected.
    async fn search(
        &self,
        query_embedding: &[f32],
        limit: usize,
        filter: &ChunkFilter,
    ) -> Result<Vec<ChunkSearchResult>, ApiError>;

    /// Delete all matching records. An empty filter is rejected.
    async fn delete(&self, filter: &ChunkFilter) -> Result<usize, ApiError>;

    /// Count matching records. An empty filter counts everything.
    async fn count(&self, filter: &ChunkFilter) -> Result<usize, ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(session: &str, user: &str, document: &str) -> StoredChunk {
        StoredChunk {
            chunk_id: StoredChunk::chunk_id_for(document, 0),
            content: "text".to_string(),
            document_id: document.to_string(),
            session_id: session.to_string(),
            user_id: user.to_string(),
            ordinal: 0,
            pages: vec![1],
        }
    }

    #[test]
    fn chunk_ids_are_deterministic() {
        assert_eq!(StoredChunk::chunk_id_for("doc-1", 3), "doc-1_chunk_3");
    }

    #[test]
    fn filter_fields_are_anded() {
        let filter = ChunkFilter::session("s1").for_user("u1");

        assert!(filter.matches(&chunk("s1", "u1", "d")));
        assert!(!filter.matches(&chunk("s1", "u2", "d")));
        assert!(!filter.matches(&chunk("s2", "u1", "d")));
        assert!(ChunkFilter::default().is_empty());
        assert!(!ChunkFilter::document("d").is_empty());
    }

    #[test]
    fn owned_document_scopes_all_three_fields() {
        let filter = ChunkFilter::owned_document("d", "s1", "u1");

        assert!(filter.matches(&chunk("s1", "u1", "d")));
        assert!(!filter.matches(&chunk("s1", "u2", "d")));
        assert!(!filter.matches(&chunk("s2", "u1", "d")));
        assert!(!filter.matches(&chunk("s1", "u1", "other")));
    }
}
