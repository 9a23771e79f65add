//! RAG (Retrieval-Augmented Generation) module.
//!
//! This module provides:
//! - `Chunker`: page-aware recursive text splitting
//! - `RagStore` / `SqliteRagStore`: the shared, filter-scoped chunk index
//! - `RagEngine`: index / query / delete orchestration and citations

pub mod chunker;
pub mod engine;
pub mod extract;
pub mod sqlite;
pub mod store;

pub use chunker::{ChunkedText, Chunker, PageText};
pub use engine::{
    build_sources, derive_document_id, IndexStats, QueryResult, RagEngine, RetrievedChunk, Source,
    UrlIndexStats,
};
pub use extract::{Extractor, PlainTextExtractor};
pub use sqlite::SqliteRagStore;
pub use store::{ChunkFilter, ChunkSearchResult, RagStore, StoredChunk};
