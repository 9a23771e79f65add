//! Long-term user memory.
//!
//! This module provides:
//! - `MemoryStore`: SQLite table of interaction summaries with embeddings
//! - `MemoryService`: best-effort store / recall / preference digest

mod service;
mod store;

pub use service::MemoryService;
pub use store::{MemoryRecord, MemoryStore};
