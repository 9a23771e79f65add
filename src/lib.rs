pub mod agent;
pub mod core;
pub mod history;
pub mod llm;
pub mod memory;
pub mod rag;
pub mod service;
pub mod state;
pub mod tools;
pub mod vector_math;
