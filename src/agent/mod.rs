//! Agentic answer generation: prompt assembly, the bounded tool loop,
//! artifact building and follow-up suggestions.

pub mod artifacts;
pub mod instructions;
pub mod modes;
pub mod runtime;
pub mod suggestions;

pub use artifacts::Artifact;
pub use modes::AnswerMode;
pub use runtime::{AgenticLoop, AnswerRequest, AnswerResult, LoopState, ToolCallRecord};
pub use suggestions::extract_suggestions;
