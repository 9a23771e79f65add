use async_trait::async_trait;

use super::types::{ChatCompletion, ChatRequest};
use crate::core::errors::ApiError;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// return the provider name (e.g. "openai", "gemini")
    fn name(&self) -> &str;

    /// chat completion; may return tool calls when `request.tools` is non-empty
    async fn chat(&self, request: ChatRequest, model_id: &str) -> Result<ChatCompletion, ApiError>;

    /// generate embeddings, one per input, in input order
    async fn embed(&self, inputs: &[String], model_id: &str) -> Result<Vec<Vec<f32>>, ApiError>;
}
