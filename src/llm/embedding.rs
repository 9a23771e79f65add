//! Embedding Gateway.
//!
//! Uniform `texts -> vectors` interface over whichever provider is
//! configured. Results are all-or-nothing: a short, misaligned or empty
//! response fails the whole call.

use std::sync::Arc;

use super::provider::LlmProvider;
use crate::core::errors::ApiError;

#[derive(Clone)]
pub struct EmbeddingGateway {
    provider: Arc<dyn LlmProvider>,
    model: String,
    batch_size: usize,
}

impl EmbeddingGateway {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>, batch_size: usize) -> Self {
        Self {
            provider,
            model: model.into(),
            batch_size: batch_size.max(1),
        }
    }

    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let embedded = self
                .provider
                .embed(batch, &self.model)
                .await
                .map_err(|e| ApiError::Embedding(e.to_string()))?;

            if embedded.len() != batch.len() {
                return Err(ApiError::Embedding(format!(
                    "{} returned {} vectors for {} inputs",
                    self.provider.name(),
                    embedded.len(),
                    batch.len()
                )));
            }
            if embedded.iter().any(Vec::is_empty) {
                return Err(ApiError::Embedding(format!(
                    "{} returned an empty vector",
                    self.provider.name()
                )));
            }
            vectors.extend(embedded);
        }

        tracing::debug!("Embedded {} texts with {}", texts.len(), self.model);
        Ok(vectors)
    }

    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>, ApiError> {
        self.embed(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| ApiError::Embedding("no vector returned".to_string()))
    }
}
