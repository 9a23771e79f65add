pub mod embedding;
pub mod gemini;
pub mod openai;
pub mod provider;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;
use std::time::Duration;

pub use embedding::EmbeddingGateway;
pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;
pub use provider::LlmProvider;
pub use types::{ChatCompletion, ChatMessage, ChatRequest, ToolCall, ToolSpec};

use crate::core::config::{LlmSettings, ProviderKind};
use crate::core::errors::ApiError;

/// Construct the configured provider. Callers only see `dyn LlmProvider`.
pub fn build_provider(settings: &LlmSettings) -> Result<Arc<dyn LlmProvider>, ApiError> {
    let base_url = settings.resolved_base_url();
    let timeout = Duration::from_secs(settings.timeout_secs.max(1));

    if settings.api_key.is_none() {
        tracing::warn!(
            "No API key configured for provider '{}'; requests may be rejected",
            settings.provider.as_str()
        );
    }

    let provider: Arc<dyn LlmProvider> = match settings.provider {
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(base_url, settings.api_key.clone(), timeout)?),
        ProviderKind::Gemini => Arc::new(GeminiProvider::new(base_url, settings.api_key.clone(), timeout)?),
    };
    tracing::info!("LLM provider: {}", provider.name());
    Ok(provider)
}
