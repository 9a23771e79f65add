//! Typed view over the merged configuration tree.
//!
//! Every field has a default so an empty `config.yml` yields a working
//! setup; `validation::validate_config` runs on the raw tree first.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::defaults::default_personas;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub rag: RagSettings,
    pub llm: LlmSettings,
    pub embedding: EmbeddingSettings,
    pub agent: AgentSettings,
    pub memory: MemorySettings,
    pub personas: BTreeMap<String, PersonaSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            rag: RagSettings::default(),
            llm: LlmSettings::default(),
            embedding: EmbeddingSettings::default(),
            agent: AgentSettings::default(),
            memory: MemorySettings::default(),
            personas: default_personas(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub n_results: usize,
    pub deep_think_results: usize,
    pub excerpt_chars: usize,
    pub download_timeout_secs: u64,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            n_results: 5,
            deep_think_results: 12,
            excerpt_chars: 200,
            download_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Gemini,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Gemini => "gemini",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub provider: ProviderKind,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub chat_model: String,
    pub deep_think_model: Option<String>,
    pub embedding_model: String,
    pub temperature: Option<f64>,
    pub max_tokens: Option<i32>,
    pub timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            base_url: None,
            api_key: None,
            chat_model: "gpt-4o-mini".to_string(),
            deep_think_model: None,
            embedding_model: "text-embedding-3-small".to_string(),
            temperature: Some(0.3),
            max_tokens: Some(2000),
            timeout_secs: 120,
        }
    }
}

impl LlmSettings {
    pub fn resolved_base_url(&self) -> String {
        match &self.base_url {
            Some(url) if !url.trim().is_empty() => url.trim_end_matches('/').to_string(),
            _ => match self.provider {
                ProviderKind::OpenAi => "https://api.openai.com/v1".to_string(),
                ProviderKind::Gemini => {
                    "https://generativelanguage.googleapis.com/v1beta".to_string()
                }
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub batch_size: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self { batch_size: 64 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub max_rounds: usize,
    pub history_limit: usize,
    pub history_message_chars: usize,
    pub default_persona: String,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            history_limit: 20,
            history_message_chars: 4000,
            default_persona: "academic".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySettings {
    pub enabled: bool,
    pub retrieval_limit: usize,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            retrieval_limit: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaSettings {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub system_prompt: String,
}

impl Settings {
    /// Look up a persona, falling back to the configured default and then to
    /// any persona at all.
    pub fn persona(&self, key: &str) -> Option<&PersonaSettings> {
        self.personas
            .get(key)
            .or_else(|| self.personas.get(&self.agent.default_persona))
            .or_else(|| self.personas.values().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_tree_yields_defaults() {
        let settings: Settings = serde_json::from_value(json!({})).unwrap();
        assert_eq!(settings.rag.chunk_size, 1000);
        assert_eq!(settings.rag.chunk_overlap, 200);
        assert_eq!(settings.agent.max_rounds, 3);
        assert_eq!(settings.llm.provider, ProviderKind::OpenAi);
        assert!(settings.personas.contains_key("academic"));
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let settings: Settings = serde_json::from_value(json!({
            "rag": { "chunk_size": 400 },
            "llm": { "provider": "gemini" }
        }))
        .unwrap();

        assert_eq!(settings.rag.chunk_size, 400);
        assert_eq!(settings.rag.chunk_overlap, 200);
        assert_eq!(settings.llm.provider, ProviderKind::Gemini);
        assert!(settings
            .llm
            .resolved_base_url()
            .starts_with("https://generativelanguage"));
    }

    #[test]
    fn unknown_persona_falls_back_to_default() {
        let settings = Settings::default();
        let persona = settings.persona("does-not-exist").unwrap();
        assert_eq!(persona.name, settings.personas["academic"].name);
    }
}
