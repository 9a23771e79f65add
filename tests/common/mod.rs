#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use docquery::core::config::{RagSettings, Settings};
use docquery::core::errors::ApiError;
use docquery::llm::{ChatCompletion, ChatRequest, EmbeddingGateway, LlmProvider, ToolCall};
use docquery::rag::{PlainTextExtractor, RagEngine, SqliteRagStore};
use docquery::tools::ToolExecutor;
use docquery::agent::AgenticLoop;

const DIM: usize = 64;

fn bucket(token: &str) -> usize {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in token.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    (hash % DIM as u64) as usize
}

pub fn hash_vector(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; DIM];
    for token in text.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
        vector[bucket(&token.to_lowercase())] += 1.0;
    }
    if vector.iter().all(|v| *v == 0.0) {
        vector[0] = 1.0;
    }
    vector
}

/// Deterministic embeddings plus a queue of scripted chat turns.
#[derive(Default)]
pub struct FakeModel {
    script: Mutex<VecDeque<ChatCompletion>>,
    repeat: Option<ToolCall>,
    pub requests: Mutex<Vec<ChatRequest>>,
}

impl FakeModel {
    pub fn scripted(turns: Vec<ChatCompletion>) -> Self {
        Self {
            script: Mutex::new(turns.into()),
            ..Self::default()
        }
    }

    pub fn always_calling(call: ToolCall) -> Self {
        Self {
            repeat: Some(call),
            ..Self::default()
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmProvider for FakeModel {
    fn name(&self) -> &str {
        "fake"
    }

    async fn chat(&self, request: ChatRequest, _model_id: &str) -> Result<ChatCompletion, ApiError> {
        let offered_tools = !request.tools.is_empty();
        self.requests.lock().unwrap().push(request);

        if let Some(next) = self.script.lock().unwrap().pop_front() {
            return Ok(next);
        }
        match (&self.repeat, offered_tools) {
            (Some(call), true) => Ok(ChatCompletion {
                content: String::new(),
                tool_calls: vec![call.clone()],
            }),
            _ => Ok(ChatCompletion::text("Done.")),
        }
    }

    async fn embed(&self, inputs: &[String], _model_id: &str) -> Result<Vec<Vec<f32>>, ApiError> {
        Ok(inputs.iter().map(|text| hash_vector(text)).collect())
    }
}

pub fn tool_call(name: &str, arguments: serde_json::Value) -> ToolCall {
    ToolCall {
        id: format!("call_{name}"),
        name: name.to_string(),
        arguments,
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub model: Arc<FakeModel>,
    pub rag: Arc<RagEngine>,
    pub store: Arc<SqliteRagStore>,
    pub tools: ToolExecutor,
}

impl Harness {
    pub async fn new(model: FakeModel) -> Self {
        Self::with_rag_settings(model, RagSettings::default()).await
    }

    pub async fn with_rag_settings(model: FakeModel, rag_settings: RagSettings) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let model = Arc::new(model);
        let store = Arc::new(SqliteRagStore::with_path(dir.path().join("rag.db")).await.unwrap());
        let provider: Arc<dyn LlmProvider> = model.clone();
        let rag = Arc::new(
            RagEngine::new(
                &rag_settings,
                EmbeddingGateway::new(provider, "fake-embed", 32),
                store.clone(),
                Arc::new(PlainTextExtractor::default()),
                dir.path().join("scratch"),
            )
            .unwrap(),
        );
        let tools = ToolExecutor::new(rag.clone());
        Self {
            dir,
            model,
            rag,
            store,
            tools,
        }
    }

    pub fn agent(&self) -> AgenticLoop {
        AgenticLoop::new(
            self.model.clone(),
            self.tools.clone(),
            self.rag.clone(),
            Arc::new(Settings::default()),
        )
    }

    pub fn write_file(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }
}
