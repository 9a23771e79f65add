//! In-process providers for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::provider::LlmProvider;
use super::types::{ChatCompletion, ChatRequest, ToolCall};
use crate::core::errors::ApiError;

const HASH_DIM: usize = 64;

fn token_bucket(token: &str) -> usize {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in token.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    (hash % HASH_DIM as u64) as usize
}

/// Bag-of-words hashing embedder; chat echoes a fixed answer.
#[derive(Default)]
pub struct HashEmbedder {
    pub embed_calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn vector_for(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; HASH_DIM];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            vector[token_bucket(&token.to_lowercase())] += 1.0;
        }
        if vector.iter().all(|v| *v == 0.0) {
            vector[0] = 1.0;
        }
        vector
    }
}

#[async_trait]
impl LlmProvider for HashEmbedder {
    fn name(&self) -> &str {
        "hash"
    }

    async fn chat(&self, _request: ChatRequest, _model_id: &str) -> Result<ChatCompletion, ApiError> {
        Ok(ChatCompletion::text("ok"))
    }

    async fn embed(&self, inputs: &[String], _model_id: &str) -> Result<Vec<Vec<f32>>, ApiError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        Ok(inputs.iter().map(|text| Self::vector_for(text)).collect())
    }
}

/// Replays queued chat completions and records every request.
///
/// Once the queue is drained it either keeps requesting `repeat_call`
/// whenever tools are offered, or answers with plain text.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<ChatCompletion, ApiError>>>,
    repeat_call: Option<ToolCall>,
    embedding_count: Option<usize>,
    fail_all: bool,
    pub requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<ChatCompletion, ApiError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            repeat_call: None,
            embedding_count: None,
            fail_all: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_all: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn always_calling(call: ToolCall) -> Self {
        Self {
            repeat_call: Some(call),
            ..Self::new(Vec::new())
        }
    }

    pub fn with_embedding_count(mut self, count: usize) -> Self {
        self.embedding_count = Some(count);
        self
    }

    pub fn recorded(&self) -> Vec<ChatRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, request: ChatRequest, _model_id: &str) -> Result<ChatCompletion, ApiError> {
        let offered_tools = !request.tools.is_empty();
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        if self.fail_all {
            return Err(ApiError::Provider("scripted failure".to_string()));
        }

        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        if let Some(next) = next {
            return next;
        }

        match (&self.repeat_call, offered_tools) {
            (Some(call), true) => Ok(ChatCompletion {
                content: String::new(),
                tool_calls: vec![call.clone()],
            }),
            _ => Ok(ChatCompletion::text("Final answer after tools.")),
        }
    }

    async fn embed(&self, inputs: &[String], _model_id: &str) -> Result<Vec<Vec<f32>>, ApiError> {
        if self.fail_all {
            return Err(ApiError::Provider("scripted failure".to_string()));
        }
        let count = self.embedding_count.unwrap_or(inputs.len());
        Ok(inputs
            .iter()
            .cycle()
            .take(count)
            .map(|text| HashEmbedder::vector_for(text))
            .collect())
    }
}
