use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Map, Value};

use super::provider::LlmProvider;
use super::types::{
    normalize_arguments, ChatCompletion, ChatMessage, ChatRequest, ToolCall, ROLE_ASSISTANT,
    ROLE_SYSTEM, ROLE_TOOL,
};
use crate::core::errors::ApiError;

/// Schema keywords the Gemini function-declaration dialect rejects.
const UNSUPPORTED_SCHEMA_KEYS: [&str; 3] = ["default", "additionalProperties", "$schema"];

/// Google Generative Language API (`generateContent` / `batchEmbedContents`).
#[derive(Clone)]
pub struct GeminiProvider {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl GeminiProvider {
    pub fn new(base_url: String, api_key: Option<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ApiError::provider)?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    fn model_url(&self, model_id: &str, method: &str) -> String {
        let model = model_id.strip_prefix("models/").unwrap_or(model_id);
        format!(
            "{}/models/{}:{}",
            self.base_url,
            urlencoding::encode(model),
            method
        )
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("x-goog-api-key", key),
            None => builder,
        }
    }
}

fn sanitize_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let mut cleaned = Map::new();
            for (key, value) in map {
                if UNSUPPORTED_SCHEMA_KEYS.contains(&key.as_str()) {
                    continue;
                }
                cleaned.insert(key.clone(), sanitize_schema(value));
            }
            Value::Object(cleaned)
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize_schema).collect()),
        other => other.clone(),
    }
}

fn message_parts(message: &ChatMessage) -> (&'static str, Vec<Value>) {
    if message.role == ROLE_TOOL {
        let response = serde_json::from_str::<Value>(&message.content)
            .ok()
            .filter(Value::is_object)
            .unwrap_or_else(|| json!({ "content": message.content }));
        let part = json!({
            "functionResponse": {
                "name": message.name.clone().unwrap_or_default(),
                "response": response,
            }
        });
        return ("user", vec![part]);
    }

    if message.role == ROLE_ASSISTANT {
        let mut parts = Vec::new();
        if !message.content.is_empty() {
            parts.push(json!({ "text": message.content }));
        }
        for call in &message.tool_calls {
            parts.push(json!({
                "functionCall": { "name": call.name, "args": call.arguments }
            }));
        }
        return ("model", parts);
    }

    ("user", vec![json!({ "text": message.content })])
}

pub(crate) fn build_chat_body(request: &ChatRequest) -> Value {
    let system_text: Vec<&str> = request
        .messages
        .iter()
        .filter(|m| m.role == ROLE_SYSTEM)
        .map(|m| m.content.as_str())
        .collect();

    // Gemini requires alternating turns, so adjacent same-role parts are merged.
    let mut contents: Vec<Value> = Vec::new();
    for message in request.messages.iter().filter(|m| m.role != ROLE_SYSTEM) {
        let (role, parts) = message_parts(message);
        if parts.is_empty() {
            continue;
        }
        match contents.last_mut() {
            Some(last) if last["role"] == role => {
                if let Some(existing) = last["parts"].as_array_mut() {
                    existing.extend(parts);
                }
            }
            _ => contents.push(json!({ "role": role, "parts": parts })),
        }
    }

    let mut body = json!({ "contents": contents });
    if let Some(obj) = body.as_object_mut() {
        if !system_text.is_empty() {
            obj.insert(
                "systemInstruction".to_string(),
                json!({ "parts": [{ "text": system_text.join("\n\n") }] }),
            );
        }

        let mut generation = Map::new();
        if let Some(t) = request.temperature { generation.insert("temperature".to_string(), json!(t)); }
        if let Some(t) = request.max_tokens { generation.insert("maxOutputTokens".to_string(), json!(t)); }
        if !generation.is_empty() {
            obj.insert("generationConfig".to_string(), Value::Object(generation));
        }

        if !request.tools.is_empty() {
            let declarations: Vec<Value> = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": sanitize_schema(&tool.parameters),
                    })
                })
                .collect();
            obj.insert(
                "tools".to_string(),
                json!([{ "functionDeclarations": declarations }]),
            );
        }
    }

    body
}

pub(crate) fn parse_chat_response(payload: &Value) -> Result<ChatCompletion, ApiError> {
    let candidate = payload["candidates"].get(0).ok_or_else(|| {
        let reason = payload["promptFeedback"]["blockReason"]
            .as_str()
            .unwrap_or("no candidates");
        ApiError::Provider(format!("Gemini returned no candidates: {}", reason))
    })?;

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for part in candidate["content"]["parts"].as_array().into_iter().flatten() {
        if let Some(fragment) = part["text"].as_str() {
            text.push_str(fragment);
        }
        if let Some(name) = part["functionCall"]["name"].as_str() {
            tool_calls.push(ToolCall {
                id: format!("call_{}", uuid::Uuid::new_v4().simple()),
                name: name.to_string(),
                arguments: normalize_arguments(&part["functionCall"]["args"]),
            });
        }
    }

    Ok(ChatCompletion {
        content: text,
        tool_calls,
    })
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn chat(&self, request: ChatRequest, model_id: &str) -> Result<ChatCompletion, ApiError> {
        let url = self.model_url(model_id, "generateContent");
        let body = build_chat_body(&request);

        let res = self
            .authorized(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(ApiError::provider)?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Provider(format!("Gemini chat error ({}): {}", status, text)));
        }

        let payload: Value = res.json().await.map_err(ApiError::provider)?;
        parse_chat_response(&payload)
    }

    async fn embed(&self, inputs: &[String], model_id: &str) -> Result<Vec<Vec<f32>>, ApiError> {
        let url = self.model_url(model_id, "batchEmbedContents");
        let model = model_id.strip_prefix("models/").unwrap_or(model_id);
        let requests: Vec<Value> = inputs
            .iter()
            .map(|text| {
                json!({
                    "model": format!("models/{}", model),
                    "content": { "parts": [{ "text": text }] },
                })
            })
            .collect();

        let res = self
            .authorized(self.client.post(&url))
            .json(&json!({ "requests": requests }))
            .send()
            .await
            .map_err(ApiError::provider)?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Provider(format!("Gemini embed error ({}): {}", status, text)));
        }

        let payload: Value = res.json().await.map_err(ApiError::provider)?;
        let embeddings = payload["embeddings"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .map(|item| {
                        item["values"]
                            .as_array()
                            .map(|vals| vals.iter().filter_map(|v| v.as_f64().map(|f| f as f32)).collect())
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(embeddings)
    }
}
