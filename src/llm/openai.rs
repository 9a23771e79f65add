use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};

use super::provider::LlmProvider;
use super::types::{
    normalize_arguments, ChatCompletion, ChatMessage, ChatRequest, ToolCall, ROLE_ASSISTANT,
    ROLE_TOOL,
};
use crate::core::errors::ApiError;

/// OpenAI-compatible chat completions + embeddings endpoint.
#[derive(Clone)]
pub struct OpenAiProvider {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl OpenAiProvider {
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

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

fn message_to_wire(message: &ChatMessage) -> Value {
    if message.role == ROLE_TOOL {
        return json!({
            "role": ROLE_TOOL,
            "tool_call_id": message.tool_call_id.clone().unwrap_or_default(),
            "content": message.content,
        });
    }

    if message.role == ROLE_ASSISTANT && !message.tool_calls.is_empty() {
        let calls: Vec<Value> = message
            .tool_calls
            .iter()
            .map(|call| {
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": {
                        "name": call.name,
                        "arguments": call.arguments.to_string(),
                    }
                })
            })
            .collect();
        let content = if message.content.is_empty() {
            Value::Null
        } else {
            Value::String(message.content.clone())
        };
        return json!({
            "role": ROLE_ASSISTANT,
            "content": content,
            "tool_calls": calls,
        });
    }

    json!({ "role": message.role, "content": message.content })
}

pub(crate) fn build_chat_body(request: &ChatRequest, model_id: &str) -> Value {
    let messages: Vec<Value> = request.messages.iter().map(message_to_wire).collect();
    let mut body = json!({
        "model": model_id,
        "messages": messages,
        "stream": false,
    });

    if let Some(obj) = body.as_object_mut() {
        if let Some(t) = request.temperature { obj.insert("temperature".to_string(), json!(t)); }
        if let Some(t) = request.max_tokens { obj.insert("max_tokens".to_string(), json!(t)); }
        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters,
                        }
                    })
                })
                .collect();
            obj.insert("tools".to_string(), Value::Array(tools));
            obj.insert("tool_choice".to_string(), json!("auto"));
        }
    }

    body
}

pub(crate) fn parse_chat_response(payload: &Value) -> Result<ChatCompletion, ApiError> {
    let message = payload["choices"]
        .get(0)
        .map(|choice| &choice["message"])
        .ok_or_else(|| ApiError::Provider("OpenAI response contained no choices".to_string()))?;

    let content = message["content"].as_str().unwrap_or_default().to_string();
    let tool_calls = message["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .filter_map(|call| {
                    let name = call["function"]["name"].as_str()?;
                    Some(ToolCall {
                        id: call["id"].as_str().unwrap_or_default().to_string(),
                        name: name.to_string(),
                        arguments: normalize_arguments(&call["function"]["arguments"]),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ChatCompletion { content, tool_calls })
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn chat(&self, request: ChatRequest, model_id: &str) -> Result<ChatCompletion, ApiError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = build_chat_body(&request, model_id);

        let res = self
            .authorized(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(ApiError::provider)?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Provider(format!("OpenAI chat error ({}): {}", status, text)));
        }

        let payload: Value = res.json().await.map_err(ApiError::provider)?;
        parse_chat_response(&payload)
    }

    async fn embed(&self, inputs: &[String], model_id: &str) -> Result<Vec<Vec<f32>>, ApiError> {
        let url = format!("{}/embeddings", self.base_url);

        let body = json!({
            "model": model_id,
            "input": inputs,
        });

        let res = self
            .authorized(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(ApiError::provider)?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Provider(format!("OpenAI embed error ({}): {}", status, text)));
        }

        let payload: Value = res.json().await.map_err(ApiError::provider)?;

        let mut items: Vec<(usize, Vec<f32>)> = Vec::new();
        if let Some(data) = payload["data"].as_array() {
            for (position, item) in data.iter().enumerate() {
                if let Some(vals) = item["embedding"].as_array() {
                    let index = item["index"].as_u64().map(|i| i as usize).unwrap_or(position);
                    let vec: Vec<f32> = vals.iter().filter_map(|v| v.as_f64().map(|f| f as f32)).collect();
                    items.push((index, vec));
                }
            }
        }
        items.sort_by_key(|(index, _)| *index);

        Ok(items.into_iter().map(|(_, vec)| vec).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::ToolSpec;

    #[test]
    fn chat_body_carries_tools_and_tool_turns() {
        let call = ToolCall {
            id: "call_9".to_string(),
            name: "search_documents".to_string(),
            arguments: json!({ "query": "osmosis" }),
        };
        let mut request = ChatRequest::new(vec![
            ChatMessage::system("be helpful"),
            ChatMessage::user("what is osmosis?"),
            ChatMessage::assistant_tool_calls("", vec![call.clone()]),
            ChatMessage::tool_result(&call, "{\"results\":[]}"),
        ])
        .with_tools(vec![ToolSpec {
            name: "search_documents".to_string(),
            description: "search".to_string(),
            parameters: json!({ "type": "object", "properties": {} }),
        }]);
        request.temperature = Some(0.2);

        let body = build_chat_body(&request, "gpt-4o-mini");

        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["tools"][0]["function"]["name"], "search_documents");
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["messages"][2]["content"], Value::Null);
        assert_eq!(
            body["messages"][2]["tool_calls"][0]["function"]["arguments"],
            "{\"query\":\"osmosis\"}"
        );
        assert_eq!(body["messages"][3]["tool_call_id"], "call_9");
    }

    #[test]
    fn chat_body_omits_tools_when_none_offered() {
        let body = build_chat_body(&ChatRequest::new(vec![ChatMessage::user("hi")]), "m");
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
    }

    #[test]
    fn response_parsing_extracts_text_and_tool_calls() {
        let payload = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": { "name": "generate_quiz", "arguments": "{\"topic\":\"cells\"}" }
                    }]
                }
            }]
        });

        let completion = parse_chat_response(&payload).unwrap();

        assert_eq!(completion.content, "");
        assert_eq!(completion.tool_calls.len(), 1);
        assert_eq!(completion.tool_calls[0].arguments, json!({ "topic": "cells" }));
        assert!(parse_chat_response(&json!({ "choices": [] })).is_err());
    }
}
