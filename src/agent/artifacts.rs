//! Turning generation-tool payloads into artifacts.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::llm::ChatMessage;

/// Payload keys that are not carried into artifact metadata.
const PAYLOAD_ONLY_KEYS: [&str; 4] = ["artifact_type", "context", "instruction", "content"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub artifact_type: String,
    pub title: String,
    /// Parsed JSON for quizzes and flashcards, Markdown text otherwise.
    pub content: Value,
    #[serde(default)]
    pub metadata: Value,
}

/// Messages for the tool-less call that completes a generation payload.
pub fn generation_messages(payload: &Value) -> Vec<ChatMessage> {
    let context = payload["context"].as_str().unwrap_or_default();
    let instruction = payload["instruction"].as_str().unwrap_or_default();
    vec![
        ChatMessage::system(
            "You create study material strictly from the provided document context. \
Do not add facts that are not in the context.",
        ),
        ChatMessage::user(format!("Context:\n{}\n\n{}", context, instruction)),
    ]
}

/// Build an artifact from the model's completion of `payload`.
pub fn build_artifact(payload: &Value, completion: &str) -> Option<Artifact> {
    let artifact_type = payload["artifact_type"].as_str()?.to_string();
    let title = payload["topic"]
        .as_str()
        .or_else(|| payload["description"].as_str())
        .unwrap_or_default()
        .to_string();

    let content = match artifact_type.as_str() {
        "quiz" | "flashcards" => match parse_json_array(completion) {
            Some(items) => Value::Array(items),
            None => {
                tracing::warn!("{} artifact was not a JSON array; keeping raw text", artifact_type);
                Value::String(completion.trim().to_string())
            }
        },
        _ => Value::String(completion.trim().to_string()),
    };

    if content.as_str().map(str::is_empty).unwrap_or(false) {
        return None;
    }

    let metadata: Map<String, Value> = payload
        .as_object()
        .map(|obj| {
            obj.iter()
                .filter(|(key, _)| !PAYLOAD_ONLY_KEYS.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        })
        .unwrap_or_default();

    Some(Artifact {
        artifact_type,
        title,
        content,
        metadata: Value::Object(metadata),
    })
}

/// What the chat model sees after a generation tool ran: the payload
/// without its bulky context, plus whether an artifact was produced.
pub fn tool_feedback(payload: &Value, artifact: Option<&Artifact>) -> Value {
    let mut feedback: Map<String, Value> = payload
        .as_object()
        .map(|obj| {
            obj.iter()
                .filter(|(key, _)| key.as_str() != "context" && key.as_str() != "instruction")
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        })
        .unwrap_or_default();

    if payload.get("instruction").is_some() {
        let status = if artifact.is_some() { "created" } else { "failed" };
        feedback.insert("status".to_string(), Value::String(status.to_string()));
        if artifact.is_some() {
            feedback.insert(
                "note".to_string(),
                Value::String(
                    "The artifact is shown to the user separately. Briefly introduce it; do not repeat its content."
                        .to_string(),
                ),
            );
        }
    }

    Value::Object(feedback)
}

/// First JSON array in `text`, tolerating code fences and surrounding prose.
fn parse_json_array(text: &str) -> Option<Vec<Value>> {
    let trimmed = text.trim();

    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(trimmed) {
        return Some(items);
    }

    let start = trimmed.find('[')?;
    let end = trimmed.rfind(']')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&trimmed[start..=end]) {
        Ok(Value::Array(items)) => Some(items),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn quiz_payload() -> Value {
        json!({
            "artifact_type": "quiz",
            "context": "ATP is the energy currency of the cell.",
            "topic": "ATP",
            "num_questions": 1,
            "interactive": true,
            "instruction": "Generate 1 multiple-choice questions about 'ATP'",
        })
    }

    #[test]
    fn quiz_completion_in_code_fence_is_parsed() {
        let completion = "```json\n[{\"question\":\"What is ATP?\",\"options\":[\"a\",\"b\",\"c\",\"d\"],\"correct_index\":0,\"explanation\":\"...\"}]\n```";

        let artifact = build_artifact(&quiz_payload(), completion).unwrap();

        assert_eq!(artifact.artifact_type, "quiz");
        assert_eq!(artifact.title, "ATP");
        assert_eq!(artifact.content[0]["correct_index"], 0);
        assert_eq!(artifact.metadata["interactive"], true);
        assert!(artifact.metadata.get("context").is_none());
    }

    #[test]
    fn markdown_artifacts_keep_text() {
        let payload = json!({
            "artifact_type": "study_guide",
            "context": "c",
            "topic": "Cells",
            "instruction": "Create a standard study guide",
        });

        let artifact = build_artifact(&payload, "# Cells\n\n- point\n").unwrap();

        assert_eq!(artifact.content, json!("# Cells\n\n- point"));
        assert!(build_artifact(&payload, "   ").is_none());
    }

    #[test]
    fn generation_prompt_carries_context_and_instruction() {
        let messages = generation_messages(&quiz_payload());
        assert_eq!(messages.len(), 2);
        assert!(messages[1].content.contains("ATP is the energy currency"));
        assert!(messages[1].content.ends_with("about 'ATP'"));
    }

    #[test]
    fn feedback_drops_context_and_reports_status() {
        let artifact = build_artifact(&quiz_payload(), "[]").unwrap();
        let feedback = tool_feedback(&quiz_payload(), Some(&artifact));

        assert!(feedback.get("context").is_none());
        assert!(feedback.get("instruction").is_none());
        assert_eq!(feedback["status"], "created");

        let ungrounded = json!({ "artifact_type": "quiz", "content": null, "message": "No document content found to generate a quiz from." });
        assert_eq!(tool_feedback(&ungrounded, None), ungrounded);
    }
}
