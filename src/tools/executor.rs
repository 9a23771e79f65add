//! Tool Executor.
//!
//! Every tool is grounded in the caller's own session: retrieval always goes
//! through `RagEngine::query` with the session and user of the request.
//! Generation tools never produce content themselves; they hand the model an
//! instruction plus the retrieved context, or `content: null` when there is
//! nothing to ground on.

use std::sync::Arc;

use serde_json::{json, Value};

use super::definitions::ToolName;
use crate::core::errors::ApiError;
use crate::rag::{RagEngine, RetrievedChunk};

pub const DEFAULT_TOPIC: &str = "the document content";

const SEARCH_DEFAULT_RESULTS: usize = 5;
const SEARCH_MAX_RESULTS: usize = 12;
const QUIZ_CHUNKS: usize = 6;
const QUIZ_DEFAULT_QUESTIONS: usize = 5;
const QUIZ_MAX_QUESTIONS: usize = 10;
const STUDY_GUIDE_CHUNKS: usize = 8;
const FLASHCARD_CHUNKS: usize = 8;
const FLASHCARD_DEFAULT_CARDS: usize = 10;
const FLASHCARD_MAX_CARDS: usize = 20;
const VISUALIZATION_CHUNKS: usize = 5;

const STUDY_GUIDE_DEPTHS: [&str; 3] = ["brief", "standard", "comprehensive"];
const CARD_TYPES: [&str; 4] = ["definition", "concept", "fact", "mixed"];
const VISUALIZATION_TYPES: [&str; 3] = ["mermaid", "table", "code"];

/// Result of one tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub tool: ToolName,
    /// JSON handed back to the model.
    pub payload: Value,
    /// Chunks surfaced by `search_documents`, for citations.
    pub retrieved: Vec<RetrievedChunk>,
}

impl ToolOutput {
    fn new(tool: ToolName, payload: Value) -> Self {
        Self {
            tool,
            payload,
            retrieved: Vec::new(),
        }
    }

    /// A generation payload that carries grounding context.
    pub fn is_grounded_generation(&self) -> bool {
        self.tool.is_generation()
            && self.payload.get("instruction").is_some()
            && self
                .payload
                .get("context")
                .and_then(Value::as_str)
                .map(|c| !c.trim().is_empty())
                .unwrap_or(false)
    }
}

#[derive(Clone)]
pub struct ToolExecutor {
    rag: Arc<RagEngine>,
}

impl ToolExecutor {
    pub fn new(rag: Arc<RagEngine>) -> Self {
        Self { rag }
    }

    /// Run a tool by name.
    ///
    /// Unknown names are an `ApiError::UnknownTool`. Failures inside a known
    /// tool come back as an `{error}` payload.
    pub async fn execute(
        &self,
        name: &str,
        args: &Value,
        session_id: &str,
        user_id: &str,
    ) -> Result<ToolOutput, ApiError> {
        let tool: ToolName = name.parse()?;

        let outcome = match tool {
            ToolName::SearchDocuments => self.search_documents(args, session_id, user_id).await,
            ToolName::GenerateQuiz => self.generate_quiz(args, session_id, user_id).await,
            ToolName::CreateStudyGuide => self.create_study_guide(args, session_id, user_id).await,
            ToolName::GenerateVisualization => {
                self.generate_visualization(args, session_id, user_id).await
            }
            ToolName::GenerateFlashcards => self.generate_flashcards(args, session_id, user_id).await,
        };

        Ok(outcome.unwrap_or_else(|err| {
            tracing::error!("Tool {} execution error: {}", tool, err);
            ToolOutput::new(tool, json!({ "error": err.to_string() }))
        }))
    }

    async fn search_documents(
        &self,
        args: &Value,
        session_id: &str,
        user_id: &str,
    ) -> Result<ToolOutput, ApiError> {
        let query = string_arg(args, "query", "");
        if query.is_empty() {
            return Err(ApiError::BadRequest("search_documents requires a query".to_string()));
        }
        let n_results = count_arg(args, "n_results", SEARCH_DEFAULT_RESULTS, SEARCH_MAX_RESULTS);

        let result = self.rag.query(&query, session_id, user_id, n_results).await;
        if result.is_empty() {
            return Ok(ToolOutput::new(
                ToolName::SearchDocuments,
                json!({
                    "results": [],
                    "message": "No relevant passages found in the uploaded documents."
                }),
            ));
        }

        let formatted: Vec<Value> = result
            .chunks
            .iter()
            .enumerate()
            .map(|(idx, chunk)| {
                json!({
                    "index": idx + 1,
                    "text": chunk.text,
                    "pages": chunk.pages,
                })
            })
            .collect();
        let total = formatted.len();

        Ok(ToolOutput {
            tool: ToolName::SearchDocuments,
            payload: json!({ "results": formatted, "total": total }),
            retrieved: result.chunks,
        })
    }

    async fn retrieve_context(
        &self,
        tool: ToolName,
        topic: &str,
        n_results: usize,
        session_id: &str,
        user_id: &str,
    ) -> String {
        let result = self.rag.query(topic, session_id, user_id, n_results).await;
        tracing::info!(
            "{}: session={} chunks_retrieved={} topic={:?}",
            tool,
            session_id,
            result.len(),
            topic
        );
        if result.is_empty() {
            tracing::warn!("{}: NO chunks found for session={} topic={:?}", tool, session_id, topic);
        }
        result.texts().join("\n\n")
    }

    async fn generate_quiz(
        &self,
        args: &Value,
        session_id: &str,
        user_id: &str,
    ) -> Result<ToolOutput, ApiError> {
        let tool = ToolName::GenerateQuiz;
        let topic = string_arg(args, "topic", DEFAULT_TOPIC);
        let num_questions = count_arg(args, "num_questions", QUIZ_DEFAULT_QUESTIONS, QUIZ_MAX_QUESTIONS);

        let context = self
            .retrieve_context(tool, &topic, QUIZ_CHUNKS, session_id, user_id)
            .await;
        if context.is_empty() {
            return Ok(ToolOutput::new(
                tool,
                json!({
                    "artifact_type": "quiz",
                    "content": null,
                    "message": "No document content found to generate a quiz from.",
                    "interactive": true,
                }),
            ));
        }

        let instruction = format!(
            r#"Generate {num_questions} multiple-choice questions about '{topic}' based on the provided context.

IMPORTANT: Return ONLY a valid JSON array with no additional text, markdown formatting, or code blocks.

Each question object must have these exact fields:
- question: (string) The question text
- options: (array of exactly 4 strings) The answer choices
- correct_index: (number 0-3) Index of the correct answer in the options array
- explanation: (string) Brief explanation of why the answer is correct

Example format:
[
  {{
    "question": "What is X?",
    "options": ["Choice A", "Choice B", "Choice C", "Choice D"],
    "correct_index": 1,
    "explanation": "Choice B is correct because..."
  }}
]"#
        );

        Ok(ToolOutput::new(
            tool,
            json!({
                "artifact_type": "quiz",
                "context": context,
                "topic": topic,
                "num_questions": num_questions,
                "interactive": true,
                "instruction": instruction,
            }),
        ))
    }

    async fn create_study_guide(
        &self,
        args: &Value,
        session_id: &str,
        user_id: &str,
    ) -> Result<ToolOutput, ApiError> {
        let tool = ToolName::CreateStudyGuide;
        let topic = string_arg(args, "topic", DEFAULT_TOPIC);
        let depth = choice_arg(args, "depth", &STUDY_GUIDE_DEPTHS, "standard");

        let context = self
            .retrieve_context(tool, &topic, STUDY_GUIDE_CHUNKS, session_id, user_id)
            .await;
        if context.is_empty() {
            return Ok(ToolOutput::new(
                tool,
                json!({
                    "artifact_type": "study_guide",
                    "content": null,
                    "message": "No document content found to create a study guide from.",
                }),
            ));
        }

        Ok(ToolOutput::new(
            tool,
            json!({
                "artifact_type": "study_guide",
                "context": context,
                "topic": topic,
                "depth": depth,
                "instruction": format!(
                    "Create a {} study guide about '{}'. Include: overview, key concepts, detailed notes, review questions. Use Markdown formatting.",
                    depth, topic
                ),
            }),
        ))
    }

    async fn generate_visualization(
        &self,
        args: &Value,
        session_id: &str,
        user_id: &str,
    ) -> Result<ToolOutput, ApiError> {
        let tool = ToolName::GenerateVisualization;
        let description = string_arg(args, "description", DEFAULT_TOPIC);
        let viz_type = choice_arg(args, "type", &VISUALIZATION_TYPES, "mermaid");

        let context = self
            .retrieve_context(tool, &description, VISUALIZATION_CHUNKS, session_id, user_id)
            .await;
        if context.is_empty() {
            return Ok(ToolOutput::new(
                tool,
                json!({
                    "artifact_type": "visualization",
                    "viz_type": viz_type,
                    "content": null,
                    "message": "No document content found to generate a visualization from.",
                }),
            ));
        }

        let format_hint = match viz_type.as_str() {
            "mermaid" => "Use Mermaid diagram syntax wrapped in ```mermaid code block.",
            "table" => "Use a Markdown table.",
            _ => "Use a code block with appropriate language tag.",
        };

        Ok(ToolOutput::new(
            tool,
            json!({
                "artifact_type": "visualization",
                "viz_type": viz_type,
                "context": context,
                "description": description,
                "instruction": format!(
                    "Generate a {} visualization for: '{}'. {}",
                    viz_type, description, format_hint
                ),
            }),
        ))
    }

    async fn generate_flashcards(
        &self,
        args: &Value,
        session_id: &str,
        user_id: &str,
    ) -> Result<ToolOutput, ApiError> {
        let tool = ToolName::GenerateFlashcards;
        let topic = string_arg(args, "topic", DEFAULT_TOPIC);
        let num_cards = count_arg(args, "num_cards", FLASHCARD_DEFAULT_CARDS, FLASHCARD_MAX_CARDS);
        let card_type = choice_arg(args, "card_type", &CARD_TYPES, "mixed");

        let context = self
            .retrieve_context(tool, &topic, FLASHCARD_CHUNKS, session_id, user_id)
            .await;
        if context.is_empty() {
            return Ok(ToolOutput::new(
                tool,
                json!({
                    "artifact_type": "flashcards",
                    "content": null,
                    "message": "No document content found to generate flashcards from.",
                }),
            ));
        }

        let card_hint = match card_type.as_str() {
            "definition" => "Focus on term definitions and meanings.",
            "concept" => "Focus on explaining key concepts and theories.",
            "fact" => "Focus on specific facts, dates, and data points.",
            _ => "Include a variety of definitions, concepts, and facts.",
        };

        let instruction = format!(
            r#"Generate {num_cards} flashcards about '{topic}' based on the provided context.
{card_hint}

IMPORTANT: Return ONLY a valid JSON array with no additional text, markdown formatting, or code blocks.

Each flashcard object must have these exact fields:
- front: (string) The question or prompt (keep concise, under 100 characters)
- back: (string) The answer or explanation (can be longer, but clear and focused)
- difficulty: (string) "easy", "medium", or "hard"
- tags: (array of strings) 1-3 relevant tags for categorization

Example format:
[
  {{
    "front": "What is X?",
    "back": "X is defined as...",
    "difficulty": "medium",
    "tags": ["concept", "fundamentals"]
  }}
]"#
        );

        Ok(ToolOutput::new(
            tool,
            json!({
                "artifact_type": "flashcards",
                "context": context,
                "topic": topic,
                "num_cards": num_cards,
                "card_type": card_type,
                "instruction": instruction,
            }),
        ))
    }
}

fn string_arg(args: &Value, key: &str, default: &str) -> String {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(default)
        .to_string()
}

/// Integer argument clamped to `[1, max]`. Accepts numeric strings.
fn count_arg(args: &Value, key: &str, default: usize, max: usize) -> usize {
    let raw = args.get(key).and_then(|value| match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    });
    match raw {
        Some(n) if n.is_finite() => (n.max(1.0) as usize).min(max),
        _ => default.min(max),
    }
}

fn choice_arg(args: &Value, key: &str, allowed: &[&str], default: &str) -> String {
    let value = string_arg(args, key, default).to_lowercase();
    if allowed.contains(&value.as_str()) {
        value
    } else {
        default.to_string()
    }
}
