//! Agentic completion loop.
//!
//! A bounded conversation with the chat model, written as an explicit state
//! machine: the model is asked for a turn, requested tools are executed and
//! fed back, and the loop ends on the first plain-text turn. When the round
//! bound (or the caller's deadline) is reached, one last call is made with
//! tools withheld so the model must answer in text.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::Instant;

use super::artifacts::{build_artifact, generation_messages, tool_feedback, Artifact};
use super::instructions::{build_system_prompt, truncate_history};
use super::modes::AnswerMode;
use super::suggestions::extract_suggestions;
use crate::core::config::Settings;
use crate::core::errors::ApiError;
use crate::llm::{ChatCompletion, ChatMessage, ChatRequest, LlmProvider, ToolCall, ToolSpec};
use crate::rag::{RagEngine, RetrievedChunk, Source};
use crate::tools::{tool_definitions, ToolExecutor};

pub const APOLOGY_ANSWER: &str =
    "I'm sorry, I ran into a problem while generating a response. Please try again in a moment.";
pub const EMPTY_ANSWER_FALLBACK: &str =
    "I wasn't able to produce an answer from your documents. Try rephrasing the question or asking about a specific section.";

#[derive(Debug, Clone)]
pub struct AnswerRequest {
    pub question: String,
    pub history: Vec<ChatMessage>,
    pub session_id: String,
    pub user_id: String,
    pub persona: String,
    pub memory_context: String,
    pub preference_context: String,
    pub mode: AnswerMode,
    /// Passages retrieved up front and placed in the system prompt.
    pub excerpts: Vec<RetrievedChunk>,
    pub allow_tools: bool,
    /// Checked between rounds; once passed, the loop goes straight to the
    /// final tool-less call.
    pub deadline: Option<Instant>,
}

impl AnswerRequest {
    pub fn new(question: impl Into<String>, session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            history: Vec::new(),
            session_id: session_id.into(),
            user_id: user_id.into(),
            persona: String::new(),
            memory_context: String::new(),
            preference_context: String::new(),
            mode: AnswerMode::Standard,
            excerpts: Vec::new(),
            allow_tools: true,
            deadline: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub round: usize,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnswerResult {
    pub answer: String,
    pub sources: Vec<Source>,
    pub artifacts: Vec<Artifact>,
    pub suggestions: Vec<String>,
    pub tool_calls: Vec<ToolCallRecord>,
}

impl AnswerResult {
    pub fn apology() -> Self {
        Self {
            answer: APOLOGY_ANSWER.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoopState {
    AwaitingModel,
    ExecutingTools(Vec<ToolCall>),
    Done(String),
}

/// Everything gathered across rounds.
#[derive(Default)]
struct Collected {
    retrieved: Vec<RetrievedChunk>,
    artifacts: Vec<Artifact>,
    tool_calls: Vec<ToolCallRecord>,
}

pub struct AgenticLoop {
    provider: Arc<dyn LlmProvider>,
    tools: ToolExecutor,
    rag: Arc<RagEngine>,
    settings: Arc<Settings>,
}

impl AgenticLoop {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        tools: ToolExecutor,
        rag: Arc<RagEngine>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            provider,
            tools,
            rag,
            settings,
        }
    }

    /// Answer a question. Never fails: model errors become an apology with
    /// no sources, artifacts or suggestions.
    pub async fn answer(&self, request: AnswerRequest) -> AnswerResult {
        let session_id = request.session_id.clone();
        match self.run(request).await {
            Ok(result) => result,
            Err(err) => {
                tracing::error!("Answer generation failed for session {}: {}", session_id, err);
                AnswerResult::apology()
            }
        }
    }

    fn model_for(&self, mode: AnswerMode) -> &str {
        match (mode, self.settings.llm.deep_think_model.as_deref()) {
            (AnswerMode::DeepThink, Some(model)) if !model.trim().is_empty() => model,
            _ => &self.settings.llm.chat_model,
        }
    }

    async fn call_model(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
        model: &str,
    ) -> Result<ChatCompletion, ApiError> {
        let request = ChatRequest::new(messages.to_vec())
            .with_tools(tools.to_vec())
            .with_settings(&self.settings.llm);
        self.provider.chat(request, model).await
    }

    async fn run(&self, request: AnswerRequest) -> Result<AnswerResult, ApiError> {
        let agent = &self.settings.agent;
        let model = self.model_for(request.mode);
        let tools = if request.allow_tools {
            tool_definitions()
        } else {
            Vec::new()
        };
        let tool_names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();

        let system_prompt = build_system_prompt(
            self.settings.persona(&request.persona),
            &tool_names,
            &request.memory_context,
            &request.preference_context,
            &request.excerpts,
        );

        let mut messages = vec![ChatMessage::system(system_prompt)];
        messages.extend(truncate_history(
            &request.history,
            agent.history_limit,
            agent.history_message_chars,
        ));
        messages.push(ChatMessage::user(request.question.clone()));

        let mut collected = Collected {
            retrieved: request.excerpts.clone(),
            ..Collected::default()
        };
        let mut round = 0usize;
        let mut state = LoopState::AwaitingModel;

        let final_text = loop {
            state = match state {
                LoopState::AwaitingModel => {
                    let deadline_passed = request
                        .deadline
                        .map(|deadline| Instant::now() >= deadline)
                        .unwrap_or(false);

                    if tools.is_empty() || round >= agent.max_rounds || deadline_passed {
                        if !tools.is_empty() {
                            tracing::info!(
                                "Forcing final answer for session {} after {} rounds (deadline passed: {})",
                                request.session_id,
                                round,
                                deadline_passed
                            );
                        }
                        let completion = self.call_model(&messages, &[], model).await?;
                        LoopState::Done(completion.content)
                    } else {
                        round += 1;
                        tracing::debug!("Round {} for session {}", round, request.session_id);
                        let completion = self.call_model(&messages, &tools, model).await?;
                        if completion.wants_tools() {
                            messages.push(ChatMessage::assistant_tool_calls(
                                completion.content,
                                completion.tool_calls.clone(),
                            ));
                            LoopState::ExecutingTools(completion.tool_calls)
                        } else {
                            LoopState::Done(completion.content)
                        }
                    }
                }
                LoopState::ExecutingTools(calls) => {
                    for call in calls {
                        collected.tool_calls.push(ToolCallRecord {
                            round,
                            name: call.name.clone(),
                            arguments: call.arguments.clone(),
                        });
                        let content = self
                            .execute_tool(&call, &request, model, &mut collected)
                            .await;
                        messages.push(ChatMessage::tool_result(&call, content));
                    }
                    LoopState::AwaitingModel
                }
                LoopState::Done(text) => break text,
            };
        };

        let (answer, suggestions) = extract_suggestions(&final_text);
        let answer = if answer.is_empty() {
            EMPTY_ANSWER_FALLBACK.to_string()
        } else {
            answer
        };

        let sources = self.rag.build_sources(&dedupe_chunks(collected.retrieved));

        tracing::info!(
            "Answered in session {}: rounds={} tool_calls={} artifacts={} sources={}",
            request.session_id,
            round,
            collected.tool_calls.len(),
            collected.artifacts.len(),
            sources.len()
        );

        Ok(AnswerResult {
            answer,
            sources,
            artifacts: collected.artifacts,
            suggestions,
            tool_calls: collected.tool_calls,
        })
    }

    /// Run one tool call and return the text fed back to the model.
    async fn execute_tool(
        &self,
        call: &ToolCall,
        request: &AnswerRequest,
        model: &str,
        collected: &mut Collected,
    ) -> String {
        let output = match self
            .tools
            .execute(&call.name, &call.arguments, &request.session_id, &request.user_id)
            .await
        {
            Ok(output) => output,
            Err(err) => {
                tracing::warn!("Tool call {} rejected: {}", call.name, err);
                return json!({ "error": err.to_string() }).to_string();
            }
        };

        collected.retrieved.extend(output.retrieved.iter().cloned());

        if !output.is_grounded_generation() {
            return output.payload.to_string();
        }

        let artifact = match self
            .call_model(&generation_messages(&output.payload), &[], model)
            .await
        {
            Ok(completion) => build_artifact(&output.payload, &completion.content),
            Err(err) => {
                tracing::warn!("Artifact generation for {} failed: {}", call.name, err);
                None
            }
        };

        let feedback = tool_feedback(&output.payload, artifact.as_ref());
        if let Some(artifact) = artifact {
            collected.artifacts.push(artifact);
        }
        feedback.to_string()
    }
}

fn dedupe_chunks(chunks: Vec<RetrievedChunk>) -> Vec<RetrievedChunk> {
    let mut seen = HashSet::new();
    chunks
        .into_iter()
        .filter(|chunk| seen.insert(chunk.chunk_id.clone()))
        .collect()
}
