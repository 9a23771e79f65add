//! The operations exposed to callers.
//!
//! `StudyService` ties the RAG engine, the agent loop, long-term memory and
//! the session history together. It is constructed once and shared.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::Instant;

use crate::agent::{AgenticLoop, AnswerMode, AnswerRequest, AnswerResult};
use crate::core::config::Settings;
use crate::core::errors::ApiError;
use crate::history::{DocumentRecord, HistoryStore, SessionInfo};
use crate::llm::ChatMessage;
use crate::memory::MemoryService;
use crate::rag::{derive_document_id, IndexStats, QueryResult, RagEngine, RetrievedChunk};

const FEEDBACK_ANSWER_CHARS: usize = 300;
const MEMORY_CONTEXT_ITEMS: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedDocument {
    pub document_id: String,
    #[serde(flatten)]
    pub stats: IndexStats,
}

#[derive(Debug, Clone)]
pub struct AnswerInput {
    pub question: String,
    pub session_id: String,
    pub user_id: String,
    pub mode: AnswerMode,
    pub deadline: Option<Instant>,
}

impl AnswerInput {
    pub fn new(question: impl Into<String>, session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            session_id: session_id.into(),
            user_id: user_id.into(),
            mode: AnswerMode::Standard,
            deadline: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnsweredMessage {
    pub message_id: i64,
    #[serde(flatten)]
    pub result: AnswerResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneShotAnswer {
    pub text: String,
    #[serde(flatten)]
    pub result: AnswerResult,
}

pub struct StudyService {
    settings: Arc<Settings>,
    rag: Arc<RagEngine>,
    agent: AgenticLoop,
    memory: MemoryService,
    history: HistoryStore,
}

impl StudyService {
    pub fn new(
        settings: Arc<Settings>,
        rag: Arc<RagEngine>,
        agent: AgenticLoop,
        memory: MemoryService,
        history: HistoryStore,
    ) -> Self {
        Self {
            settings,
            rag,
            agent,
            memory,
            history,
        }
    }

    pub fn rag(&self) -> &Arc<RagEngine> {
        &self.rag
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub async fn create_session(
        &self,
        user_id: &str,
        persona: Option<&str>,
        title: Option<String>,
    ) -> Result<String, ApiError> {
        let persona = match persona.map(str::trim).filter(|p| !p.is_empty()) {
            Some(persona) if self.settings.personas.contains_key(persona) => persona.to_string(),
            Some(persona) => {
                return Err(ApiError::BadRequest(format!("Unknown persona: {}", persona)));
            }
            None => self.settings.agent.default_persona.clone(),
        };
        let session_id = self.history.create_session(user_id, &persona, title).await?;
        tracing::info!("Created session {} for user {} ({})", session_id, user_id, persona);
        Ok(session_id)
    }

    /// A session that exists and belongs to `user_id`.
    async fn owned_session(&self, session_id: &str, user_id: &str) -> Result<SessionInfo, ApiError> {
        match self.history.get_session(session_id).await? {
            Some(session) if session.user_id == user_id => Ok(session),
            _ => Err(ApiError::NotFound(format!("Session {} not found", session_id))),
        }
    }

    /// Index a local file into a session. Without an explicit id the
    /// document id is derived from the session, file name and content.
    pub async fn index(
        &self,
        file: &Path,
        document_id: Option<String>,
        session_id: &str,
        user_id: &str,
    ) -> Result<IndexedDocument, ApiError> {
        self.owned_session(session_id, user_id).await?;

        let file_name = file
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());
        let document_id = match document_id {
            Some(id) => id,
            None => {
                let bytes = tokio::fs::read(file)
                    .await
                    .map_err(|e| ApiError::Extraction(format!("Cannot read {}: {}", file.display(), e)))?;
                derive_document_id(session_id, &file_name, &bytes)
            }
        };

        let stats = self.rag.index(file, &document_id, session_id, user_id).await?;
        self.record_document(&document_id, session_id, &file_name, &stats).await;

        Ok(IndexedDocument { document_id, stats })
    }

    /// Download and index a remote file.
    pub async fn index_url(
        &self,
        url: &str,
        file_name: &str,
        session_id: &str,
        user_id: &str,
    ) -> Result<IndexedDocument, ApiError> {
        self.owned_session(session_id, user_id).await?;

        let document_id = derive_document_id(session_id, file_name, url.as_bytes());
        let indexed = self
            .rag
            .index_from_url(url, file_name, &document_id, session_id, user_id)
            .await?;
        self.record_document(&document_id, session_id, file_name, &indexed.stats)
            .await;

        Ok(IndexedDocument {
            document_id,
            stats: indexed.stats,
        })
    }

    async fn record_document(&self, document_id: &str, session_id: &str, file_name: &str, stats: &IndexStats) {
        let record = DocumentRecord {
            document_id: document_id.to_string(),
            session_id: session_id.to_string(),
            file_name: file_name.to_string(),
            chunk_count: stats.chunk_count,
            page_count: stats.page_count,
        };
        if let Err(err) = self.history.record_document(&record).await {
            tracing::warn!("Failed to record document {}: {}", document_id, err);
        }
    }

    pub async fn query(
        &self,
        question: &str,
        session_id: &str,
        user_id: &str,
        n_results: Option<usize>,
    ) -> QueryResult {
        let n_results = n_results.unwrap_or(self.settings.rag.n_results);
        self.rag.query(question, session_id, user_id, n_results).await
    }

    /// Answer a question in a session and persist both turns.
    pub async fn answer(&self, input: AnswerInput) -> Result<AnsweredMessage, ApiError> {
        let session = self.owned_session(&input.session_id, &input.user_id).await?;

        let history: Vec<ChatMessage> = self
            .history
            .recent_messages(&input.session_id, self.settings.agent.history_limit)
            .await?
            .iter()
            .map(|message| message.to_chat_message())
            .collect();

        let memories = self
            .memory
            .retrieve_relevant_memory(&input.user_id, &input.question, self.settings.memory.retrieval_limit)
            .await;
        let memory_context = memories
            .iter()
            .take(MEMORY_CONTEXT_ITEMS)
            .cloned()
            .collect::<Vec<_>>()
            .join(" | ");
        let preference_context = self.memory.get_user_preferences(&input.user_id).await;

        self.history
            .add_message(&input.session_id, "user", &input.question, None)
            .await?;

        let persona = if session.persona.is_empty() {
            self.settings.agent.default_persona.clone()
        } else {
            session.persona
        };

        let mut request = AnswerRequest::new(input.question, input.session_id.clone(), input.user_id);
        request.history = history;
        request.persona = persona;
        request.memory_context = memory_context;
        request.preference_context = preference_context;
        request.mode = input.mode;
        request.deadline = input.deadline;

        let result = self.agent.answer(request).await;

        let metadata = json!({
            "sources": result.sources,
            "artifacts": result.artifacts,
            "suggestions": result.suggestions,
            "tool_calls": result.tool_calls,
        });
        let message_id = self
            .history
            .add_message(&input.session_id, "assistant", &result.answer, Some(metadata))
            .await?;

        tracing::info!("Answered in session {} as message {}", input.session_id, message_id);
        Ok(AnsweredMessage { message_id, result })
    }

    /// Two-phase teardown: vector records first (failure is logged and does
    /// not block), then the session row with its messages and documents.
    pub async fn delete_session(&self, session_id: &str, user_id: &str) -> Result<(), ApiError> {
        self.owned_session(session_id, user_id).await?;

        if let Err(err) = self.rag.delete_session(session_id).await {
            tracing::warn!(
                "Vector cleanup for session {} failed; records may be orphaned: {}",
                session_id,
                err
            );
        }

        self.history.delete_session(session_id).await?;
        tracing::info!("Deleted session {}", session_id);
        Ok(())
    }

    /// Remove one indexed document from a session: its vectors, then its
    /// history record.
    pub async fn delete_document(
        &self,
        session_id: &str,
        user_id: &str,
        document_id: &str,
    ) -> Result<usize, ApiError> {
        self.owned_session(session_id, user_id).await?;

        let deleted = self.rag.delete_document(document_id, session_id, user_id).await?;
        let recorded = self.history.delete_document(session_id, document_id).await?;
        if deleted == 0 && !recorded {
            return Err(ApiError::NotFound(format!("Document {} not found", document_id)));
        }
        Ok(deleted)
    }

    /// Remember a rated interaction for the user's future answers.
    pub async fn store_feedback(&self, user_id: &str, question: &str, answer: &str, feedback: &str) {
        let answer: String = answer.chars().take(FEEDBACK_ANSWER_CHARS).collect();
        self.memory
            .store_interaction(user_id, question, &answer, Some(feedback))
            .await;
    }

    /// Rate an assistant message and feed the rating into long-term memory.
    pub async fn rate_message(&self, user_id: &str, message_id: i64, feedback: &str) -> Result<(), ApiError> {
        if feedback != "up" && feedback != "down" {
            return Err(ApiError::BadRequest("Feedback must be 'up' or 'down'".to_string()));
        }

        let message = self
            .history
            .get_message(message_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Message {} not found", message_id)))?;
        self.owned_session(&message.session_id, user_id).await?;

        self.history.set_feedback(message_id, feedback).await?;

        match self
            .history
            .preceding_user_message(&message.session_id, message_id)
            .await
        {
            Ok(Some(question)) => {
                self.store_feedback(user_id, &question.content, &message.content, feedback)
                    .await
            }
            Ok(None) => {}
            Err(err) => tracing::warn!("Feedback memory skipped for message {}: {}", message_id, err),
        }
        Ok(())
    }

    /// Answer a question about files without a persistent session. The
    /// files are indexed under a throwaway scope, the relevant passages are
    /// retrieved, and the scratch records are deleted before answering.
    pub async fn ask_once(
        &self,
        files: &[PathBuf],
        question: &str,
        user_id: &str,
        history: Vec<ChatMessage>,
        mode: AnswerMode,
        persona: Option<&str>,
    ) -> Result<OneShotAnswer, ApiError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ApiError::BadRequest("A question is required".to_string()));
        }
        if files.is_empty() {
            return Err(ApiError::BadRequest("At least one file is required".to_string()));
        }

        let scratch_session = format!("scratch_{}", uuid::Uuid::new_v4().simple());
        let mut texts = Vec::new();
        let mut chunk_total = 0usize;

        for file in files {
            let file_name = file
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_else(|| "file".to_string());
            let document_id = derive_document_id(&scratch_session, &file_name, file.to_string_lossy().as_bytes());
            match self.rag.index(file, &document_id, &scratch_session, user_id).await {
                Ok(stats) => {
                    chunk_total += stats.chunk_count;
                    texts.push(stats.extracted_text);
                }
                Err(err) => tracing::warn!("Skipping {}: {}", file.display(), err),
            }
        }

        let excerpts: Vec<RetrievedChunk> = if chunk_total > 0 {
            let n_results = match mode {
                AnswerMode::DeepThink => self.settings.rag.deep_think_results,
                AnswerMode::Standard => self.settings.rag.n_results,
            };
            self.rag
                .query(question, &scratch_session, user_id, n_results.min(chunk_total).max(1))
                .await
                .chunks
        } else {
            Vec::new()
        };

        if let Err(err) = self.rag.delete_session(&scratch_session).await {
            tracing::warn!("Failed to remove scratch records {}: {}", scratch_session, err);
        }

        if chunk_total == 0 {
            return Err(ApiError::Extraction(
                "Failed to extract text from the provided file(s)".to_string(),
            ));
        }

        let mut request = AnswerRequest::new(question, scratch_session, user_id);
        request.history = history;
        request.persona = persona
            .map(str::to_string)
            .unwrap_or_else(|| self.settings.agent.default_persona.clone());
        request.mode = mode;
        request.excerpts = excerpts;
        request.allow_tools = false;

        let result = self.agent.answer(request).await;

        Ok(OneShotAnswer {
            text: texts.join("\n\n").trim().to_string(),
            result,
        })
    }
}
