use uuid::Uuid;

use super::store::{MemoryRecord, MemoryStore};
use crate::llm::EmbeddingGateway;

const QUESTION_CHARS: usize = 200;
const ANSWER_CHARS: usize = 300;
const FEEDBACK_SCAN_LIMIT: usize = 20;
const PREFERENCE_EXAMPLES: usize = 5;
const PREFERENCE_EXAMPLE_CHARS: usize = 80;

/// Long-term, per-user memory of past interactions.
///
/// Every operation is best-effort: failures are logged and degrade to "no
/// memory" rather than failing the caller.
#[derive(Clone)]
pub struct MemoryService {
    store: MemoryStore,
    embeddings: EmbeddingGateway,
    enabled: bool,
}

impl MemoryService {
    pub fn new(store: MemoryStore, embeddings: EmbeddingGateway, enabled: bool) -> Self {
        Self {
            store,
            embeddings,
            enabled,
        }
    }

    pub async fn store_interaction(
        &self,
        user_id: &str,
        question: &str,
        answer: &str,
        feedback: Option<&str>,
    ) {
        if !self.enabled {
            return;
        }

        let summary = interaction_summary(question, answer, feedback);
        let embedding = match self.embeddings.embed_one(&summary).await {
            Ok(embedding) => embedding,
            Err(err) => {
                tracing::warn!("Failed to store memory for user {}: {}", user_id, err);
                return;
            }
        };

        let record = MemoryRecord {
            id: format!("mem_{}_{}", user_id, Uuid::new_v4().simple()),
            user_id: user_id.to_string(),
            summary,
            feedback: feedback.unwrap_or_default().to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
        };

        if let Err(err) = self.store.insert(&record, &embedding).await {
            tracing::warn!("Failed to store memory for user {}: {}", user_id, err);
        }
    }

    /// Summaries of the user's past interactions closest to `question`.
    pub async fn retrieve_relevant_memory(&self, user_id: &str, question: &str, n: usize) -> Vec<String> {
        if !self.enabled || n == 0 {
            return Vec::new();
        }

        let embedding = match self.embeddings.embed_one(question).await {
            Ok(embedding) => embedding,
            Err(err) => {
                tracing::warn!("Memory retrieval failed for user {}: {}", user_id, err);
                return Vec::new();
            }
        };

        match self.store.search(user_id, &embedding, n).await {
            Ok(results) => results.into_iter().map(|(record, _)| record.summary).collect(),
            Err(err) => {
                tracing::warn!("Memory retrieval failed for user {}: {}", user_id, err);
                Vec::new()
            }
        }
    }

    /// One-line digest of what the user rated up and down, or `""`.
    pub async fn get_user_preferences(&self, user_id: &str) -> String {
        if !self.enabled {
            return String::new();
        }

        let liked = self.store.with_feedback(user_id, "up", FEEDBACK_SCAN_LIMIT).await;
        let disliked = self.store.with_feedback(user_id, "down", FEEDBACK_SCAN_LIMIT).await;
        let (liked, disliked) = match (liked, disliked) {
            (Ok(liked), Ok(disliked)) => (liked, disliked),
            (Err(err), _) | (_, Err(err)) => {
                tracing::warn!("Preference aggregation failed for user {}: {}", user_id, err);
                return String::new();
            }
        };

        let mut parts = Vec::new();
        if !liked.is_empty() {
            parts.push(format!("User liked responses like: {}", examples(&liked)));
        }
        if !disliked.is_empty() {
            parts.push(format!("User disliked responses like: {}", examples(&disliked)));
        }
        parts.join(" | ")
    }
}

fn interaction_summary(question: &str, answer: &str, feedback: Option<&str>) -> String {
    let mut summary = format!(
        "Q: {}\nA: {}",
        truncate_chars(question, QUESTION_CHARS),
        truncate_chars(answer, ANSWER_CHARS)
    );
    if let Some(feedback) = feedback.filter(|f| !f.is_empty()) {
        summary.push_str(&format!("\nFeedback: {}", feedback));
    }
    summary
}

fn examples(records: &[MemoryRecord]) -> String {
    records
        .iter()
        .take(PREFERENCE_EXAMPLES)
        .map(|r| truncate_chars(&r.summary, PREFERENCE_EXAMPLE_CHARS))
        .collect::<Vec<_>>()
        .join("; ")
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
