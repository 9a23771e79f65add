use crate::core::config::PersonaSettings;
use crate::llm::types::{ChatMessage, ROLE_ASSISTANT, ROLE_USER};
use crate::rag::RetrievedChunk;

pub fn build_system_prompt(
    persona: Option<&PersonaSettings>,
    tool_names: &[&str],
    memory_context: &str,
    preference_context: &str,
    excerpts: &[RetrievedChunk],
) -> String {
    let persona_text = persona
        .map(|p| p.system_prompt.trim().to_string())
        .unwrap_or_else(|| "You are a helpful study assistant.".to_string());

    let tool_text = if tool_names.is_empty() {
        "No tools are available for this answer. Use only the document excerpts below.".to_string()
    } else {
        format!(
            "You have access to the following tools: {}.\n\
Use search_documents to find evidence before answering factual questions, and cite page numbers from its results.\n\
Use generate_quiz, create_study_guide, generate_flashcards or generate_visualization when the user asks for study material.",
            tool_names.join(", ")
        )
    };

    let mut prompt = format!(
        "{persona_text}\n\n\
<instructions>\n\
Answer using only the user's uploaded documents.\n\
{tool_text}\n\
Never invent facts, quotes or page numbers that the documents do not support.\n\
If the documents do not contain the answer, say so plainly and end your reply with a fenced block of up to three alternative questions the documents could answer:\n\
```suggestions\n\
[\"alternative question\", \"another question\"]\n\
```\n\
</instructions>"
    );

    if !memory_context.trim().is_empty() {
        prompt.push_str(&format!(
            "\n\n<user_memory>\nRelevant past interactions: {}\n</user_memory>",
            memory_context.trim()
        ));
    }
    if !preference_context.trim().is_empty() {
        prompt.push_str(&format!(
            "\n\n<user_preferences>\n{}\n</user_preferences>",
            preference_context.trim()
        ));
    }
    if !excerpts.is_empty() {
        prompt.push_str("\n\n<document_excerpts>");
        for (idx, chunk) in excerpts.iter().enumerate() {
            let pages = chunk
                .pages
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            prompt.push_str(&format!("\n[{}] (pages {})\n{}\n", idx + 1, pages, chunk.text));
        }
        prompt.push_str("</document_excerpts>");
    }

    prompt
}

/// Keep the last `limit` user/assistant turns, each cut to `max_chars`.
pub fn truncate_history(history: &[ChatMessage], limit: usize, max_chars: usize) -> Vec<ChatMessage> {
    let turns: Vec<&ChatMessage> = history
        .iter()
        .filter(|m| (m.role == ROLE_USER || m.role == ROLE_ASSISTANT) && !m.content.trim().is_empty())
        .collect();
    let start = turns.len().saturating_sub(limit);

    turns[start..]
        .iter()
        .map(|message| {
            let content = if message.content.chars().count() > max_chars {
                message.content.chars().take(max_chars).collect()
            } else {
                message.content.clone()
            };
            ChatMessage::new(&message.role, content)
        })
        .collect()
}
