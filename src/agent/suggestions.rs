use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

const MAX_SUGGESTIONS: usize = 5;

fn suggestions_block() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?s)```suggestions[ \t]*\r?\n?(.*?)```").ok())
        .as_ref()
}

/// Split a model answer into the visible text and any suggested follow-up
/// questions. Malformed blocks are dropped from the text and yield nothing.
pub fn extract_suggestions(answer: &str) -> (String, Vec<String>) {
    let Some(pattern) = suggestions_block() else {
        return (answer.trim().to_string(), Vec::new());
    };
    let Some(captures) = pattern.captures(answer) else {
        return (answer.trim().to_string(), Vec::new());
    };

    let body = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
    let suggestions = parse_block(body);
    let cleaned = pattern.replace_all(answer, "").trim().to_string();

    (cleaned, suggestions)
}

fn parse_block(body: &str) -> Vec<String> {
    let body = body.trim();
    if body.is_empty() {
        return Vec::new();
    }

    let items: Vec<String> = if body.starts_with('[') {
        match serde_json::from_str::<Value>(body) {
            Ok(Value::Array(values)) => values
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => {
                tracing::debug!("Ignoring malformed suggestions block");
                return Vec::new();
            }
        }
    } else {
        body.lines()
            .map(|line| {
                line.trim()
                    .trim_start_matches(|c: char| c == '-' || c == '*' || c == '•')
                    .trim_start_matches(|c: char| c.is_ascii_digit())
                    .trim_start_matches(['.', ')'])
                    .trim()
                    .to_string()
            })
            .collect()
    };

    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .take(MAX_SUGGESTIONS)
        .collect()
}
