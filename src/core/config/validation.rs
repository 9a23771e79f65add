use serde_json::{Map, Value};
use crate::core::errors::ApiError;

pub fn validate_config(config: &Value) -> Result<(), ApiError> {
    let root = config
        .as_object()
        .ok_or_else(|| config_type_error("root", "object"))?;

    if let Some(rag) = expect_optional_object(root, "rag")? {
        validate_u64_field(rag, "rag.chunk_size", "chunk_size", 50, 100_000)?;
        validate_u64_field(rag, "rag.chunk_overlap", "chunk_overlap", 0, 50_000)?;
        validate_u64_field(rag, "rag.n_results", "n_results", 1, 50)?;
        validate_u64_field(rag, "rag.deep_think_results", "deep_think_results", 1, 50)?;
        validate_u64_field(rag, "rag.excerpt_chars", "excerpt_chars", 10, 10_000)?;
        validate_u64_field(
            rag,
            "rag.download_timeout_secs",
            "download_timeout_secs",
            1,
            3_600,
        )?;

        let size = rag.get("chunk_size").and_then(Value::as_u64).unwrap_or(1000);
        let overlap = rag.get("chunk_overlap").and_then(Value::as_u64).unwrap_or(200);
        if overlap >= size {
            return Err(ApiError::BadRequest(format!(
                "Invalid config at 'rag.chunk_overlap': must be smaller than rag.chunk_size ({})",
                size
            )));
        }
    }

    if let Some(llm) = expect_optional_object(root, "llm")? {
        if let Some(provider) = llm.get("provider") {
            match provider.as_str() {
                Some("openai") | Some("gemini") => {}
                Some(other) => {
                    return Err(ApiError::BadRequest(format!(
                        "Invalid config at 'llm.provider': unsupported provider '{}'",
                        other
                    )))
                }
                None => return Err(config_type_error("llm.provider", "string")),
            }
        }
        validate_optional_string_field(llm, "llm.base_url", "base_url")?;
        validate_optional_string_field(llm, "llm.api_key", "api_key")?;
        validate_optional_string_field(llm, "llm.chat_model", "chat_model")?;
        validate_optional_string_field(llm, "llm.deep_think_model", "deep_think_model")?;
        validate_optional_string_field(llm, "llm.embedding_model", "embedding_model")?;
        validate_u64_field(llm, "llm.max_tokens", "max_tokens", 1, 1_000_000)?;
        validate_u64_field(llm, "llm.timeout_secs", "timeout_secs", 1, 3_600)?;
    }

    if let Some(embedding) = expect_optional_object(root, "embedding")? {
        validate_u64_field(embedding, "embedding.batch_size", "batch_size", 1, 2_048)?;
    }

    if let Some(agent) = expect_optional_object(root, "agent")? {
        validate_u64_field(agent, "agent.max_rounds", "max_rounds", 1, 10)?;
        validate_u64_field(agent, "agent.history_limit", "history_limit", 0, 200)?;
        validate_u64_field(
            agent,
            "agent.history_message_chars",
            "history_message_chars",
            100,
            100_000,
        )?;
        validate_optional_string_field(agent, "agent.default_persona", "default_persona")?;
    }

    if let Some(memory) = expect_optional_object(root, "memory")? {
        validate_bool_field(memory, "memory.enabled", "enabled")?;
        validate_u64_field(memory, "memory.retrieval_limit", "retrieval_limit", 1, 20)?;
    }

    if let Some(personas) = expect_optional_object(root, "personas")? {
        for (persona_id, value) in personas {
            let path_prefix = format!("personas.{}", persona_id);
            let entry = value
                .as_object()
                .ok_or_else(|| config_type_error(&path_prefix, "object"))?;
            validate_required_string_field(entry, &format!("{}.name", path_prefix), "name")?;
            validate_optional_string_field(
                entry,
                &format!("{}.description", path_prefix),
                "description",
            )?;
            validate_required_string_field(
                entry,
                &format!("{}.system_prompt", path_prefix),
                "system_prompt",
            )?;
        }
    }

    Ok(())
}

fn expect_optional_object<'a>(
    root: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a Map<String, Value>>, ApiError> {
    match root.get(key) {
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(config_type_error(key, "object")),
        None => Ok(None),
    }
}

fn validate_bool_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.as_bool().is_some() {
        return Ok(());
    }
    Err(config_type_error(path, "boolean"))
}

fn validate_u64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: u64,
    max: u64,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_u64() else {
        return Err(config_type_error(path, "integer"));
    };
    if number < min || number > max {
        return Err(ApiError::BadRequest(format!(
            "Invalid config at '{}': must be between {} and {}",
            path, min, max
        )));
    }
    Ok(())
}

fn validate_required_string_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let value = section.get(key).ok_or_else(|| {
        ApiError::BadRequest(format!("Invalid config at '{}': value is required", path))
    })?;
    let Some(text) = value.as_str() else {
        return Err(config_type_error(path, "string"));
    };
    if text.trim().is_empty() {
        return Err(ApiError::BadRequest(format!(
            "Invalid config at '{}': value cannot be empty",
            path
        )));
    }
    Ok(())
}

fn validate_optional_string_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.as_str().is_none() && !value.is_null() {
        return Err(config_type_error(path, "string"));
    }
    Ok(())
}

fn config_type_error(path: &str, expected: &str) -> ApiError {
    ApiError::BadRequest(format!(
        "Invalid config at '{}': expected {}",
        path, expected
    ))
}
