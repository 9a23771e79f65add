use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("cannot index: {0}")]
    Extraction(String),
    #[error("embedding failed: {0}")]
    Embedding(String),
    #[error("vector store error: {0}")]
    Store(String),
    #[error("model provider error: {0}")]
    Provider(String),
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        ApiError::Internal(err.to_string())
    }

    pub fn store<E: std::fmt::Display>(err: E) -> Self {
        ApiError::Store(err.to_string())
    }

    pub fn provider<E: std::fmt::Display>(err: E) -> Self {
        ApiError::Provider(err.to_string())
    }
}
