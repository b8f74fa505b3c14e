//! Domain error taxonomy.
//!
//! Plumbing code returns `anyhow::Result` and wraps an [`AssistantError`]
//! wherever a failure belongs to one of the categories callers react to
//! (the HTTP layer downcasts to choose a status code, the agent turns tool
//! failures into text).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AssistantError {
    /// Upload or ingest of a file whose extension is not `.pdf` / `.csv`.
    #[error("unsupported format '{0}': PDF or CSV only")]
    UnsupportedFormat(String),

    #[error("unknown equipment_id: {0}")]
    UnknownEquipment(String),

    /// Nothing has been ingested yet. Retrieval degrades to an empty
    /// result instead of surfacing this to HTTP callers.
    #[error("no documents ingested yet")]
    IndexUnavailable,

    #[error("tool '{tool}' failed: {message}")]
    ToolExecution { tool: String, message: String },

    /// Embedding, LLM or database call that failed after retries.
    #[error("{service} error: {message}")]
    ExternalService { service: String, message: String },

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl AssistantError {
    pub fn external(service: impl Into<String>, message: impl std::fmt::Display) -> Self {
        AssistantError::ExternalService {
            service: service.into(),
            message: message.to_string(),
        }
    }
}

impl From<sqlx::Error> for AssistantError {
    fn from(err: sqlx::Error) -> Self {
        AssistantError::Storage(err.to_string())
    }
}
