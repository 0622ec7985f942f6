//! Error Types for File and Search Tools

use thiserror::Error;

use chat_core::AgentError;

pub type Result<T> = std::result::Result<T, ToolsError>;

#[derive(Error, Debug)]
pub enum ToolsError {
    #[error("Search index unavailable: {0}")]
    Unavailable(String),

    #[error("Search index timed out: {0}")]
    Timeout(String),

    #[error("Invalid search index response: {0}")]
    InvalidResponse(String),

    #[error("Files directory error: {0}")]
    Directory(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for ToolsError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ToolsError::Timeout(err.to_string())
        } else if err.is_decode() {
            ToolsError::InvalidResponse(err.to_string())
        } else {
            ToolsError::Unavailable(err.to_string())
        }
    }
}

impl From<ToolsError> for AgentError {
    fn from(err: ToolsError) -> Self {
        match err {
            ToolsError::Config(msg) => AgentError::Config(msg),
            other => AgentError::ToolExecution(other.to_string()),
        }
    }
}
