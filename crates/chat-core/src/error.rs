//! Error Types

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// Completion service unreachable, timed out or rate limited
    #[error("Completion service unavailable: {0}")]
    TransientUnavailable(String),

    /// Completion service answered with something that is neither text nor tool calls
    #[error("Malformed model response: {0}")]
    MalformedResponse(String),

    /// Completion service rejected the request
    #[error("Provider error: {0}")]
    Provider(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Tool not found in registry
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// A tool with this name is already registered
    #[error("Duplicate tool: {0}")]
    DuplicateTool(String),

    /// Arguments emitted by the model could not be decoded for the tool
    #[error("Invalid tool arguments: {0}")]
    InvalidToolArguments(String),

    /// Tool execution failed
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// A message would break the tool-call ordering of the conversation
    #[error("Invalid message sequence: {0}")]
    InvalidSequence(String),

    /// Maximum tool-call rounds reached in one turn
    #[error("Maximum tool rounds ({0}) reached")]
    MaxIterations(usize),

    /// Session error
    #[error("Session error: {0}")]
    Session(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AgentError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, AgentError::TransientUnavailable(_))
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            AgentError::TransientUnavailable(_) => {
                "The AI service is currently unavailable. Please try again.".into()
            }
            AgentError::MalformedResponse(_) => {
                "The AI service returned an unexpected response. Please retry.".into()
            }
            AgentError::Provider(msg) => format!("The AI service encountered an error: {msg}"),
            AgentError::Auth(_) => "Authentication with the AI service failed.".into(),
            AgentError::MaxIterations(_) => {
                "The request took too many steps to process. Please try a simpler query.".into()
            }
            AgentError::Session(msg) => format!("Session error: {msg}"),
            _ => "An unexpected error occurred.".into(),
        }
    }
}
