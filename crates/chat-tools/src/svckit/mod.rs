//! Service Kit - Agent Tools
//!
//! File lookup and retrieval tools that implement `chat_core::Tool`.

mod file_by_content;
mod file_content;
mod search_files;

pub use file_by_content::GetFileContentByPartOfItTool;
pub use file_content::GetFileContentTool;
pub use search_files::{SearchFilesTool, SEARCH_LIMIT};

use chat_core::{AgentError, Result as CoreResult};

/// Text handed back to the model for a located file
fn format_file(name: &str, content: &str) -> String {
    format!("File: {name}\n\n{content}")
}

/// Reject an empty or whitespace-only argument, which would match anything
fn require_non_blank<'a>(tool: &str, param: &str, value: &'a str) -> CoreResult<&'a str> {
    if value.trim().is_empty() {
        return Err(AgentError::InvalidToolArguments(format!(
            "{tool}: '{param}' must not be blank"
        )));
    }
    Ok(value)
}
