//! Conversation Messages
//!
//! Standard message format used across the agent system, and the append-only
//! conversation log that is replayed to the completion service on every turn.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};
use crate::tool::ToolCall;

/// Role of a message sender
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompt/instructions
    System,
    /// User input
    User,
    /// Assistant (LLM) response
    Assistant,
    /// Tool result, linked to a request by `tool_call_id`
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// A single message in a conversation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message role
    pub role: Role,

    /// Text content (empty for a pure tool request)
    pub content: String,

    /// Tools requested by an assistant message, in the order the model emitted them
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Request this tool result answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Timestamp
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a new message
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create an assistant message that requests tools
    pub fn assistant_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::new(Role::Assistant, content);
        msg.tool_calls = tool_calls;
        msg
    }

    /// Create a tool result message
    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        let mut msg = Self::new(Role::Tool, content);
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }

    /// Whether this assistant message asks for tools
    pub fn requests_tools(&self) -> bool {
        self.role == Role::Assistant && !self.tool_calls.is_empty()
    }

    /// Estimate token count (rough approximation)
    pub fn estimate_tokens(&self) -> u32 {
        let call_chars: usize = self
            .tool_calls
            .iter()
            .map(|c| c.name.len() + c.arguments.len())
            .sum();
        // ~4 characters per token, +4 for role overhead
        ((self.content.len() + call_chars) / 4) as u32 + 4
    }
}

/// Append-only conversation history.
///
/// Every append is checked against the tool-call sequencing rule: a tool
/// message must answer a still-pending request of the latest assistant
/// message, and nothing else may be appended while requests are pending.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system_prompt(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(prompt)],
        }
    }

    /// Add a message to the end of the log
    pub fn append(&mut self, message: Message) -> Result<()> {
        self.check_sequence(&message)?;
        self.messages.push(message);
        Ok(())
    }

    /// Full ordered history, as sent to the completion service
    pub fn snapshot(&self) -> &[Message] {
        &self.messages
    }

    /// Get the last message
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Ids of tool calls from the latest assistant message that have no result yet
    pub fn pending_tool_calls(&self) -> Vec<&str> {
        let Some(idx) = self.messages.iter().rposition(|m| m.role != Role::Tool) else {
            return Vec::new();
        };
        let request = &self.messages[idx];
        if !request.requests_tools() {
            return Vec::new();
        }

        let answered: HashSet<&str> = self.messages[idx + 1..]
            .iter()
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();

        request
            .tool_calls
            .iter()
            .map(|c| c.id.as_str())
            .filter(|id| !answered.contains(id))
            .collect()
    }

    /// Estimate total tokens in conversation
    pub fn estimate_tokens(&self) -> u32 {
        self.messages.iter().map(Message::estimate_tokens).sum()
    }

    /// Number of messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drop an uncommitted tail. Only the orchestration loop calls this, to
    /// discard a tool batch interrupted by cancellation.
    pub(crate) fn rollback_to(&mut self, len: usize) {
        self.messages.truncate(len);
    }

    fn check_sequence(&self, message: &Message) -> Result<()> {
        let pending = self.pending_tool_calls();

        if message.role == Role::Tool {
            let id = message.tool_call_id.as_deref().ok_or_else(|| {
                AgentError::InvalidSequence("tool message without tool_call_id".into())
            })?;
            if !pending.contains(&id) {
                return Err(AgentError::InvalidSequence(format!(
                    "tool result '{id}' does not answer a pending request"
                )));
            }
            return Ok(());
        }

        if !pending.is_empty() {
            return Err(AgentError::InvalidSequence(format!(
                "{} message appended while tool calls are pending: {}",
                message.role,
                pending.join(", ")
            )));
        }

        if message.tool_call_id.is_some() {
            return Err(AgentError::InvalidSequence(format!(
                "{} message carries a tool_call_id",
                message.role
            )));
        }

        if !message.tool_calls.is_empty() {
            if message.role != Role::Assistant {
                return Err(AgentError::InvalidSequence(format!(
                    "{} message carries tool calls",
                    message.role
                )));
            }
            let mut seen = HashSet::new();
            for call in &message.tool_calls {
                if !seen.insert(call.id.as_str()) || self.has_tool_call(&call.id) {
                    return Err(AgentError::InvalidSequence(format!(
                        "tool call id '{}' is not unique in the conversation",
                        call.id
                    )));
                }
            }
        }

        Ok(())
    }

    fn has_tool_call(&self, id: &str) -> bool {
        self.messages
            .iter()
            .flat_map(|m| m.tool_calls.iter())
            .any(|c| c.id == id)
    }
}
