//! Completion Provider Strategy Pattern
//!
//! Defines the seam between the orchestration loop and a remote
//! chat-completion service. A provider receives the full conversation plus
//! the tool manifest and answers with either final text or a batch of tool
//! requests.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use chat_core::provider::{LlmProvider, GenerationOptions};
//!
//! let outcome = provider
//!     .complete(conversation.snapshot(), &registry.schema_manifest(), &options)
//!     .await?;
//! ```

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::error::Result;
use crate::message::Message;
use crate::tool::{ToolCall, ToolSchema};

/// Configuration for LLM generation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model identifier (e.g., "gpt-5-nano", "gpt-4o-mini")
    #[serde(default = "default_model")]
    pub model: String,

    /// Temperature for sampling; left to the service default when unset
    #[serde(default)]
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

pub const DEFAULT_MODEL: &str = "gpt-5-nano";

fn default_model() -> String {
    DEFAULT_MODEL.into()
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: None,
            max_tokens: None,
        }
    }
}

impl GenerationOptions {
    /// Read `CHAT_MODEL`, falling back to the default model
    pub fn from_env() -> Self {
        Self {
            model: std::env::var("CHAT_MODEL").unwrap_or_else(|_| default_model()),
            ..Default::default()
        }
    }
}

/// What the model wants next
#[derive(Clone, Debug, PartialEq)]
pub enum CompletionOutcome {
    /// Terminal text for this turn
    FinalAnswer(String),

    /// Tools to run before the model can answer
    ToolRequests {
        /// Text the model sent alongside the calls (usually empty)
        content: String,
        calls: Vec<ToolCall>,
    },
}

/// A chunk from streaming completion.
///
/// A provider yields either `Text` deltas (the final answer) or exactly one
/// `ToolRequests` chunk for a tool round, never both.
#[derive(Clone, Debug, PartialEq)]
pub enum CompletionChunk {
    Text(String),
    ToolRequests { content: String, calls: Vec<ToolCall> },
}

/// Stream type for completion streaming
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<CompletionChunk>> + Send>>;

/// Provider metadata
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderInfo {
    /// Provider name (e.g., "OpenAI")
    pub name: String,

    /// Endpoint the provider talks to
    pub endpoint: String,

    /// Whether streaming is supported
    pub supports_streaming: bool,

    /// Whether tool/function calling is supported
    pub supports_tools: bool,
}

/// Strategy trait for completion providers
///
/// Implement this trait to add support for new LLM backends.
/// The agent works exclusively through this interface. Implementations
/// perform one network call per `complete` and must not touch the
/// conversation.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Get provider information and capabilities
    fn info(&self) -> ProviderInfo;

    /// Check if the provider is available and configured correctly
    async fn health_check(&self) -> Result<bool>;

    /// Request the next step of the conversation
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> Result<CompletionOutcome>;

    /// Streaming variant of [`LlmProvider::complete`]
    async fn complete_stream(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> Result<CompletionStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_options_defaults() {
        let opts = GenerationOptions::default();
        assert_eq!(opts.model, "gpt-5-nano");
        assert!(opts.temperature.is_none());
        assert!(opts.max_tokens.is_none());
    }

    #[test]
    fn test_generation_options_deserialize_partial() {
        let opts: GenerationOptions = serde_json::from_str(r#"{"temperature":0.2}"#).unwrap();
        assert_eq!(opts.model, DEFAULT_MODEL);
        assert_eq!(opts.temperature, Some(0.2));
    }
}
