//! # chat-runtime
//!
//! Completion service providers for the chat agent.
//!
//! ## Providers
//!
//! - **OpenAI** (default): `/chat/completions` with function calling, plain
//!   or streamed (SSE). Any OpenAI-compatible gateway works through
//!   `OPENAI_BASE_URL`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use chat_runtime::OpenAiProvider;
//!
//! let provider = OpenAiProvider::from_env()?;
//! let agent = AgentBuilder::new()
//!     .provider(Arc::new(provider))
//!     .build()?;
//! ```

#[cfg(feature = "openai")]
pub mod openai;

#[cfg(feature = "openai")]
pub use openai::{OpenAiConfig, OpenAiProvider};

// Re-export core types for convenience
pub use chat_core::{
    Agent, AgentError, LlmProvider, Message, Result, Role, Session, Tool, ToolRegistry,
};
