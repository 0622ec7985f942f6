//! Application State

use std::sync::Arc;

use chat_core::{Agent, session::MemorySessionStore};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Agent with the completion provider and file tools wired in
    pub agent: Arc<Agent>,

    /// Conversations by session id, kept for the life of the process
    pub sessions: Arc<MemorySessionStore>,
}

impl AppState {
    pub fn new(agent: Agent) -> Self {
        Self {
            agent: Arc::new(agent),
            sessions: Arc::new(MemorySessionStore::new()),
        }
    }
}
