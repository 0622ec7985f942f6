//! Session Management
//!
//! A session owns one conversation and the state of its current turn.
//! Sessions are independent: nothing mutable is shared between them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{AgentError, Result};
use crate::message::Conversation;

/// Unique session identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a session is in the orchestration state machine
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    /// Idle, waiting for the caller's next message
    #[default]
    AwaitingUserInput,
    /// A completion request is due or in flight
    RequestingCompletion,
    /// Running the tools of the latest assistant message
    DispatchingTools,
    /// Final answer received, being recorded or streamed
    Answering,
}

/// Session metadata
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Session title (auto-generated or user-set)
    pub title: Option<String>,

    /// Model used for this session
    pub model: Option<String>,

    /// Custom tags
    pub tags: Vec<String>,
}

/// A complete agent session
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    /// Unique identifier
    pub id: SessionId,

    /// Conversation history
    pub conversation: Conversation,

    /// Current turn state
    pub state: TurnState,

    /// Session metadata
    pub metadata: SessionMetadata,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last activity timestamp
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a new session
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            conversation: Conversation::new(),
            state: TurnState::AwaitingUserInput,
            metadata: SessionMetadata::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Create with system prompt
    pub fn with_system_prompt(system_prompt: impl Into<String>) -> Self {
        let mut session = Self::new();
        session.conversation = Conversation::with_system_prompt(system_prompt);
        session
    }

    /// Update the activity timestamp
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Set session title
    pub fn set_title(&mut self, title: impl Into<String>) {
        self.metadata.title = Some(title.into());
        self.touch();
    }

    /// A previous turn was interrupted and can be retried without new input
    pub fn can_resume(&self) -> bool {
        self.state == TurnState::RequestingCompletion
    }

    /// Message count
    pub fn message_count(&self) -> usize {
        self.conversation.len()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// A stored session. Holding the lock for a whole turn serializes turns
/// on the same conversation.
pub type SharedSession = Arc<Mutex<Session>>;

/// Session store trait. Storage is in-process only; sessions do not
/// survive a restart.
pub trait SessionStore: Send + Sync {
    /// Store a session and return its shared handle
    fn insert(&self, session: Session) -> Result<SharedSession>;

    /// Look up a session by ID
    fn get(&self, id: &SessionId) -> Result<Option<SharedSession>>;

    /// Delete a session, reporting whether it existed
    fn delete(&self, id: &SessionId) -> Result<bool>;
}

/// In-memory session store
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<SessionId, SharedSession>>,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }
}

fn poisoned<T>(_: T) -> AgentError {
    AgentError::Session("session store lock poisoned".into())
}

impl SessionStore for MemorySessionStore {
    fn insert(&self, session: Session) -> Result<SharedSession> {
        let id = session.id.clone();
        let shared = Arc::new(Mutex::new(session));
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        sessions.insert(id, shared.clone());
        Ok(shared)
    }

    fn get(&self, id: &SessionId) -> Result<Option<SharedSession>> {
        let sessions = self.sessions.read().map_err(poisoned)?;
        Ok(sessions.get(id).cloned())
    }

    fn delete(&self, id: &SessionId) -> Result<bool> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        Ok(sessions.remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[test]
    fn test_session_creation() {
        let session = Session::new();
        assert_eq!(session.state, TurnState::AwaitingUserInput);
        assert_eq!(session.message_count(), 0);
        assert!(session.metadata.title.is_none());
        assert!(!session.can_resume());
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemorySessionStore::new();
        let session = Session::new();
        let id = session.id.clone();

        store.insert(session).unwrap();

        let loaded = store.get(&id).unwrap().unwrap();
        assert_eq!(loaded.lock().await.id, id);

        assert!(store.delete(&id).unwrap());
        assert!(!store.delete(&id).unwrap());
        assert!(store.get(&id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stored_session_is_updated_in_place() {
        let store = MemorySessionStore::new();
        let shared = store.insert(Session::with_system_prompt("system")).unwrap();
        let id = shared.lock().await.id.clone();

        shared
            .lock()
            .await
            .conversation
            .append(Message::user("Where is the quarterly report?"))
            .unwrap();

        let again = store.get(&id).unwrap().unwrap();
        assert!(Arc::ptr_eq(&shared, &again));
        assert_eq!(again.lock().await.message_count(), 2);
    }

    #[tokio::test]
    async fn test_turn_holder_blocks_second_writer() {
        let store = MemorySessionStore::new();
        let shared = store.insert(Session::new()).unwrap();

        let guard = shared.lock().await;
        assert!(shared.try_lock().is_err());
        drop(guard);
        assert!(shared.try_lock().is_ok());
    }
}
