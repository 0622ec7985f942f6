//! Reasoning Loop
//!
//! Drives one session through the tool-calling state machine:
//!
//! ```text
//! AwaitingUserInput -> RequestingCompletion -> Answering ----------> AwaitingUserInput
//!                           ^        |
//!                           |        v
//!                           +--- DispatchingTools
//! ```
//!
//! Each completion request replays the whole conversation. Tool calls of one
//! batch run sequentially and their results are appended in request order.
//! Dropping a turn future part-way leaves the session resumable: a partially
//! recorded tool batch is rolled back and the user message is kept.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};

use crate::error::{AgentError, Result};
use crate::message::{Conversation, Message};
use crate::provider::{CompletionChunk, CompletionOutcome, GenerationOptions, LlmProvider};
use crate::session::{Session, TurnState};
use crate::tool::{Tool, ToolCall, ToolRegistry, ToolResult};

/// Retry policy for transient completion failures
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Delay before the first retry, doubled on each further attempt
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

/// Agent configuration
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// System prompt placed first in new sessions
    pub system_prompt: Option<String>,

    /// Maximum completion/tool rounds per turn
    pub max_rounds: usize,

    /// Generation options
    pub generation: GenerationOptions,

    /// Retry policy for transient provider failures
    pub retry: RetryPolicy,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: Some(DEFAULT_SYSTEM_PROMPT.into()),
            max_rounds: 10,
            generation: GenerationOptions::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl AgentConfig {
    /// Read `CHAT_MAX_ROUNDS`, `CHAT_SYSTEM_PROMPT` and `CHAT_MODEL`
    pub fn from_env() -> Result<Self> {
        let mut config = Self {
            generation: GenerationOptions::from_env(),
            ..Default::default()
        };

        if let Ok(rounds) = std::env::var("CHAT_MAX_ROUNDS") {
            config.max_rounds = rounds
                .parse()
                .map_err(|_| AgentError::Config(format!("CHAT_MAX_ROUNDS is not a number: {rounds}")))?;
        }
        if let Ok(prompt) = std::env::var("CHAT_SYSTEM_PROMPT") {
            config.system_prompt = (!prompt.trim().is_empty()).then_some(prompt);
        }

        Ok(config)
    }
}

pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a helpful assistant that answers questions about the user's files.

Use the available tools before answering questions about file contents:
- GetFileContent finds a file by (part of) its name.
- GetFileContentByPartOfIt finds a file containing a phrase.
- SearchFiles runs a semantic search over the indexed documents.

If a tool reports that nothing was found, say so instead of guessing.
Be concise and accurate."#;

/// The main Agent struct
///
/// An agent holds the shared, read-only parts of a conversation (provider,
/// tools, configuration). Per-conversation state lives in [`Session`], so one
/// agent can serve any number of sessions.
pub struct Agent {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    config: AgentConfig,
}

impl Agent {
    /// Create a new agent
    pub fn new(provider: Arc<dyn LlmProvider>, tools: Arc<ToolRegistry>, config: AgentConfig) -> Self {
        Self {
            provider,
            tools,
            config,
        }
    }

    /// Start a session seeded with the configured system prompt
    pub fn new_session(&self) -> Session {
        let mut session = match &self.config.system_prompt {
            Some(prompt) => Session::with_system_prompt(prompt.clone()),
            None => Session::new(),
        };
        session.metadata.model = Some(self.config.generation.model.clone());
        session
    }

    /// Send user text and run tool rounds until the model answers
    pub async fn ask(&self, session: &mut Session, text: &str) -> Result<String> {
        let mut turn = Turn::begin(session);
        turn.append(Message::user(text))?;
        turn.commit(TurnState::RequestingCompletion);

        self.run_rounds(&mut turn).await
    }

    /// Retry an interrupted turn without adding new user text
    pub async fn resume(&self, session: &mut Session) -> Result<String> {
        if !session.can_resume() {
            return Err(AgentError::Session("no interrupted turn to resume".into()));
        }

        let mut turn = Turn::begin(session);
        self.run_rounds(&mut turn).await
    }

    /// Streaming variant of [`Agent::ask`].
    ///
    /// Tool rounds resolve fully before anything is yielded; the stream then
    /// yields the final answer as it arrives. The answer is recorded in the
    /// conversation once the provider finishes.
    pub fn ask_stream<'a>(
        &'a self,
        session: &'a mut Session,
        text: impl Into<String>,
    ) -> impl Stream<Item = Result<String>> + Send + 'a {
        let text = text.into();

        async_stream::try_stream! {
            let mut turn = Turn::begin(session);
            turn.append(Message::user(text))?;
            turn.commit(TurnState::RequestingCompletion);

            let manifest = self.tools.schema_manifest();
            let mut answered = false;

            for round in 1..=self.config.max_rounds {
                Self::start_round(&mut turn, round, true);

                let provider = &self.provider;
                let options = &self.config.generation;
                let messages = turn.conversation().snapshot();
                let tools = manifest.as_slice();
                let mut chunks = self
                    .with_retry(move || provider.complete_stream(messages, tools, options))
                    .await?;

                let mut answer = String::new();
                let mut tool_round: Option<(String, Vec<ToolCall>)> = None;

                while let Some(chunk) = chunks.next().await {
                    let delta = match chunk? {
                        CompletionChunk::Text(delta) => delta,
                        CompletionChunk::ToolRequests { content, calls } if calls.is_empty() => content,
                        CompletionChunk::ToolRequests { content, calls } => {
                            if answer.is_empty() && tool_round.is_none() {
                                tool_round = Some((content, calls));
                            } else {
                                tracing::warn!("Ignoring tool requests mixed into a streamed answer");
                            }
                            continue;
                        }
                    };

                    if tool_round.is_some() {
                        tracing::warn!("Ignoring answer text streamed after tool requests");
                        continue;
                    }
                    if delta.is_empty() {
                        continue;
                    }
                    turn.set_state(TurnState::Answering);
                    answer.push_str(&delta);
                    yield delta;
                }

                match tool_round {
                    Some((content, calls)) => self.dispatch_tools(&mut turn, content, calls).await?,
                    None => {
                        Self::record_answer(&mut turn, answer)?;
                        answered = true;
                        break;
                    }
                }
            }

            if !answered {
                Err::<(), _>(self.round_limit_reached())?;
            }
        }
    }

    async fn run_rounds(&self, turn: &mut Turn<'_>) -> Result<String> {
        let manifest = self.tools.schema_manifest();

        for round in 1..=self.config.max_rounds {
            Self::start_round(turn, round, false);

            let provider = &self.provider;
            let options = &self.config.generation;
            let messages = turn.conversation().snapshot();
            let tools = manifest.as_slice();
            let outcome = self
                .with_retry(move || provider.complete(messages, tools, options))
                .await?;

            match outcome {
                CompletionOutcome::FinalAnswer(text) => {
                    return Self::record_answer(turn, text);
                }
                CompletionOutcome::ToolRequests { content, calls } if calls.is_empty() => {
                    return Self::record_answer(turn, content);
                }
                CompletionOutcome::ToolRequests { content, calls } => {
                    self.dispatch_tools(turn, content, calls).await?;
                }
            }
        }

        Err(self.round_limit_reached())
    }

    fn start_round(turn: &mut Turn<'_>, round: usize, streamed: bool) {
        turn.set_state(TurnState::RequestingCompletion);
        tracing::debug!(
            round,
            streamed,
            messages = turn.conversation().len(),
            est_tokens = turn.conversation().estimate_tokens(),
            "Requesting completion"
        );
    }

    fn round_limit_reached(&self) -> AgentError {
        tracing::warn!(max_rounds = self.config.max_rounds, "Tool round limit reached");
        AgentError::MaxIterations(self.config.max_rounds)
    }

    fn record_answer(turn: &mut Turn<'_>, text: String) -> Result<String> {
        turn.set_state(TurnState::Answering);
        turn.append(Message::assistant(text.clone()))?;
        turn.commit(TurnState::AwaitingUserInput);
        Ok(text)
    }

    /// Record the assistant's tool request, then run each call in order and
    /// record its result. The round is committed once every result is in.
    async fn dispatch_tools(&self, turn: &mut Turn<'_>, content: String, calls: Vec<ToolCall>) -> Result<()> {
        if let Some(call) = calls.iter().find(|c| c.id.is_empty()) {
            return Err(AgentError::MalformedResponse(format!(
                "tool call '{}' has no id",
                call.name
            )));
        }

        // Nothing is pending at a committed point, so a sequencing failure here
        // can only come from ids the model reused.
        turn.append(Message::assistant_tool_calls(content, calls.clone()))
            .map_err(|e| match e {
                AgentError::InvalidSequence(msg) => AgentError::MalformedResponse(msg),
                other => other,
            })?;
        turn.set_state(TurnState::DispatchingTools);

        for call in &calls {
            let result = self.execute_tool(call).await;
            turn.append(Message::tool(result.to_message_content(), call.id.clone()))?;
        }

        turn.commit(TurnState::RequestingCompletion);
        Ok(())
    }

    /// Execute a tool call. Failures become a failed result for the model.
    async fn execute_tool(&self, call: &ToolCall) -> ToolResult {
        tracing::debug!(tool = %call.name, id = %call.id, "Executing tool");

        match self.tools.execute(call).await {
            Ok(result) => {
                if !result.success {
                    tracing::debug!(tool = %call.name, "Tool reported failure");
                }
                result
            }
            Err(e) => {
                tracing::warn!(tool = %call.name, error = %e, "Tool call failed");
                ToolResult::failure(call.name.clone(), e.to_string())
            }
        }
    }

    async fn with_retry<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let policy = &self.config.retry;
        let mut backoff = policy.initial_backoff;
        let mut attempt = 0;

        loop {
            match op().await {
                Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                    attempt += 1;
                    tracing::warn!(attempt, error = %e, "Completion request failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                other => return other,
            }
        }
    }

    /// Get the tool registry
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Get the provider
    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }
}

/// Exclusive handle on a session for the duration of one turn.
///
/// Messages are appended through the turn and become durable at `commit`.
/// Dropping the turn discards anything appended after the last commit and
/// marks the session as resumable.
struct Turn<'s> {
    session: &'s mut Session,
    committed: usize,
}

impl<'s> Turn<'s> {
    fn begin(session: &'s mut Session) -> Self {
        let committed = session.conversation.len();
        Self { session, committed }
    }

    fn conversation(&self) -> &Conversation {
        &self.session.conversation
    }

    fn append(&mut self, message: Message) -> Result<()> {
        self.session
            .conversation
            .append(message)
            .inspect_err(|e| tracing::error!(session = %self.session.id, error = %e, "Rejected append"))
    }

    fn set_state(&mut self, state: TurnState) {
        self.session.state = state;
    }

    fn commit(&mut self, state: TurnState) {
        self.committed = self.session.conversation.len();
        self.session.state = state;
        self.session.touch();
    }
}

impl Drop for Turn<'_> {
    fn drop(&mut self) {
        let len = self.session.conversation.len();
        if len > self.committed {
            tracing::warn!(
                session = %self.session.id,
                discarded = len - self.committed,
                "Rolling back interrupted tool round"
            );
            self.session.conversation.rollback_to(self.committed);
        }
        if self.session.state != TurnState::AwaitingUserInput {
            self.session.state = TurnState::RequestingCompletion;
        }
    }
}

/// Builder for Agent configuration
pub struct AgentBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    tools: ToolRegistry,
    config: AgentConfig,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            tools: ToolRegistry::new(),
            config: AgentConfig::default(),
        }
    }

    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn tool<T: Tool + 'static>(mut self, tool: T) -> Result<Self> {
        self.tools.register(tool)?;
        Ok(self)
    }

    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.generation.model = model.into();
        self
    }

    pub fn temperature(mut self, temp: f32) -> Self {
        self.config.generation.temperature = Some(temp);
        self
    }

    pub fn max_rounds(mut self, max: usize) -> Self {
        self.config.max_rounds = max;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn build(self) -> Result<Agent> {
        let provider = self
            .provider
            .ok_or_else(|| AgentError::Config("Provider is required".into()))?;

        Ok(Agent::new(provider, Arc::new(self.tools), self.config))
    }
}
