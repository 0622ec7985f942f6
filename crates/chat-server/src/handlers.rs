//! HTTP/WebSocket Handlers

use axum::{
    Json,
    extract::{Path, State, WebSocketUpgrade, ws::{Message, WebSocket}},
    http::StatusCode,
    response::Response,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};

use chat_core::{AgentError, Session, SessionId, SessionStore, SharedSession, ToolSchema};

use crate::state::AppState;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub provider: String,
    pub provider_connected: bool,
    pub tools: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub message: String,
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct StreamRequest {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error(status: StatusCode, code: &str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
            code: code.into(),
        }),
    )
}

fn agent_error(err: &AgentError) -> ApiError {
    let (status, code) = match err {
        AgentError::TransientUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "UPSTREAM_UNAVAILABLE"),
        AgentError::MalformedResponse(_) | AgentError::Provider(_) | AgentError::Auth(_) => {
            (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR")
        }
        AgentError::MaxIterations(_) => (StatusCode::UNPROCESSABLE_ENTITY, "TOO_MANY_ROUNDS"),
        AgentError::Session(_) => (StatusCode::CONFLICT, "SESSION_STATE"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "AGENT_ERROR"),
    };
    error(status, code, err.user_message())
}

fn load_session(state: &AppState, id: &str) -> Result<SharedSession, ApiError> {
    state
        .sessions
        .get(&SessionId::from_string(id))
        .map_err(|e| agent_error(&e))?
        .ok_or_else(|| error(StatusCode::NOT_FOUND, "SESSION_NOT_FOUND", format!("No session {id}")))
}

/// The session was updated in place, so a failed turn is already stored
/// in its resumable state
fn turn_response(session: &Session, outcome: chat_core::Result<String>) -> Result<Json<ChatResponse>, ApiError> {
    let message = outcome.map_err(|e| {
        tracing::error!(session = %session.id, error = %e, "Agent turn failed");
        agent_error(&e)
    })?;

    Ok(Json(ChatResponse {
        message,
        session_id: session.id.to_string(),
    }))
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let provider = state.agent.provider();
    let provider_connected = provider.health_check().await.unwrap_or(false);

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        provider: provider.info().name,
        provider_connected,
        tools: state.agent.tools().names().into_iter().map(String::from).collect(),
    })
}

/// Tool manifest as advertised to the model
pub async fn list_tools(State(state): State<AppState>) -> Json<Vec<ToolSchema>> {
    Json(state.agent.tools().schema_manifest())
}

/// Main chat endpoint (non-streaming)
pub async fn chat_handler(
    State(state): State<AppState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if payload.message.trim().is_empty() {
        return Err(error(StatusCode::BAD_REQUEST, "EMPTY_MESSAGE", "Message must not be empty"));
    }

    let shared = match payload.session_id.as_deref() {
        Some(id) => load_session(&state, id)?,
        None => state
            .sessions
            .insert(state.agent.new_session())
            .map_err(|e| agent_error(&e))?,
    };

    // held for the whole turn; a second message on this session waits here
    let mut session = shared.lock().await;
    if session.metadata.title.is_none() {
        session.set_title(payload.message.chars().take(60).collect::<String>());
    }

    let outcome = state.agent.ask(&mut session, &payload.message).await;
    turn_response(&session, outcome)
}

/// Retry the interrupted turn of a session
pub async fn resume_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<ChatResponse>, ApiError> {
    let shared = load_session(&state, &session_id)?;
    let mut session = shared.lock().await;

    let outcome = state.agent.resume(&mut session).await;
    turn_response(&session, outcome)
}

/// Session history
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Session>, ApiError> {
    let shared = load_session(&state, &session_id)?;
    let session = shared.lock().await.clone();
    Ok(Json(session))
}

/// Forget a session
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let removed = state
        .sessions
        .delete(&SessionId::from_string(&session_id))
        .map_err(|e| agent_error(&e))?;

    if removed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(error(StatusCode::NOT_FOUND, "SESSION_NOT_FOUND", format!("No session {session_id}")))
    }
}

/// WebSocket streaming chat
pub async fn chat_stream_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_stream(socket, state))
}

async fn handle_stream(socket: WebSocket, state: AppState) {
    let (mut sender, receiver) = socket.split();

    match state.sessions.insert(state.agent.new_session()) {
        Ok(shared) => stream_session(sender, receiver, &state, shared).await,
        Err(e) => {
            tracing::error!(error = %e, "Failed to store streamed session");
            let _ = sender
                .send(frame(&serde_json::json!({"type": "error", "error": e.user_message()})))
                .await;
        }
    }
}

fn frame(value: &serde_json::Value) -> Message {
    Message::Text(value.to_string().into())
}

/// Serve one socket's session. Each text frame is a turn answered with
/// `chunk` frames and a closing `done` or `error` frame.
async fn stream_session<S, R>(mut sender: S, mut receiver: R, state: &AppState, shared: SharedSession)
where
    S: Sink<Message> + Unpin,
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let session_id = shared.lock().await.id.clone();
    tracing::debug!(session = %session_id, "WebSocket session opened");

    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::error!("WebSocket error: {}", e);
                break;
            }
            _ => continue,
        };

        let request: StreamRequest = match serde_json::from_str(msg.as_str()) {
            Ok(r) => r,
            Err(e) => {
                let _ = sender
                    .send(frame(&serde_json::json!({"type": "error", "error": e.to_string()})))
                    .await;
                continue;
            }
        };

        let mut session = shared.lock().await;
        let stream = state.agent.ask_stream(&mut session, request.message);
        futures::pin_mut!(stream);

        let mut failed = false;
        while let Some(result) = stream.next().await {
            match result {
                Ok(delta) => {
                    let chunk = serde_json::json!({"type": "chunk", "content": delta});
                    if sender.send(frame(&chunk)).await.is_err() {
                        // client went away; dropping the stream rolls the turn back
                        return;
                    }
                }
                Err(e) => {
                    tracing::error!(session = %session_id, error = %e, "Streamed turn failed");
                    let error = serde_json::json!({"type": "error", "error": e.user_message()});
                    let _ = sender.send(frame(&error)).await;
                    failed = true;
                    break;
                }
            }
        }

        if !failed {
            let done = serde_json::json!({"type": "done", "session_id": session_id.to_string()});
            if sender.send(frame(&done)).await.is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chat_core::SessionStore;

    use async_trait::async_trait;
    use axum::{
        Router,
        body::Body,
        extract::ws::Message as WsMessage,
        http::{Request, StatusCode},
    };
    use futures::{StreamExt, channel::mpsc};
    use chat_core::{
        AgentBuilder, CompletionChunk, CompletionOutcome, GenerationOptions, LlmProvider, Message,
        Result, ToolRegistry,
        provider::{CompletionStream, ProviderInfo},
    };
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::stream_session;
    use crate::state::AppState;

    /// Provider that always answers with a fixed text after `delay`
    #[derive(Default)]
    struct FixedProvider {
        delay: Duration,
    }

    #[async_trait]
    impl LlmProvider for FixedProvider {
        fn info(&self) -> ProviderInfo {
            ProviderInfo {
                name: "fixed".into(),
                endpoint: "memory".into(),
                supports_streaming: true,
                supports_tools: true,
            }
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }

        async fn complete(
            &self,
            _messages: &[Message],
            _tools: &[chat_core::ToolSchema],
            _options: &GenerationOptions,
        ) -> Result<CompletionOutcome> {
            tokio::time::sleep(self.delay).await;
            Ok(CompletionOutcome::FinalAnswer("hello".into()))
        }

        async fn complete_stream(
            &self,
            _messages: &[Message],
            _tools: &[chat_core::ToolSchema],
            _options: &GenerationOptions,
        ) -> Result<CompletionStream> {
            Ok(Box::pin(futures::stream::iter(vec![Ok(CompletionChunk::Text("hello".into()))])))
        }
    }

    fn state_with(provider: FixedProvider) -> AppState {
        let agent = AgentBuilder::new()
            .provider(Arc::new(provider))
            .tools(ToolRegistry::new())
            .build()
            .unwrap();
        AppState::new(agent)
    }

    fn app() -> Router {
        crate::router(state_with(FixedProvider::default()))
    }

    fn text(value: Value) -> std::result::Result<WsMessage, axum::Error> {
        Ok(WsMessage::Text(value.to_string().into()))
    }

    fn frames(messages: Vec<WsMessage>) -> Vec<Value> {
        messages
            .into_iter()
            .map(|m| match m {
                WsMessage::Text(t) => serde_json::from_str(t.as_str()).unwrap(),
                other => panic!("unexpected frame {other:?}"),
            })
            .collect()
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_health_reports_provider() {
        let app = app();
        let (status, json) = send(&app, "GET", "/health", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["provider"], "fixed");
        assert_eq!(json["provider_connected"], true);
    }

    #[tokio::test]
    async fn test_chat_continues_a_session() {
        let app = app();

        let (status, first) = send(&app, "POST", "/api/chat", Some(json!({"message": "hi"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["message"], "hello");
        let id = first["session_id"].as_str().unwrap().to_string();

        let (status, second) = send(
            &app,
            "POST",
            "/api/chat",
            Some(json!({"message": "again", "session_id": id})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["session_id"], id.as_str());

        let (status, session) = send(&app, "GET", &format!("/api/sessions/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        // system prompt + two user/assistant exchanges
        assert_eq!(session["conversation"]["messages"].as_array().unwrap().len(), 5);
        assert_eq!(session["state"], "awaiting_user_input");
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let app = app();

        let (status, json) = send(
            &app,
            "POST",
            "/api/chat",
            Some(json!({"message": "hi", "session_id": "nope"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["code"], "SESSION_NOT_FOUND");

        let (status, _) = send(&app, "DELETE", "/api/sessions/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_resume_needs_interrupted_turn() {
        let app = app();
        let (_, first) = send(&app, "POST", "/api/chat", Some(json!({"message": "hi"}))).await;
        let id = first["session_id"].as_str().unwrap();

        let (status, json) = send(&app, "POST", &format!("/api/chat/{id}/resume"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["code"], "SESSION_STATE");
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected() {
        let app = app();
        let (status, json) = send(&app, "POST", "/api/chat", Some(json!({"message": "  "}))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "EMPTY_MESSAGE");
    }

    #[tokio::test]
    async fn test_delete_session() {
        let app = app();
        let (_, first) = send(&app, "POST", "/api/chat", Some(json!({"message": "hi"}))).await;
        let id = first["session_id"].as_str().unwrap();

        let (status, _) = send(&app, "DELETE", &format!("/api/sessions/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = send(&app, "GET", &format!("/api/sessions/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_concurrent_messages_on_one_session_both_recorded() {
        let app = crate::router(state_with(FixedProvider {
            delay: Duration::from_millis(100),
        }));
        let (_, first) = send(&app, "POST", "/api/chat", Some(json!({"message": "hi"}))).await;
        let id = first["session_id"].as_str().unwrap().to_string();

        let (a, b) = tokio::join!(
            send(&app, "POST", "/api/chat", Some(json!({"message": "A", "session_id": id}))),
            send(&app, "POST", "/api/chat", Some(json!({"message": "B", "session_id": id}))),
        );
        assert_eq!(a.0, StatusCode::OK);
        assert_eq!(b.0, StatusCode::OK);

        let (_, session) = send(&app, "GET", &format!("/api/sessions/{id}"), None).await;
        let messages = session["conversation"]["messages"].as_array().unwrap();
        let roles: Vec<&str> = messages.iter().map(|m| m["role"].as_str().unwrap()).collect();
        assert_eq!(
            roles,
            vec!["system", "user", "assistant", "user", "assistant", "user", "assistant"]
        );

        let mut users: Vec<&str> = messages
            .iter()
            .filter(|m| m["role"] == "user")
            .map(|m| m["content"].as_str().unwrap())
            .collect();
        users.sort_unstable();
        assert_eq!(users, vec!["A", "B", "hi"]);
    }

    #[tokio::test]
    async fn test_stream_session_frames() {
        let state = state_with(FixedProvider::default());
        let shared = state.sessions.insert(state.agent.new_session()).unwrap();
        let (out_tx, out_rx) = mpsc::unbounded();
        let (in_tx, in_rx) = mpsc::unbounded();
        in_tx.unbounded_send(text(json!({"message": "hi"}))).unwrap();
        in_tx.unbounded_send(Ok(WsMessage::Text("not json".into()))).unwrap();
        in_tx.unbounded_send(text(json!({"message": "again"}))).unwrap();
        drop(in_tx);

        stream_session(out_tx, in_rx, &state, shared.clone()).await;
        let frames = frames(out_rx.collect().await);

        let kinds: Vec<&str> = frames.iter().map(|f| f["type"].as_str().unwrap()).collect();
        assert_eq!(kinds, vec!["chunk", "done", "error", "chunk", "done"]);
        assert_eq!(frames[0]["content"], "hello");
        assert_eq!(frames[4]["content"], Value::Null);

        let session = shared.lock().await;
        assert_eq!(frames[1]["session_id"], session.id.to_string());
        // system prompt + two streamed exchanges
        assert_eq!(session.message_count(), 5);
        assert_eq!(session.state, chat_core::TurnState::AwaitingUserInput);
    }

    #[tokio::test]
    async fn test_stream_session_client_gone_leaves_turn_resumable() {
        let state = state_with(FixedProvider::default());
        let shared = state.sessions.insert(state.agent.new_session()).unwrap();
        let (out_tx, out_rx) = mpsc::unbounded::<WsMessage>();
        let (in_tx, in_rx) = mpsc::unbounded();
        in_tx.unbounded_send(text(json!({"message": "hi"}))).unwrap();
        drop(in_tx);
        drop(out_rx);

        stream_session(out_tx, in_rx, &state, shared.clone()).await;

        // the user message is kept and the turn can be retried
        let id = shared.lock().await.id.to_string();
        let (status, session) = send(&crate::router(state), "GET", &format!("/api/sessions/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(session["conversation"]["messages"].as_array().unwrap().len(), 2);
        assert_eq!(session["state"], "requesting_completion");
    }
}
