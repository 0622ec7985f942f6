//! file-chat HTTP Server
//!
//! Axum-based server exposing the tool-calling chat agent over REST and
//! WebSocket. The agent can read and search the documents in `FILES_DIR`.

mod handlers;
mod state;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use chat_core::{AgentBuilder, AgentConfig, LlmProvider, ToolRegistry};
use chat_runtime::OpenAiProvider;
use chat_tools::{
    DocumentDirectory, FileToolsConfig, KernelMemoryConfig, KernelMemoryIndex, LocalDirectory,
    MemoryIndex, SearchIndex,
};

use crate::handlers::{
    chat_handler, chat_stream_handler, delete_session, get_session, health_check, list_tools,
    resume_handler,
};
use crate::state::AppState;

/// Build the HTTP router
pub fn router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health & info
        .route("/health", get(health_check))
        .route("/api/tools", get(list_tools))
        // Agent API
        .route("/api/chat", post(chat_handler))
        .route("/api/chat/stream", get(chat_stream_handler))
        .route("/api/chat/{session_id}/resume", post(resume_handler))
        .route("/api/sessions/{session_id}", get(get_session).delete(delete_session))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Log filter from `RUST_LOG`, or info with request tracing
fn env_filter(directives: Option<String>) -> EnvFilter {
    EnvFilter::new(directives.unwrap_or_else(|| "info,tower_http=debug".into()))
}

/// Search index for `SearchFiles`: the Kernel Memory service when configured,
/// otherwise an in-memory index over the files directory
async fn build_index(directory: &dyn DocumentDirectory) -> anyhow::Result<Arc<dyn SearchIndex>> {
    if let Some(config) = KernelMemoryConfig::from_env() {
        tracing::info!(url = %config.base_url, "Using Kernel Memory search index");
        return Ok(Arc::new(KernelMemoryIndex::new(config)?));
    }

    match MemoryIndex::from_directory(directory).await {
        Ok(index) => Ok(Arc::new(index)),
        Err(e) => {
            tracing::warn!(error = %e, "Files directory not indexed; search will find nothing");
            Ok(Arc::new(MemoryIndex::new()))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment first so a RUST_LOG in .env reaches the filter
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(env_filter(std::env::var("RUST_LOG").ok()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Initialize completion provider
    let provider = Arc::new(OpenAiProvider::from_env()?);
    let info = provider.info();
    match provider.health_check().await {
        Ok(true) => tracing::info!(endpoint = %info.endpoint, "Connected to {}", info.name),
        Ok(false) | Err(_) => {
            tracing::warn!(endpoint = %info.endpoint, "{} not reachable - chats will fail", info.name);
            tracing::warn!("  Check OPENAI_BASE_URL and OPENAI_API_KEY");
        }
    }

    // Initialize tools
    let files = FileToolsConfig::from_env()?;
    tracing::info!(root = %files.root.display(), max_bytes = files.max_file_bytes, "Files directory");
    let directory: Arc<dyn DocumentDirectory> = Arc::new(LocalDirectory::new(files));
    let index = build_index(directory.as_ref()).await?;

    let mut tools = ToolRegistry::new();
    chat_tools::register_file_tools(&mut tools, directory, index)?;

    tracing::info!("Registered {} tools:", tools.len());
    for name in tools.names() {
        tracing::info!("  • {}", name);
    }

    let config = AgentConfig::from_env()?;
    tracing::info!(model = %config.generation.model, max_rounds = config.max_rounds, "Agent configured");

    let agent = AgentBuilder::new()
        .provider(provider)
        .tools(tools)
        .config(config)
        .build()?;

    let app = router(AppState::new(agent));

    // Start server
    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("file-chat server running on http://{}", addr);
    tracing::info!("Endpoints:");
    tracing::info!("  GET    /health                 - Health check");
    tracing::info!("  GET    /api/tools              - Tool manifest");
    tracing::info!("  POST   /api/chat               - Send message");
    tracing::info!("  POST   /api/chat/{{id}}/resume   - Retry an interrupted turn");
    tracing::info!("  GET    /api/sessions/{{id}}      - Session history");
    tracing::info!("  DELETE /api/sessions/{{id}}      - Forget a session");
    tracing::info!("  GET    /api/chat/stream        - WebSocket streaming");

    axum::serve(listener, app).await?;

    Ok(())
}
