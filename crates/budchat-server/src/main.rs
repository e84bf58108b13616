// Budchat server
// Decision: transports register from whichever API keys are present; a
//           request routed to an unregistered profile fails that request
//           with an error frame, never the whole process

mod chat;
mod tools_http;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, Method};
use axum::routing::get;
use axum::{Json, Router};
use budchat_core::memory::InMemoryEventStore;
use budchat_core::{ChatOrchestrator, TransportProfile};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::tools_http::HttpToolBackend;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    transports: Vec<String>,
    tools: bool,
}

#[derive(Clone)]
struct HealthState {
    transports: Vec<String>,
    tools: bool,
}

async fn health(
    axum::extract::State(state): axum::extract::State<HealthState>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        transports: state.transports.clone(),
        tools: state.tools,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "budchat_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("budchat-server starting...");

    let store = Arc::new(InMemoryEventStore::new());
    let tools = HttpToolBackend::from_env();
    let tools_enabled = tools.is_enabled();
    if tools_enabled {
        tracing::info!("Webhook tool backend configured");
    } else {
        tracing::warn!("TOOL_WEBHOOK_URL not set; tool calls will resolve as errors");
    }

    let mut orchestrator = ChatOrchestrator::new(store, Arc::new(tools));
    let mut transports = Vec::new();

    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        orchestrator = orchestrator
            .register_transport(
                TransportProfile::Completions,
                Arc::new(budchat_openai::CompletionsTransport::new(key.clone())),
            )
            .register_transport(
                TransportProfile::Responses,
                Arc::new(budchat_openai::ResponsesTransport::new(key)),
            );
        transports.push("completions".to_string());
        transports.push("responses".to_string());
        tracing::info!("OpenAI transports registered");
    }
    if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
        orchestrator = orchestrator.register_transport(
            TransportProfile::AnthropicMessages,
            Arc::new(budchat_anthropic::MessagesTransport::new(key)),
        );
        transports.push("anthropic_messages".to_string());
        tracing::info!("Anthropic transport registered");
    }
    if transports.is_empty() {
        tracing::warn!("No provider API keys set; every chat request will fail");
    }

    let chat_state = chat::AppState::new(Arc::new(orchestrator));
    let health_state = HealthState {
        transports,
        tools: tools_enabled,
    };

    // CORS only when the UI is served from another origin
    let cors_origins: Vec<HeaderValue> = std::env::var("CORS_ALLOWED_ORIGINS")
        .ok()
        .filter(|s| !s.is_empty())
        .map(|s| s.split(',').filter_map(|s| s.trim().parse().ok()).collect())
        .unwrap_or_default();

    let mut app = Router::new()
        .route("/health", get(health).with_state(health_state))
        .merge(chat::routes(chat_state));

    if !cors_origins.is_empty() {
        tracing::info!(origins = ?cors_origins, "CORS origins configured");
        app = app.layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(cors_origins))
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::CACHE_CONTROL]),
        );
    }

    let app = app.layer(TraceLayer::new_for_http());

    let addr = std::env::var("BUDCHAT_BIND").unwrap_or_else(|_| "0.0.0.0:9000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
