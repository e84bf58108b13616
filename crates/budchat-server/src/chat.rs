// Chat endpoint
//
// POST /v1/chat runs one conversation turn and streams notification frames
// back as newline-delimited JSON. The orchestrator runs in a spawned task
// writing into a channel sink; dropping the response stream cancels the
// turn on the next frame.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use budchat_core::memory::{ChannelSink, InMemoryEventStore};
use budchat_core::{ChatOrchestrator, ChatRequest, ToolDefinition};
use futures::StreamExt;
use serde::Deserialize;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::warn;
use uuid::Uuid;

use crate::tools_http::HttpToolBackend;

pub type Orchestrator = ChatOrchestrator<InMemoryEventStore, HttpToolBackend>;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/chat", post(chat))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct ChatRequestBody {
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
    #[serde(default)]
    pub message: Option<String>,
    pub model: String,
    #[serde(default)]
    pub workspace_id: Option<Uuid>,
    #[serde(default)]
    pub persona_id: Option<Uuid>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

async fn chat(State(state): State<AppState>, Json(body): Json<ChatRequestBody>) -> Response {
    let request = ChatRequest {
        conversation_id: body.conversation_id,
        message: body.message,
        history: Vec::new(),
        workspace_id: body.workspace_id.unwrap_or_else(Uuid::now_v7),
        persona_id: body.persona_id,
        model: body.model,
        system_prompt: body.system_prompt,
        tools: body.tools,
    };

    let (sink, rx) = ChannelSink::new();
    let orchestrator = Arc::clone(&state.orchestrator);
    tokio::spawn(async move {
        // terminal error frames were already sent by run(); this is just
        // the server-side record
        if let Err(error) = orchestrator.run(request, &sink).await {
            warn!(%error, "chat turn failed");
        }
    });

    let frames = UnboundedReceiverStream::new(rx)
        .map(|frame| Ok::<_, Infallible>(frame.to_ndjson()));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(frames))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use budchat_core::memory::ScriptedTransport;
    use budchat_core::{Notification, ResponseMetadata, StreamEvent, TransportProfile};
    use http_body_util::BodyExt;
    use serde_json::json;
    use tower::ServiceExt;

    async fn test_app() -> (Router, Arc<InMemoryEventStore>) {
        let store = Arc::new(InMemoryEventStore::new());
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push_script(vec![
                StreamEvent::Token("4".into()),
                StreamEvent::StreamEnd(ResponseMetadata::complete(0, Some("gpt-4o-mini".into()))),
            ])
            .await;
        let orchestrator = ChatOrchestrator::new(store.clone(), Arc::new(HttpToolBackend::disabled()))
            .register_transport(TransportProfile::Completions, transport);
        (routes(AppState::new(Arc::new(orchestrator))), store)
    }

    #[tokio::test]
    async fn chat_streams_ndjson_frames() {
        let (app, store) = test_app().await;

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/v1/chat")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({"model": "gpt-4o-mini", "message": "What is 2+2?"}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/x-ndjson"
        );

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let frames: Vec<Notification> = String::from_utf8(body.to_vec())
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert!(matches!(
            frames.first(),
            Some(Notification::ConversationCreated { .. })
        ));
        assert_eq!(
            frames.last(),
            Some(&Notification::Complete {
                content: "4".into()
            })
        );
        assert_eq!(store.conversation_ids().await.len(), 1);
    }

    #[tokio::test]
    async fn unroutable_model_surfaces_an_error_frame() {
        let (app, _store) = test_app().await;

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/v1/chat")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({"model": "claude-sonnet-4-5", "message": "hi"}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        let last: Notification = serde_json::from_str(text.lines().last().unwrap()).unwrap();
        assert!(matches!(last, Notification::Error { .. }));
    }
}
