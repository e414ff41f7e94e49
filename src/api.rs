//! HTTP front door for the conversation orchestrator
//!
//! `POST /chat` streams a turn's fragments back as plain text.

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::agent::Orchestrator;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatRequest {
    pub input: String,
    pub session_id: String,
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Chat Endpoint
/// =============================

fn bad_request(reason: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        reason.to_string(),
    )
        .into_response()
}

async fn chat_handler(State(state): State<ApiState>, Json(req): Json<ChatRequest>) -> Response {
    let session_id = req.session_id.trim();
    if session_id.is_empty() {
        return bad_request("session_id is required");
    }
    if req.input.trim().is_empty() {
        return bad_request("input is required");
    }

    info!(session_id, "Chat request received");

    let fragments = state
        .orchestrator
        .submit_turn(session_id, &req.input)
        .map(Ok::<_, Infallible>);

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(fragments),
    )
        .into_response()
}

/// =============================
/// Router
/// =============================

pub fn create_router(orchestrator: Arc<Orchestrator>) -> Router {
    let state = ApiState { orchestrator };

    Router::new()
        .route("/health", get(health))
        .route("/chat", post(chat_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server<F>(
    orchestrator: Arc<Orchestrator>,
    port: u16,
    shutdown: F,
) -> std::result::Result<(), Box<dyn std::error::Error>>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(orchestrator);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{CheckpointStore, InMemoryCheckpointStore};
    use crate::config::TurnConfig;
    use crate::llm::{ScriptedModel, ScriptedReply};
    use crate::tools::ToolRegistry;
    use axum::http::Request;
    use tower::ServiceExt;

    fn app(replies: Vec<ScriptedReply>) -> (Router, Arc<InMemoryCheckpointStore>) {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::new(ScriptedModel::new(replies)),
            Arc::new(ToolRegistry::new()),
            store.clone(),
            TurnConfig::default(),
        ));
        (create_router(orchestrator), store)
    }

    fn chat(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/chat")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (router, _) = app(Vec::new());
        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_chat_streams_plain_text() {
        let (router, store) = app(vec![ScriptedReply::text(&["Hi ", "there!"])]);

        let response = router
            .oneshot(chat(serde_json::json!({"input": "hello", "session_id": "u1"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/plain"));

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"Hi there!");

        let checkpoint = store
            .load("u1", &TurnConfig::default().namespace)
            .await
            .unwrap();
        assert_eq!(checkpoint.state.len(), 2);
    }

    #[tokio::test]
    async fn test_chat_rejects_blank_fields() {
        let (router, _) = app(Vec::new());

        let response = router
            .clone()
            .oneshot(chat(serde_json::json!({"input": "hello", "session_id": "  "})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = router
            .oneshot(chat(serde_json::json!({"input": "", "session_id": "u1"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"input is required");
    }

    #[tokio::test]
    async fn test_model_error_reaches_body_as_text() {
        let (router, _) = app(vec![ScriptedReply::failure("rate limited")]);

        let response = router
            .oneshot(chat(serde_json::json!({"input": "hello", "session_id": "u1"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(
            String::from_utf8(body.to_vec()).unwrap(),
            "Error during streaming: Model error: rate limited"
        );
    }
}
