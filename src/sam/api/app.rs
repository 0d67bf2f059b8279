//! API application factory.
//!
//! Wires the router to the middleware stack: request-ID outermost, then
//! CORS, then CSRF, then handlers. The chat endpoints run agents through
//! the shared [`AgentFactory`]; `/v1/chat/stream` bridges a run to
//! server-sent events via the streaming web adapter.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use futures_util::stream::Stream;
use log::{error, info};
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;

use super::cors::build_cors_layer;
use super::csrf::csrf_middleware;
use super::request_id::request_id_middleware;
use crate::circuit_breaker::all_circuit_breaker_stats;
use crate::context::RequestContext;
use crate::core::Core;
use crate::factory::AgentFactory;
use crate::web_session::{run_with_events, StreamConfig};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub core: Arc<Core>,
    pub factory: Arc<AgentFactory>,
}

/// Build the router with the full middleware stack applied.
pub fn create_app(state: AppState) -> Router {
    let router = Router::new()
        .route("/health", get(health))
        .route("/v1/sessions", get(list_sessions))
        .route("/v1/chat", post(chat))
        .route("/v1/chat/stream", post(chat_stream))
        .with_state(state)
        .layer(middleware::from_fn(csrf_middleware))
        .layer(build_cors_layer())
        .layer(middleware::from_fn(request_id_middleware));

    match std::env::var("SAM_API_ROOT_PATH").ok().filter(|p| !p.is_empty()) {
        Some(root) => Router::new().nest(&root, router),
        None => router,
    }
}

/// Bind and serve until the listener fails.
pub async fn serve(state: AppState) -> std::io::Result<()> {
    let host = std::env::var("SAM_API_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = std::env::var("SAM_API_PORT")
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(8000);

    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind(format!("{}:{}", host, port)).await?;
    info!("Starting SAM API on {}:{}", host, port);
    axum::serve(listener, app).await
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let cache_stats = state
        .core
        .cache()
        .stats()
        .await
        .map(|s| serde_json::to_value(s).unwrap_or(Value::Null))
        .unwrap_or(Value::Null);
    let breakers = all_circuit_breaker_stats().await;

    Json(json!({
        "status": "ok",
        "cache": cache_stats,
        "circuit_breakers": breakers,
    }))
}

#[derive(Deserialize)]
struct SessionsQuery {
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    20
}

async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<SessionsQuery>,
) -> Response {
    match state.core.memory().list_sessions(query.limit).await {
        Ok(sessions) => Json(json!({ "sessions": sessions })).into_response(),
        Err(e) => {
            error!("Failed to list sessions: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"detail": e.to_string()})),
            )
                .into_response()
        }
    }
}

#[derive(Deserialize)]
struct ChatRequest {
    prompt: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

impl ChatRequest {
    fn context(&self) -> RequestContext {
        let mut ctx = RequestContext::new(
            self.user_id.clone().unwrap_or_else(|| "default".to_string()),
        );
        ctx.session_id = self.session_id.clone();
        ctx
    }

    fn session_id(&self) -> String {
        self.session_id.clone().unwrap_or_else(|| "default".to_string())
    }
}

async fn chat(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> Response {
    let ctx = request.context();
    let session_id = request.session_id();

    let agent = match state.factory.get_agent(&ctx).await {
        Ok(agent) => agent,
        Err(e) => {
            error!("Failed to build agent: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"detail": e.to_string()})),
            )
                .into_response();
        }
    };

    match agent.run(&request.prompt, &session_id, &ctx, true).await {
        Ok(content) => Json(json!({
            "content": content,
            "session_id": session_id,
        }))
        .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"detail": e.to_string()})),
        )
            .into_response(),
    }
}

async fn chat_stream(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Response {
    let ctx = request.context();
    let session_id = request.session_id();

    let agent = match state.factory.get_agent(&ctx).await {
        Ok(agent) => agent,
        Err(e) => {
            error!("Failed to build agent: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"detail": e.to_string()})),
            )
                .into_response();
        }
    };

    let stream = run_with_events(
        agent,
        request.prompt,
        session_id,
        ctx,
        StreamConfig::default(),
    )
    .await;
    let (events, _task) = stream.into_parts();

    let sse_stream = sse_events(events);
    Sse::new(sse_stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn sse_events(
    events: tokio_stream::wrappers::ReceiverStream<crate::web_session::RunEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    use futures_util::StreamExt;
    events.map(|run_event| {
        let event = Event::default()
            .event(run_event.event)
            .data(run_event.payload.to_string());
        Ok(event)
    })
}
