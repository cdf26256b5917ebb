// ABOUTME: HTTP and WebSocket front end: chat API, session clear, Synology webhook, metrics
// ABOUTME: Every inbound surface funnels into EngineInvoker::send and returns its text

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use jarvis_core::EngineInvoker;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::channels::WebHub;

const MAX_MESSAGE_LENGTH: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub invoker: Arc<EngineInvoker>,
    pub hub: WebHub,
    pub metrics: Option<PrometheusHandle>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default = "default_session_id")]
    pub session_id: String,
}

fn default_session_id() -> String {
    "default".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub session_id: String,
}

/// Outgoing-webhook body posted by Synology Chat
#[derive(Debug, Deserialize)]
pub struct SynologyInbound {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub user_id: Option<serde_json::Value>,
}

impl SynologyInbound {
    /// Conversation key for the posting user
    pub fn session_id(&self) -> String {
        let user = match &self.user_id {
            Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => "synology".to_string(),
        };
        format!("synology-{}", user)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api/health", get(health))
        .route("/api/chat", post(chat))
        .route("/api/sessions/{session_id}/clear", post(clear_session))
        .route("/api/webhooks/synology", post(synology_webhook))
        .route("/ws/{session_id}", get(ws_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until `shutdown` resolves
pub async fn serve<F>(host: &str, port: u16, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed")?;
    Ok(())
}

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "Jarvis is running",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Inbound text the engine should never see: blank or over the size limit
fn reject_message(session_id: &str, message: &str) -> Option<(StatusCode, String)> {
    if message.trim().is_empty() {
        return Some((StatusCode::BAD_REQUEST, "Message cannot be empty".to_string()));
    }
    if message.len() > MAX_MESSAGE_LENGTH {
        tracing::warn!(session = %session_id, len = message.len(), "Inbound message exceeds size limit");
        return Some((
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("Message too large (max {} bytes)", MAX_MESSAGE_LENGTH),
        ));
    }
    None
}

async fn chat(State(state): State<AppState>, Json(req): Json<ChatRequest>) -> Response {
    if let Some((status, error)) = reject_message(&req.session_id, &req.message) {
        return (status, Json(serde_json::json!({ "error": error }))).into_response();
    }

    tracing::info!(session = %req.session_id, "Chat message received");
    let response = state.invoker.send(&req.session_id, &req.message).await;
    Json(ChatResponse {
        response,
        session_id: req.session_id,
    })
    .into_response()
}

async fn clear_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<serde_json::Value> {
    state.invoker.clear_session(&session_id);
    tracing::info!(session = %session_id, "Session cleared");
    Json(serde_json::json!({ "status": "cleared", "session_id": session_id }))
}

async fn synology_webhook(
    State(state): State<AppState>,
    Json(payload): Json<SynologyInbound>,
) -> Response {
    let session_id = payload.session_id();
    if let Some((status, error)) = reject_message(&session_id, &payload.text) {
        return (status, Json(serde_json::json!({ "text": error }))).into_response();
    }
    tracing::info!(session = %session_id, "Synology Chat message received");
    let response = state.invoker.send(&session_id, &payload.text).await;
    Json(serde_json::json!({ "text": response })).into_response()
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state, session_id))
}

async fn handle_ws(socket: WebSocket, state: AppState, session_id: String) {
    let (mut ws_sink, mut ws_stream) = socket.split::<Message>();
    let conn = state.hub.connect(&session_id);
    let conn_id = conn.id;
    let reply_tx = conn.sender.clone();
    let mut outbound = conn.receiver;

    // Writer: replies and broadcasts share one queue so frames never interleave
    let mut writer_task = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if ws_sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let invoker = Arc::clone(&state.invoker);
    let reader_session = session_id.clone();
    let mut reader_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_stream.next().await {
            match msg {
                Message::Text(text) => {
                    let reply = match reject_message(&reader_session, text.as_str()) {
                        Some((_, error)) => error,
                        None => invoker.send(&reader_session, text.as_str()).await,
                    };
                    if reply_tx.send(reply).is_err() {
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer_task => reader_task.abort(),
        _ = &mut reader_task => writer_task.abort(),
    }

    state.hub.disconnect(&session_id, conn_id);
}
