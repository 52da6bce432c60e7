//! HTTP handlers. JSON in, JSON out, except the message stream which is
//! served as Server-Sent Events.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use steer_agent::{Error, StreamChunk};

use crate::AppState;

fn error_json(status: StatusCode, message: impl ToString) -> Response {
    (status, Json(json!({ "error": message.to_string() }))).into_response()
}

// ── Sessions ────────────────────────────────────────────────────────────

pub async fn create_session(State(state): State<Arc<AppState>>) -> Response {
    let session = state.sessions.create().await;
    Json(json!({ "session": session.view().await })).into_response()
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.sessions.get(&id).await {
        Some(session) => Json(json!({ "session": session.view().await })).into_response(),
        None => error_json(StatusCode::NOT_FOUND, "session not found"),
    }
}

pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Response {
    let sessions = state.sessions.list().await;
    let mut views = Vec::with_capacity(sessions.len());
    for session in &sessions {
        views.push(session.view().await);
    }
    Json(json!({ "sessions": views, "count": views.len() })).into_response()
}

pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.sessions.delete(&id).await {
        Ok(()) => Json(json!({ "message": "session deleted" })).into_response(),
        Err(e) => error_json(StatusCode::NOT_FOUND, e),
    }
}

// ── Message stream ──────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub message: String,
    pub llm_config_id: Option<String>,
}

pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Response {
    let Some(session) = state.sessions.get(&id).await else {
        return error_json(StatusCode::NOT_FOUND, "session not found");
    };
    if req.message.trim().is_empty() {
        return error_json(StatusCode::BAD_REQUEST, "message must not be empty");
    }

    // Resolve the one-shot override before anything streams, so a bad
    // config id is a clean 400 instead of a broken stream.
    let override_config = match req.llm_config_id.as_deref() {
        Some(config_id) if !config_id.is_empty() => {
            match state.registry.store().get(config_id) {
                Some(config) => Some(config),
                None => return error_json(StatusCode::BAD_REQUEST, "llm config not found"),
            }
        }
        _ => None,
    };

    match state
        .orchestrator
        .send_message(session, req.message, override_config)
        .await
    {
        Ok((rx, cancel)) => sse_response(rx, cancel),
        Err(e @ Error::SessionBusy(_)) => error_json(StatusCode::CONFLICT, e),
        Err(e @ Error::MessageEmpty) => error_json(StatusCode::BAD_REQUEST, e),
        Err(e) => error_json(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

/// Cancels the worker when the response body is dropped before the stream
/// finished, i.e. the client went away.
struct StreamGuard {
    cancel: CancellationToken,
    finished: bool,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if !self.finished {
            info!("Client disconnected, stopping stream");
            self.cancel.cancel();
        }
    }
}

/// Frame chunks as `data: <json>\n\n`. Each frame is flushed as its own
/// body chunk; chunked transfer encoding comes from the streaming body.
fn sse_response(rx: mpsc::Receiver<StreamChunk>, cancel: CancellationToken) -> Response {
    let guard = StreamGuard {
        cancel,
        finished: false,
    };

    let stream = futures_util::stream::unfold((rx, guard), |(mut rx, mut guard)| async move {
        match rx.recv().await {
            Some(chunk) => {
                let payload = serde_json::to_string(&chunk).unwrap_or_else(|_| "{}".to_string());
                let frame = Bytes::from(format!("data: {payload}\n\n"));
                Some((Ok::<_, Infallible>(frame), (rx, guard)))
            }
            None => {
                guard.finished = true;
                None
            }
        }
    });

    match Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("X-Accel-Buffering", "no")
        .body(Body::from_stream(stream))
    {
        Ok(response) => response,
        Err(e) => error_json(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

// ── LLM configuration ───────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct SetLlmConfigRequest {
    #[serde(default)]
    pub config_id: String,
}

pub async fn set_llm_config(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetLlmConfigRequest>,
) -> Response {
    match state.registry.set_config(&req.config_id).await {
        Ok(config) => Json(json!({
            "message": "llm config set",
            "config": steer_agent::llm::registry::provider_info(&config),
        }))
        .into_response(),
        Err(e @ Error::ConfigIdEmpty) => error_json(StatusCode::BAD_REQUEST, e),
        Err(e @ Error::ConfigNotFound(_)) => error_json(StatusCode::NOT_FOUND, e),
        Err(e) => error_json(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

pub async fn reload_llm(State(state): State<Arc<AppState>>) -> Response {
    match state.registry.reload().await {
        Ok(()) => Json(json!({ "message": "llm config reloaded" })).into_response(),
        Err(e) => error_json(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

// ── Status ──────────────────────────────────────────────────────────────

pub async fn mcp_status(State(state): State<Arc<AppState>>) -> Json<Value> {
    let tool_names = state.orchestrator.tools().tool_names();
    Json(json!({
        "status": {
            "tools": tool_names.len(),
            "tool_names": tool_names,
            "browser_ready": state.executor.is_ready(),
            "llm": state.registry.current_info().await,
        }
    }))
}
