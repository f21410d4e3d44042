use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderValue;
use axum::response::Response;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use bytes::Bytes;
use futures::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use crate::agents::{SessionAccumulator, StreamEncoder};
use crate::error::*;
use crate::models::*;
use crate::storage::{AppState, SessionMessage};
use crate::types::SessionId;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

fn require_prompt(request: &StreamRequest) -> Result<String> {
    request.prompt().map(str::to_string).ok_or_else(|| {
        let err = AppError::bad_request("prompt required");
        log_error(&err);
        err
    })
}

fn error_note(message: &str) -> String {
    format!("\n\n❌ Error: {}", message)
}

fn text_response(body: Body) -> Result<Response> {
    Response::builder()
        .header(CONTENT_TYPE, TEXT_CONTENT_TYPE)
        .body(body)
        .map_err(|e| AppError::internal(format!("Response build failed: {}", e)))
}

// ============================================================================
// MULTI-AGENT STREAM HANDLER
// ============================================================================

/// Handler for multi-agent streaming
///
/// POST /api/multi-agent-stream
/// Body: StreamRequest JSON
///
/// Returns: line-delimited JSON records, one StreamEvent per line. The turn
/// is stored in the session once `complete` or `error` has been produced.
pub async fn multi_agent_stream_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StreamRequest>,
) -> Result<Response> {
    let prompt = require_prompt(&request)?;
    let session = request.session();

    state
        .sessions
        .append(&session, SessionMessage::user(prompt.clone(), true))
        .await;

    let (request_id, rx) = state.orchestrator.handle_request_stream(prompt).await;
    log::info!("📨 Session {} started request {}", session, request_id);

    let sessions = state.sessions.clone();
    let stream = async_stream::stream! {
        let encoder = StreamEncoder::new();
        let mut accumulator = SessionAccumulator::new();
        let mut events = ReceiverStream::new(rx);

        while let Some(event) = events.next().await {
            let record = encoder.encode_or_error(&event);
            accumulator.ingest_bytes(&record);

            if event.is_terminal() {
                if accumulator.skipped() > 0 {
                    log::warn!("Session {} skipped {} records", session, accumulator.skipped());
                }
                if let Some(turn) = accumulator.finish() {
                    sessions.append(&session, SessionMessage::multi_agent(turn)).await;
                }
                yield Ok::<Bytes, Infallible>(record);
                break;
            }

            yield Ok(record);
        }
    };

    let mut response = text_response(Body::from_stream(stream))?;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    Ok(response)
}

// ============================================================================
// CANCEL HANDLER
// ============================================================================

/// Handler for cancelling an active multi-agent request
///
/// DELETE /api/multi-agent-stream/{request_id}
pub async fn cancel_stream_handler(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> Result<Json<CancelResponse>> {
    if state.orchestrator.cancel_request(&request_id).await {
        Ok(Json(CancelResponse {
            success: true,
            request_id: request_id.clone(),
            message: format!("Request {} cancelled successfully", request_id),
        }))
    } else {
        Err(AppError::not_found(format!("Request {}", request_id)))
    }
}

// ============================================================================
// SINGLE-AGENT STREAM HANDLER
// ============================================================================

/// POST /api/stream
///
/// Streams plain text from the assistant. A failure is reported inline as an
/// error note, which is also kept in the stored reply.
pub async fn chat_stream_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StreamRequest>,
) -> Result<Response> {
    let prompt = require_prompt(&request)?;
    let session = request.session();

    state
        .sessions
        .append(&session, SessionMessage::user(prompt.clone(), false))
        .await;

    let chunks = state.orchestrator.chat_stream(&prompt);
    let sessions = state.sessions.clone();

    let stream = async_stream::stream! {
        let mut content = String::new();

        let failure = match chunks {
            Ok(mut chunks) => {
                let mut failure = None;
                while let Some(item) = chunks.next().await {
                    match item {
                        Ok(text) => {
                            content.push_str(&text);
                            yield Ok::<Bytes, Infallible>(Bytes::from(text));
                        }
                        Err(e) => {
                            failure = Some(e.to_string());
                            break;
                        }
                    }
                }
                failure
            }
            Err(e) => Some(e.to_string()),
        };

        match failure {
            Some(message) => {
                log::error!("❌ Chat stream failed: {}", message);
                let note = error_note(&message);
                content.push_str(&note);
                sessions.append(&session, SessionMessage::assistant(content)).await;
                yield Ok(Bytes::from(note));
            }
            None => {
                sessions.append(&session, SessionMessage::assistant(content)).await;
            }
        }
    };

    text_response(Body::from_stream(stream))
}

// ============================================================================
// SESSION HANDLERS
// ============================================================================

/// GET /api/messages?session_id=
pub async fn get_messages_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionQuery>,
) -> Json<Vec<SessionMessage>> {
    let session = SessionId::from_optional(query.session_id);
    Json(state.sessions.get(&session).await)
}

/// POST /api/messages/clear
pub async fn clear_messages_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ClearRequest>,
) -> Json<StatusResponse> {
    let session = SessionId::from_optional(request.session_id);
    if state.sessions.clear(&session).await {
        log::info!("🧹 Cleared session {}", session);
    }
    Json(StatusResponse::ok())
}

// ============================================================================
// HEALTH
// ============================================================================

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthStatus> {
    let orchestrator = &state.orchestrator;
    Json(HealthStatus::new(ServiceHealth {
        model_backend: orchestrator.backend_name().map(str::to_string),
        configured: orchestrator.is_configured(),
        active_requests: orchestrator.active_requests().await,
    }))
}

// ============================================================================
// Tests
// ============================================================================
