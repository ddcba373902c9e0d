//! Ledgerchat HTTP API
//!
//! Axum-based HTTP server exposing the chat pipeline: upload, chat (SSE
//! token stream), history, stats, health.
//!
//! Architecture: each endpoint has a thin axum handler that delegates to a
//! directly-testable inner function, so the business logic is exercised
//! without axum dispatch machinery.
//!
//! Endpoints:
//! - GET  /health                — health check with DB status
//! - GET  /version               — server version info
//! - POST /chat                  — one chat turn, reply streamed as SSE
//! - POST /upload                — multipart document upload into a session
//! - GET  /history/{session_id}  — conversation messages, oldest first
//! - GET  /stats/{session_id}    — message counts for a session

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use ledgerchat_core::completion::{CompletionClient, CompletionError};
use ledgerchat_core::store::{ConversationStore, StoreError};
use ledgerchat_core::LedgerchatConfig;
use ledgerchat_ingest::ExtractError;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::chat::{stream_turn, ChatRequest};
use crate::upload;

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub store: ConversationStore,
    pub completions: CompletionClient,
    pub config: LedgerchatConfig,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    // multipart framing adds overhead on top of the configured file cap
    let body_limit = state.config.upload.max_bytes + 64 * 1024;

    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/chat", post(chat_handler))
        .route("/upload", post(upload_handler))
        .route("/history/:session_id", get(history_handler))
        .route("/stats/:session_id", get(stats_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: HttpState,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);
    let app = build_router(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Ledgerchat HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request / Response DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

/// Message as returned by the history endpoint — attachment bytes stay in
/// the database, only their presence is reported.
#[derive(Debug, Serialize)]
pub struct MessageView {
    pub id: i64,
    pub role: String,
    pub content: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub has_attachment: bool,
}

/// Standard HTTP error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: String,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            error: msg.into(),
            status: "error".to_string(),
        }
    }
}

// ============================================================================
// User-facing failure messages
// ============================================================================
//
// Every failure category maps to its own human-readable message. Raw error
// strings go to the log, never to the client.

pub fn extract_error_message(e: &ExtractError, filename: &str) -> String {
    match e {
        ExtractError::UnsupportedFormat(_) => format!(
            "\"{filename}\" is not a supported document type. Please upload a PDF or a text file."
        ),
        ExtractError::CorruptInput(_) => format!(
            "\"{filename}\" could not be read — the file appears to be corrupt or truncated."
        ),
        ExtractError::EmptyResult => format!(
            "No text could be extracted from \"{filename}\". If it is a scanned document, it has no text layer."
        ),
        ExtractError::NotImplemented(_) => format!(
            "Text extraction from images is not supported yet. Please upload \"{filename}\" as a PDF or text file."
        ),
    }
}

pub fn completion_error_message(e: &CompletionError) -> String {
    match e {
        CompletionError::Auth(_) => {
            "The assistant could not authenticate with the language model service. Please check the API key configuration.".to_string()
        }
        CompletionError::RateLimited => {
            "The assistant is handling too many requests right now. Please try again in a few moments.".to_string()
        }
        CompletionError::Upstream { .. } => {
            "The language model service is temporarily unavailable. Please try again later.".to_string()
        }
        CompletionError::InvalidResponse(_) => {
            "The assistant returned a reply that could not be processed. Please try again.".to_string()
        }
        CompletionError::Http(_) => {
            "The language model service could not be reached. Please try again later.".to_string()
        }
    }
}

pub fn store_error_message(e: &StoreError) -> String {
    match e {
        StoreError::UnknownConversation(_) => {
            "This conversation no longer exists. Please start a new session.".to_string()
        }
        StoreError::Unavailable(_) => {
            "The conversation store is temporarily unavailable. Please try again shortly.".to_string()
        }
        StoreError::Database(_) => {
            "Saving the conversation failed. Please try again.".to_string()
        }
    }
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner health check — queries DB and returns (status_code, json_body).
pub async fn health_inner(state: &HttpState) -> (StatusCode, serde_json::Value) {
    let pg_ver = match ledgerchat_core::db::health_check(state.store.pool()).await {
        Ok(v) => v,
        Err(e) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                serde_json::json!({
                    "status": "unhealthy",
                    "error": e.to_string(),
                }),
            );
        }
    };

    (
        StatusCode::OK,
        serde_json::json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "postgresql": pg_ver,
            "model": state.completions.model(),
        }),
    )
}

/// Inner version — returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "ledgerchat/1",
    })
}

/// Inner history — session lookup plus ordered messages.
pub async fn history_inner(
    state: &HttpState,
    session_id: &str,
    limit: Option<i64>,
) -> (StatusCode, serde_json::Value) {
    let conversation = match state.store.find_conversation(session_id).await {
        Ok(Some(c)) => c,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                serde_json::to_value(ErrorResponse::new("unknown session")).unwrap_or_default(),
            );
        }
        Err(e) => {
            tracing::error!(error = %e, session_id, "history lookup failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::to_value(ErrorResponse::new(store_error_message(&e)))
                    .unwrap_or_default(),
            );
        }
    };

    let messages = match state.store.load_history(conversation.id, limit).await {
        Ok(m) => m,
        Err(e) => {
            tracing::error!(error = %e, session_id, "history load failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::to_value(ErrorResponse::new(store_error_message(&e)))
                    .unwrap_or_default(),
            );
        }
    };

    let views: Vec<MessageView> = messages
        .into_iter()
        .map(|m| MessageView {
            id: m.id,
            role: m.role.as_str().to_string(),
            content: m.content,
            created_at: m.created_at,
            has_attachment: m.attachment.is_some(),
        })
        .collect();

    (
        StatusCode::OK,
        serde_json::json!({
            "session_id": session_id,
            "conversation_id": conversation.id,
            "count": views.len(),
            "messages": views,
        }),
    )
}

/// Inner stats — message counts for one session.
pub async fn stats_inner(state: &HttpState, session_id: &str) -> (StatusCode, serde_json::Value) {
    let conversation = match state.store.find_conversation(session_id).await {
        Ok(Some(c)) => c,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                serde_json::to_value(ErrorResponse::new("unknown session")).unwrap_or_default(),
            );
        }
        Err(e) => {
            tracing::error!(error = %e, session_id, "stats lookup failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::to_value(ErrorResponse::new(store_error_message(&e)))
                    .unwrap_or_default(),
            );
        }
    };

    match state.store.conversation_stats(conversation.id).await {
        Ok(stats) => (
            StatusCode::OK,
            serde_json::json!({
                "session_id": session_id,
                "conversation_id": conversation.id,
                "total_messages": stats.total_messages,
                "user_messages": stats.user_messages,
                "assistant_messages": stats.assistant_messages,
            }),
        ),
        Err(e) => {
            tracing::error!(error = %e, session_id, "stats query failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::to_value(ErrorResponse::new(store_error_message(&e)))
                    .unwrap_or_default(),
            )
        }
    }
}

// ============================================================================
// Axum handler wrappers (thin — delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn chat_handler(
    State(state): State<Arc<HttpState>>,
    Json(request): Json<ChatRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = stream_turn(state, request).await.map(|turn_event| {
        let event = Event::default()
            .json_data(&turn_event)
            .unwrap_or_else(|_| Event::default().data("{}"));
        Ok(event)
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

pub async fn upload_handler(
    State(state): State<Arc<HttpState>>,
    mut multipart: Multipart,
) -> impl IntoResponse {
    let mut session_id: Option<String> = None;
    let mut file: Option<(String, Option<String>, bytes::Bytes)> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(f)) => f,
            Ok(None) => break,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::to_value(ErrorResponse::new(format!(
                        "malformed upload request: {e}"
                    )))
                    .unwrap_or_default()),
                );
            }
        };

        match field.name() {
            Some("session_id") => {
                session_id = field.text().await.ok();
            }
            Some("file") => {
                let filename = field.file_name().unwrap_or("").to_string();
                let content_type = field.content_type().map(|ct| ct.to_string());
                match field.bytes().await {
                    Ok(bytes) => file = Some((filename, content_type, bytes)),
                    Err(e) => {
                        return (
                            StatusCode::PAYLOAD_TOO_LARGE,
                            Json(serde_json::to_value(ErrorResponse::new(format!(
                                "upload could not be read: {e}"
                            )))
                            .unwrap_or_default()),
                        );
                    }
                }
            }
            _ => {}
        }
    }

    let Some(session_id) = session_id.filter(|s| !s.trim().is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(
                serde_json::to_value(ErrorResponse::new("session_id field is required"))
                    .unwrap_or_default(),
            ),
        );
    };
    let Some((filename, content_type, bytes)) = file else {
        return (
            StatusCode::BAD_REQUEST,
            Json(
                serde_json::to_value(ErrorResponse::new("file field is required"))
                    .unwrap_or_default(),
            ),
        );
    };

    let (status, body) = upload::upload_inner(
        &state,
        &session_id,
        &filename,
        content_type.as_deref(),
        &bytes,
    )
    .await;
    (status, Json(body))
}

pub async fn history_handler(
    State(state): State<Arc<HttpState>>,
    Path(session_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let (status, body) = history_inner(&state, &session_id, query.limit).await;
    (status, Json(body))
}

pub async fn stats_handler(
    State(state): State<Arc<HttpState>>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let (status, body) = stats_inner(&state, &session_id).await;
    (status, Json(body))
}

// ============================================================================
// Unit Tests — pure pieces only; DB-backed paths live in tests/
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_inner_pure() {
        let v = version_inner();
        assert!(v["version"].is_string(), "version must be string");
        assert_eq!(v["protocol"], "ledgerchat/1", "protocol must be ledgerchat/1");
    }

    #[test]
    fn extraction_failures_map_to_distinct_messages() {
        let messages = [
            extract_error_message(
                &ExtractError::UnsupportedFormat("zip".to_string()),
                "a.zip",
            ),
            extract_error_message(&ExtractError::CorruptInput("bad xref".to_string()), "a.pdf"),
            extract_error_message(&ExtractError::EmptyResult, "a.pdf"),
            extract_error_message(&ExtractError::NotImplemented("image"), "a.png"),
        ];
        for (i, a) in messages.iter().enumerate() {
            for b in &messages[i + 1..] {
                assert_ne!(a, b, "failure categories must read differently");
            }
        }
        // raw parser detail stays out of the user-facing text
        assert!(!messages[1].contains("bad xref"));
    }

    #[test]
    fn completion_failures_map_to_distinct_messages() {
        let messages = [
            completion_error_message(&CompletionError::Auth("401".to_string())),
            completion_error_message(&CompletionError::RateLimited),
            completion_error_message(&CompletionError::Upstream { status: 503 }),
            completion_error_message(&CompletionError::InvalidResponse("nope".to_string())),
        ];
        for (i, a) in messages.iter().enumerate() {
            for b in &messages[i + 1..] {
                assert_ne!(a, b, "failure categories must read differently");
            }
        }
    }

    #[test]
    fn store_failures_map_to_distinct_messages() {
        let unknown = store_error_message(&StoreError::UnknownConversation(uuid::Uuid::new_v4()));
        let unavailable = store_error_message(&StoreError::Unavailable("pool".to_string()));
        assert_ne!(unknown, unavailable);
    }
}
