//! Streaming chat route.
//!
//! `POST /api/chat` hands the request to the relay and streams fragments back
//! as they arrive. Failures before the first fragment become a JSON error
//! with a non-200 status; failures after it are appended in-band, since the
//! status line has already gone out.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures::StreamExt;
use futures::future::ready;
use relay_core::{RelaySession, StreamChunk};
use tracing::debug;
use utoipa::OpenApi;

use crate::config::StreamFraming;
use crate::error::ServerError;
use crate::schemas::chat::ChatBody;
use crate::state::AppState;

const X_ACCEL_BUFFERING: &str = "x-accel-buffering";

#[derive(OpenApi)]
#[openapi(paths(chat), components(schemas(ChatBody)))]
pub struct ChatApi;

/// Register chat routes.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/chat", post(chat))
}

/// Relay one chat request (`POST /api/chat`).
///
/// The body is the raw concatenation of generated fragments, or one `data:`
/// event per fragment when SSE framing is configured.
#[utoipa::path(
    post,
    path = "/api/chat",
    tag = "chat",
    request_body = ChatBody,
    responses(
        (status = 200, description = "Generated text, streamed", content_type = "text/event-stream", body = String),
        (status = 400, description = "Missing message or malformed body"),
        (status = 413, description = "Body exceeds the configured limit"),
        (status = 500, description = "Upstream credentials missing or rejected"),
        (status = 502, description = "Upstream stream could not be opened"),
    )
)]
pub async fn chat(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ChatBody>, JsonRejection>,
) -> Result<Response, ServerError> {
    let Json(body) = payload.map_err(rejection_to_error)?;
    debug!(
        message_len = body.message.len(),
        image = body.image.is_some(),
        json_mode = body.json_mode,
        "chat request"
    );

    let session = state.relay.handle(body.into()).await?;

    match state.config.stream_framing {
        StreamFraming::Raw => raw_response(session),
        StreamFraming::Sse => Ok(sse_response(session)),
    }
}

fn rejection_to_error(rejection: JsonRejection) -> ServerError {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ServerError::PayloadTooLarge(rejection.body_text())
    } else {
        ServerError::BadRequest(rejection.body_text())
    }
}

/// Marker appended to a raw stream that failed after output began.
fn error_marker(message: &str) -> String {
    format!("\n\nError: {message}")
}

fn raw_response(session: RelaySession) -> Result<Response, ServerError> {
    let body = session.filter_map(|chunk| {
        ready(match chunk {
            StreamChunk::Token(text) => Some(Ok::<_, Infallible>(Bytes::from(text))),
            StreamChunk::Error(message) => Some(Ok(Bytes::from(error_marker(&message)))),
            StreamChunk::Done => None,
        })
    });

    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache, no-transform")
        .header(X_ACCEL_BUFFERING, "no")
        .body(Body::from_stream(body))
        .map_err(|e| ServerError::Internal(format!("failed to build streaming response: {e}")))
}

fn sse_response(session: RelaySession) -> Response {
    let events = session.filter_map(|chunk| {
        ready(match chunk {
            StreamChunk::Token(text) => Some(Ok::<_, Infallible>(Event::default().data(text))),
            StreamChunk::Error(message) => Some(Ok(Event::default().event("error").data(message))),
            StreamChunk::Done => None,
        })
    });

    let mut response = Sse::new(events).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache, no-transform"));
    response
        .headers_mut()
        .insert(X_ACCEL_BUFFERING, HeaderValue::from_static("no"));
    response
}

// ── Tests ──────────────────────────────────────────────────────────────────────
