//! Unified server error type.
//!
//! Handlers return `Result<T, ServerError>`, which renders as
//! `{"error": "..."}` with a matching status code. Upstream and I/O details
//! are logged in full but only a generic message reaches the caller.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use relay_core::RelayError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// All errors that can occur in the relay-server request lifecycle.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Propagated from the relay pipeline.
    #[error(transparent)]
    Relay(#[from] RelayError),

    /// The body was not valid JSON or did not match the expected shape.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The body exceeded the configured limit.
    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    /// An unclassified internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::Relay(RelayError::InvalidRequest(_)) | ServerError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ServerError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ServerError::Relay(RelayError::UpstreamStream(_)) => StatusCode::BAD_GATEWAY,
            ServerError::Relay(RelayError::UpstreamAuth(_) | RelayError::Io(_))
            | ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let client_message = match &self {
            ServerError::Relay(RelayError::InvalidRequest(m)) => m.clone(),
            ServerError::BadRequest(m) | ServerError::PayloadTooLarge(m) => m.clone(),

            ServerError::Relay(e @ RelayError::UpstreamAuth(_)) => {
                error!(error = %e, "upstream credentials unusable");
                "upstream credentials are missing or were rejected".to_owned()
            }
            ServerError::Relay(e @ RelayError::UpstreamStream(_)) => {
                error!(error = %e, "upstream stream could not be opened");
                "upstream completion service unavailable".to_owned()
            }
            ServerError::Relay(e @ RelayError::Io(_)) => {
                error!(error = %e, "I/O error");
                "internal server error".to_owned()
            }
            ServerError::Internal(m) => {
                error!(message = %m, "internal server error");
                "internal server error".to_owned()
            }
        };
        (status, Json(json!({ "error": client_message }))).into_response()
    }
}
