//! Health and smoke-test endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use tracing::warn;
use utoipa::OpenApi;

use crate::schemas::health::{HealthStatus, TestResponse};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(get_healthz, get_test), components(schemas(HealthStatus, TestResponse)))]
pub struct HealthApi;

/// Register health-check routes.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/healthz", get(get_healthz))
        .route("/test", get(get_test))
}

/// Readiness check.
///
/// Healthy only when an API key is configured and the session log directory
/// accepts writes.
#[utoipa::path(
    get,
    path = "/healthz",
    tag = "health",
    responses(
        (status = 200, description = "Relay is ready", body = HealthStatus),
        (status = 500, description = "Credentials missing or log directory unwritable", body = HealthStatus),
    )
)]
pub async fn get_healthz(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthStatus>) {
    if !state.relay.upstream().is_configured() {
        return unhealthy("OpenAI API key not configured");
    }

    if let Err(e) = state.relay.session_log().probe().await {
        warn!(
            error = %e,
            dir = %state.relay.session_log().output_dir().display(),
            "session log directory is not writable"
        );
        return unhealthy("session log directory is not writable");
    }

    (
        StatusCode::OK,
        Json(HealthStatus::Healthy {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }),
    )
}

fn unhealthy(message: &str) -> (StatusCode, Json<HealthStatus>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(HealthStatus::Error {
            message: message.to_owned(),
        }),
    )
}

/// Liveness check that touches nothing.
#[utoipa::path(
    get,
    path = "/test",
    tag = "health",
    responses((status = 200, description = "Server is up", body = TestResponse))
)]
pub async fn get_test() -> Json<TestResponse> {
    Json(TestResponse {
        status: "ok".into(),
        message: "Test endpoint working".into(),
    })
}

// ── Tests ──────────────────────────────────────────────────────────────────────
