//! Axum router construction.
//!
//! [`build`] assembles the complete application router:
//! - Middleware layers (body limit, CORS, per-request trace-ID injection)
//! - `POST /api/chat`, the streaming relay
//! - `GET /healthz` and `GET /test`
//! - `GET /api-docs/openapi.json`

mod chat;
pub mod doc;
mod health;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::{Router, middleware};
use tower::ServiceBuilder;

use crate::middleware::{cors, trace};
use crate::state::AppState;

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(health::router())
        .merge(chat::router())
        .route("/api-docs/openapi.json", get(doc::openapi_json))
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes))
        // Outermost layers execute first on the way in.
        .layer(ServiceBuilder::new().layer(cors::cors_layer(state.clone())))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            trace::trace_middleware,
        ))
        .with_state(state)
}


// ── Tests ──────────────────────────────────────────────────────────────────────
