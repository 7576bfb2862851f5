//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use relay_core::Relay;

use crate::config::Config;

/// State shared across all HTTP handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// The relay pipeline: upstream client plus session log.
    pub relay: Arc<Relay>,
}
