//! relay-server – entry point.
//!
//! Startup order:
//! 1. Load an optional `.env`, then parse configuration from the environment.
//! 2. Initialise structured tracing (JSON in production, pretty in dev).
//! 3. Build the upstream client, the session log, and the relay.
//! 4. Build the Axum router and start the HTTP server with graceful shutdown.
//! 5. Give in-flight relay sessions a grace period to write their records.

mod config;
mod error;
mod middleware;
mod routes;
mod schemas;
mod state;

use std::sync::Arc;
use std::time::Duration;

use relay_core::upstream::openai::OpenAiClient;
use relay_core::{Relay, SessionLog};
use tracing::{info, warn};

use crate::config::Config;
use crate::state::AppState;

/// How long shutdown waits for running sessions to finish their records.
const SESSION_DRAIN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Configuration ───────────────────────────────────────────────────────
    let dotenv = dotenvy::dotenv();
    let cfg = Config::from_env();

    // ── 2. Tracing ─────────────────────────────────────────────────────────────
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match cfg.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: RELAY_LOG='{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    cfg.log_level, e
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true);

    if cfg.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), "relay-server starting");
    match dotenv {
        Ok(path) => info!(path = %path.display(), "loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => warn!(error = %e, "failed to load .env"),
    }

    // ── 3. Relay pipeline ──────────────────────────────────────────────────────
    let upstream = OpenAiClient::new(cfg.upstream_config())?;
    if cfg.openai_api_key.is_none() {
        warn!("OPENAI_API_KEY is not set; chat requests will fail until it is");
    }
    info!(model = %cfg.model, base_url = %cfg.openai_base_url, "upstream client ready");

    let session_log = SessionLog::new(cfg.session_log_config());
    if let Err(e) = session_log.probe().await {
        warn!(
            error = %e,
            dir = %session_log.output_dir().display(),
            "session log directory is not writable; records will be dropped"
        );
    }

    let relay = Relay::new(
        Arc::new(upstream),
        Arc::new(session_log),
        cfg.relay_options(),
    );

    let state = Arc::new(AppState {
        config: Arc::new(cfg.clone()),
        relay: Arc::new(relay),
    });

    // ── 4. HTTP server with graceful shutdown ──────────────────────────────────
    let app = routes::build(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(cfg.bind_address()).await?;
    info!(addr = %listener.local_addr()?, framing = %cfg.stream_framing, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // ── 5. Drain relay sessions ────────────────────────────────────────────────
    if !state.relay.shutdown(SESSION_DRAIN_GRACE).await {
        warn!(
            grace_secs = SESSION_DRAIN_GRACE.as_secs(),
            "relay sessions still running at shutdown; their records may be missing"
        );
    }

    info!("relay-server stopped");
    Ok(())
}

/// Returns a future that resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; starting graceful shutdown");
}
