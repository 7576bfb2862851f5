//! Server configuration, loaded from environment variables at startup.

use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;
use relay_core::upstream::{DEFAULT_BASE_URL, DEFAULT_MODEL, UpstreamConfig};
use relay_core::{RelayOptions, SessionLogConfig};
use strum::{Display, EnumString};
use tracing::warn;

/// How streamed fragments are framed on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum StreamFraming {
    /// Fragments concatenated verbatim.
    #[default]
    Raw,
    /// One `data:` event per fragment.
    Sse,
}

/// Runtime configuration for relay-server.
///
/// Everything except the API key has a default, so the server starts without
/// any environment; a missing key is reported by `/healthz` and chat requests.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen host (default: `"0.0.0.0"`).
    pub host: String,
    /// Listen port (default: `5000`).
    pub port: u16,

    pub openai_api_key: Option<String>,
    pub openai_organization: Option<String>,
    pub openai_project: Option<String>,
    /// Upstream base URL (default: `https://api.openai.com/v1`).
    pub openai_base_url: String,
    pub model: String,

    /// Comma-separated list of allowed CORS origins. `None` allows any.
    pub cors_allowed_origins: Option<String>,

    /// Directory receiving session records.
    pub output_dir: PathBuf,
    /// IANA zone name used for record filenames and timestamps.
    pub log_timezone: String,

    pub idle_timeout_secs: u64,
    pub stream_timeout_secs: u64,
    /// Largest accepted request body, in bytes.
    pub max_body_bytes: usize,
    pub stream_framing: StreamFraming,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,
    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build [`Config`] from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let env = Env(lookup);
        Self {
            host: env.or("RELAY_HOST", "0.0.0.0"),
            port: env.parse("PORT", 5000),
            openai_api_key: env.non_empty("OPENAI_API_KEY"),
            openai_organization: env.non_empty("ORGANIZATION_ID"),
            openai_project: env.non_empty("OPENAI_PROJECT_ID"),
            openai_base_url: env.or("OPENAI_BASE_URL", DEFAULT_BASE_URL),
            model: env.or("RELAY_MODEL", DEFAULT_MODEL),
            cors_allowed_origins: env.non_empty("RELAY_CORS_ORIGINS"),
            output_dir: PathBuf::from(env.or(
                "RELAY_OUTPUT_DIR",
                relay_core::session_log::DEFAULT_OUTPUT_DIR,
            )),
            log_timezone: env.or(
                "RELAY_LOG_TIMEZONE",
                relay_core::session_log::DEFAULT_TIMEZONE.name(),
            ),
            idle_timeout_secs: env.parse("RELAY_IDLE_TIMEOUT_SECS", 30),
            stream_timeout_secs: env.parse("RELAY_STREAM_TIMEOUT_SECS", 300),
            max_body_bytes: env.parse("RELAY_MAX_BODY_BYTES", 10 * 1024 * 1024),
            stream_framing: env.parse("RELAY_STREAM_FRAMING", StreamFraming::Raw),
            log_level: env.or("RELAY_LOG", "info"),
            log_json: env
                .get("RELAY_LOG_JSON")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }

    /// `host:port` to bind.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn upstream_config(&self) -> UpstreamConfig {
        UpstreamConfig {
            api_key: self.openai_api_key.clone(),
            organization: self.openai_organization.clone(),
            project: self.openai_project.clone(),
            base_url: self.openai_base_url.clone(),
            model: self.model.clone(),
            ..UpstreamConfig::default()
        }
    }

    pub fn session_log_config(&self) -> SessionLogConfig {
        let timezone = match self.log_timezone.parse::<Tz>() {
            Ok(tz) => tz,
            Err(e) => {
                let fallback = relay_core::session_log::DEFAULT_TIMEZONE;
                warn!(
                    value = %self.log_timezone,
                    error = %e,
                    fallback = fallback.name(),
                    "RELAY_LOG_TIMEZONE is not a known IANA zone"
                );
                fallback
            }
        };
        SessionLogConfig {
            output_dir: self.output_dir.clone(),
            timezone,
        }
    }

    pub fn relay_options(&self) -> RelayOptions {
        RelayOptions {
            idle_timeout: Duration::from_secs(self.idle_timeout_secs.max(1)),
            stream_timeout: Duration::from_secs(self.stream_timeout_secs.max(1)),
            ..RelayOptions::default()
        }
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_owned())
    }

    fn non_empty(&self, key: &str) -> Option<String> {
        self.get(key)
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let cfg = config_from(&[]);
        assert_eq!(cfg.bind_address(), "0.0.0.0:5000");
        assert_eq!(cfg.model, "gpt-4o");
        assert_eq!(cfg.openai_base_url, "https://api.openai.com/v1");
        assert!(cfg.openai_api_key.is_none());
        assert_eq!(cfg.output_dir, PathBuf::from("model_outputs"));
        assert_eq!(cfg.log_timezone, "America/Los_Angeles");
        assert_eq!(cfg.max_body_bytes, 10 * 1024 * 1024);
        assert_eq!(cfg.stream_framing, StreamFraming::Raw);
        assert!(!cfg.log_json);

        let options = cfg.relay_options();
        assert_eq!(options.idle_timeout, Duration::from_secs(30));
        assert_eq!(options.stream_timeout, Duration::from_secs(300));
    }

    #[test]
    fn reads_credentials_and_overrides() {
        let cfg = config_from(&[
            ("OPENAI_API_KEY", " sk-test "),
            ("ORGANIZATION_ID", "org-1"),
            ("PORT", "8080"),
            ("RELAY_STREAM_FRAMING", "SSE"),
            ("RELAY_LOG_JSON", "1"),
            ("RELAY_IDLE_TIMEOUT_SECS", "5"),
        ]);
        assert_eq!(cfg.openai_api_key.as_deref(), Some("sk-test"));
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.stream_framing, StreamFraming::Sse);
        assert!(cfg.log_json);
        assert_eq!(cfg.relay_options().idle_timeout, Duration::from_secs(5));

        let upstream = cfg.upstream_config();
        assert_eq!(upstream.api_key(), Some("sk-test"));
        assert_eq!(upstream.organization.as_deref(), Some("org-1"));
    }

    #[test]
    fn blank_key_counts_as_missing() {
        let cfg = config_from(&[("OPENAI_API_KEY", "   ")]);
        assert!(cfg.openai_api_key.is_none());
    }

    #[test]
    fn unparsable_values_fall_back_to_defaults() {
        let cfg = config_from(&[("PORT", "eighty"), ("RELAY_STREAM_FRAMING", "carrier-pigeon")]);
        assert_eq!(cfg.port, 5000);
        assert_eq!(cfg.stream_framing, StreamFraming::Raw);
    }

    #[test]
    fn unknown_timezone_falls_back() {
        let cfg = config_from(&[("RELAY_LOG_TIMEZONE", "Mars/Olympus_Mons")]);
        assert_eq!(
            cfg.session_log_config().timezone,
            relay_core::session_log::DEFAULT_TIMEZONE
        );

        let cfg = config_from(&[("RELAY_LOG_TIMEZONE", "Europe/Berlin")]);
        assert_eq!(cfg.session_log_config().timezone, chrono_tz::Europe::Berlin);
    }
}
