//! Upstream completion providers.
//!
//! The relay only depends on [`CompletionStream`]; [`openai::OpenAiClient`]
//! is the production implementation.

pub mod openai;
#[cfg(any(test, feature = "test-util"))]
pub mod scripted;
mod sse;

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;

use crate::error::RelayError;
use crate::types::{OutputMode, PromptDocument};

/// Default OpenAI-compatible API root.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default chat model.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// A finite, single-pass sequence of output fragments in generation order.
///
/// An `Err` item is terminal; fragments yielded before it remain valid.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, RelayError>> + Send>>;

/// A provider that can stream a completion for a prompt.
#[async_trait]
pub trait CompletionStream: Send + Sync + 'static {
    /// Open exactly one upstream request and return its fragments.
    ///
    /// Fails with [`RelayError::UpstreamAuth`] when credentials are missing
    /// or rejected, and [`RelayError::UpstreamStream`] for any other failure
    /// before the stream opens.
    async fn stream(
        &self,
        document: &PromptDocument,
        mode: OutputMode,
    ) -> Result<FragmentStream, RelayError>;

    /// Whether credentials are present. Does not contact the provider.
    fn is_configured(&self) -> bool;
}

/// Connection settings for the upstream provider.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub api_key: Option<String>,
    /// Sent as `OpenAI-Organization` when set.
    pub organization: Option<String>,
    /// Sent as `OpenAI-Project` when set.
    pub project: Option<String>,
    pub base_url: String,
    pub model: String,
    pub connect_timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            organization: None,
            project: None,
            base_url: DEFAULT_BASE_URL.to_owned(),
            model: DEFAULT_MODEL.to_owned(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl UpstreamConfig {
    /// The API key, if one is set and non-blank.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }
}
