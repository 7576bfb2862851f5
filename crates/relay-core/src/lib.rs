//! relay-core – the streaming relay and session-logging pipeline.
//!
//! A request flows through four pieces:
//!
//! 1. [`prompt::build`] turns a [`ChatRequest`] into a [`PromptDocument`].
//! 2. A [`CompletionStream`] (normally [`upstream::openai::OpenAiClient`])
//!    opens one streaming call to the completion provider.
//! 3. [`Relay`] forwards every fragment to the caller as [`StreamChunk`]s
//!    while accumulating the full output.
//! 4. [`SessionLog`] writes one text record per request once the stream ends.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use relay_core::{ChatRequest, OutputMode, Relay, RelayOptions, SessionLog, SessionLogConfig, StreamChunk};
//! use relay_core::upstream::{openai::OpenAiClient, UpstreamConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), relay_core::RelayError> {
//! let upstream = OpenAiClient::new(UpstreamConfig {
//!     api_key: std::env::var("OPENAI_API_KEY").ok(),
//!     ..Default::default()
//! })?;
//! let relay = Relay::new(
//!     Arc::new(upstream),
//!     Arc::new(SessionLog::new(SessionLogConfig::default())),
//!     RelayOptions::default(),
//! );
//!
//! let mut session = relay
//!     .handle(ChatRequest::new("Design a login form", None, OutputMode::Plain))
//!     .await?;
//! while let Some(chunk) = session.next().await {
//!     if let StreamChunk::Token(text) = chunk {
//!         print!("{text}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod prompt;
pub mod relay;
pub mod session_log;
pub mod types;
pub mod upstream;

pub use error::RelayError;
pub use relay::{Relay, RelayOptions, RelaySession, SessionOutcome, StreamChunk};
pub use session_log::{SessionLog, SessionLogConfig, SessionRecord};
pub use types::{ChatRequest, ImageData, OutputMode, PromptContent, PromptDocument, PromptPart, Role};
pub use upstream::{CompletionStream, FragmentStream};
