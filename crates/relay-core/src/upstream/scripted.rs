//! A [`CompletionStream`] that replays a fixed script, for tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::{CompletionStream, FragmentStream};
use crate::error::RelayError;
use crate::types::{OutputMode, PromptDocument};

/// One step of a scripted upstream response.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Yield a fragment.
    Fragment(String),
    /// Yield a terminal [`RelayError::UpstreamStream`].
    Fail(String),
    /// Never yield again; the stream stays open.
    Stall,
}

#[derive(Debug, Clone)]
enum OpenBehavior {
    Succeed,
    MissingCredentials,
    Unavailable(String),
    Hang,
}

/// Scripted upstream that records how it was called.
#[derive(Debug)]
pub struct ScriptedUpstream {
    steps: Vec<ScriptStep>,
    open: OpenBehavior,
    calls: AtomicUsize,
    last_call: Mutex<Option<(PromptDocument, OutputMode)>>,
}

impl ScriptedUpstream {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self::with_open(steps, OpenBehavior::Succeed)
    }

    /// Yields each fragment, then ends normally.
    pub fn fragments<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(fragments.into_iter().map(|f| ScriptStep::Fragment(f.into())).collect())
    }

    /// Behaves like a provider with no API key.
    pub fn unconfigured() -> Self {
        Self::with_open(Vec::new(), OpenBehavior::MissingCredentials)
    }

    /// Fails to open with an [`RelayError::UpstreamStream`].
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::with_open(Vec::new(), OpenBehavior::Unavailable(reason.into()))
    }

    /// Never answers the open.
    pub fn hanging() -> Self {
        Self::with_open(Vec::new(), OpenBehavior::Hang)
    }

    fn with_open(steps: Vec<ScriptStep>, open: OpenBehavior) -> Self {
        Self {
            steps,
            open,
            calls: AtomicUsize::new(0),
            last_call: Mutex::new(None),
        }
    }

    /// Number of times [`CompletionStream::stream`] was called.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The prompt and mode of the most recent call.
    pub fn last_call(&self) -> Option<(PromptDocument, OutputMode)> {
        self.last_call.lock().ok().and_then(|guard| guard.clone())
    }
}

#[async_trait]
impl CompletionStream for ScriptedUpstream {
    async fn stream(
        &self,
        document: &PromptDocument,
        mode: OutputMode,
    ) -> Result<FragmentStream, RelayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_call.lock() {
            *last = Some((document.clone(), mode));
        }

        match &self.open {
            OpenBehavior::Succeed => {}
            OpenBehavior::MissingCredentials => {
                return Err(RelayError::UpstreamAuth("upstream API key not configured".into()));
            }
            OpenBehavior::Unavailable(reason) => {
                return Err(RelayError::UpstreamStream(reason.clone()));
            }
            OpenBehavior::Hang => futures::future::pending::<()>().await,
        }

        let steps = self.steps.clone();
        Ok(Box::pin(async_stream::stream! {
            for step in steps {
                match step {
                    ScriptStep::Fragment(text) => yield Ok(text),
                    ScriptStep::Fail(reason) => {
                        yield Err(RelayError::UpstreamStream(reason));
                        break;
                    }
                    ScriptStep::Stall => futures::future::pending::<()>().await,
                }
            }
        }))
    }

    fn is_configured(&self) -> bool {
        !matches!(self.open, OpenBehavior::MissingCredentials)
    }
}
