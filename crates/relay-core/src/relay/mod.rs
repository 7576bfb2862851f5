//! The relay orchestrator.
//!
//! [`Relay::handle`] walks a request through `Building → Streaming →
//! {Completed, Failed}` and always finishes with a best-effort log write:
//!
//! - **Building**: [`prompt::build`]. An invalid request fails here, before
//!   any upstream call and without a session record.
//! - **Opening**: the upstream stream is opened before `handle` returns, so
//!   failures at this point can still become a structured error response.
//!   Opening is bounded by the idle timeout and counts against the overall
//!   deadline. A record with empty output is written anyway.
//! - **Streaming**: a spawned session task reads fragments, publishes each one
//!   as a [`StreamChunk::Token`] on a bounded channel and appends it to the
//!   accumulated output once the channel has taken it. A slow client
//!   therefore slows the upstream read instead of growing a buffer.
//! - **Logged**: after the terminal chunk is queued and the channel closed,
//!   the task writes the [`SessionRecord`]. A failed write is traced and
//!   otherwise ignored.
//!
//! If the client goes away, the receiving half is dropped; the task notices
//! through [`mpsc::Sender::closed`], abandons the upstream stream without
//! draining it, and still writes the record.

mod protocol;

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::DateTime;
use chrono_tz::Tz;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout, timeout_at};
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::error::RelayError;
use crate::prompt;
use crate::session_log::{SessionLog, SessionRecord};
use crate::types::{ChatRequest, PromptDocument};
use crate::upstream::{CompletionStream, FragmentStream};

pub use protocol::{SessionOutcome, StreamChunk};

/// Tuning for relay sessions.
#[derive(Debug, Clone)]
pub struct RelayOptions {
    /// Longest allowed gap between two upstream fragments.
    pub idle_timeout: Duration,
    /// Deadline for the whole upstream exchange, opening included.
    pub stream_timeout: Duration,
    /// Chunks buffered between the session task and the client.
    pub channel_capacity: usize,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30),
            stream_timeout: Duration::from_secs(300),
            channel_capacity: 64,
        }
    }
}

/// Composes prompt construction, the upstream stream, and the session log.
pub struct Relay {
    upstream: Arc<dyn CompletionStream>,
    log: Arc<SessionLog>,
    options: RelayOptions,
    tasks: TaskTracker,
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("log", &self.log)
            .field("options", &self.options)
            .field("sessions_in_flight", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

impl Relay {
    pub fn new(
        upstream: Arc<dyn CompletionStream>,
        log: Arc<SessionLog>,
        options: RelayOptions,
    ) -> Self {
        Self {
            upstream,
            log,
            options,
            tasks: TaskTracker::new(),
        }
    }

    pub fn upstream(&self) -> &dyn CompletionStream {
        self.upstream.as_ref()
    }

    pub fn session_log(&self) -> &SessionLog {
        &self.log
    }

    /// Start relaying one request.
    ///
    /// Returns an error only for failures before any output exists:
    /// [`RelayError::InvalidRequest`], [`RelayError::UpstreamAuth`], or an
    /// [`RelayError::UpstreamStream`] raised while opening. Later failures
    /// arrive in-band as a final [`StreamChunk::Error`].
    pub async fn handle(&self, request: ChatRequest) -> Result<RelaySession, RelayError> {
        let document = prompt::build(&request)?;
        let started_at = self.log.now();

        let span = info_span!(
            "relay_session",
            started_at = %started_at.format("%Y%m%d_%H%M%S"),
            mode = %request.mode,
            image = document.has_image(),
        );

        let deadline = Instant::now() + self.options.stream_timeout;
        let open = self.upstream.stream(&document, request.mode);
        let opened = match timeout_at(deadline, timeout(self.options.idle_timeout, open))
            .instrument(span.clone())
            .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RelayError::UpstreamStream(format!(
                "upstream did not respond within {}s",
                self.options.idle_timeout.as_secs_f32()
            ))),
            Err(_) => Err(RelayError::UpstreamStream(format!(
                "upstream stream exceeded {}s",
                self.options.stream_timeout.as_secs_f32()
            ))),
        };

        let upstream = match opened {
            Ok(upstream) => upstream,
            Err(e) => {
                span.in_scope(|| warn!(error = %e, "upstream stream could not be opened"));
                let record = SessionRecord::new(started_at, &document, String::new());
                self.tasks
                    .spawn(write_record(Arc::clone(&self.log), record).instrument(span));
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::channel(self.options.channel_capacity.max(1));
        let task = SessionTask {
            document,
            started_at,
            deadline,
            tx,
            log: Arc::clone(&self.log),
            options: self.options.clone(),
        };
        self.tasks.spawn(task.run(upstream).instrument(span));

        Ok(RelaySession::new(rx))
    }

    /// Stop accepting sessions and wait up to `grace` for running ones to
    /// finish and write their records.
    ///
    /// Returns `false` if some sessions were still running when `grace`
    /// expired.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.tasks.close();
        let pending = self.tasks.len();
        if pending > 0 {
            info!(pending, "waiting for relay sessions to finish");
        }
        timeout(grace, self.tasks.wait()).await.is_ok()
    }
}

/// Client side of a relay session.
///
/// Yields [`StreamChunk::Token`]s in generation order and always ends with
/// exactly one terminal chunk. Dropping it cancels the session.
pub struct RelaySession {
    inner: Pin<Box<dyn Stream<Item = StreamChunk> + Send>>,
}

impl RelaySession {
    fn new(mut rx: mpsc::Receiver<StreamChunk>) -> Self {
        let inner = async_stream::stream! {
            let mut terminated = false;
            while let Some(chunk) = rx.recv().await {
                terminated = chunk.is_terminal();
                yield chunk;
                if terminated {
                    break;
                }
            }
            if !terminated {
                yield StreamChunk::Error("relay session ended unexpectedly".into());
            }
        };
        Self {
            inner: Box::pin(inner),
        }
    }
}

impl Stream for RelaySession {
    type Item = StreamChunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for RelaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelaySession").finish_non_exhaustive()
    }
}

// ── Session task ──────────────────────────────────────────────────────────────

struct SessionTask {
    document: PromptDocument,
    started_at: DateTime<Tz>,
    deadline: Instant,
    tx: mpsc::Sender<StreamChunk>,
    log: Arc<SessionLog>,
    options: RelayOptions,
}

impl SessionTask {
    async fn run(self, mut upstream: FragmentStream) {
        let SessionTask {
            document,
            started_at,
            deadline,
            tx,
            log,
            options,
        } = self;

        let mut full_output = String::new();
        let mut fragments = 0usize;

        let outcome = loop {
            let next = tokio::select! {
                _ = tx.closed() => break SessionOutcome::Cancelled,
                next = timeout_at(deadline, timeout(options.idle_timeout, upstream.next())) => next,
            };

            let failure = match next {
                Ok(Ok(Some(Ok(fragment)))) => {
                    if fragment.is_empty() {
                        continue;
                    }
                    if tx.send(StreamChunk::Token(fragment.clone())).await.is_err() {
                        break SessionOutcome::Cancelled;
                    }
                    full_output.push_str(&fragment);
                    fragments += 1;
                    continue;
                }
                Ok(Ok(None)) => {
                    // A closed channel here only means the client left after
                    // the last token; the output is complete either way.
                    let _ = tx.send(StreamChunk::Done).await;
                    break SessionOutcome::Completed;
                }
                Ok(Ok(Some(Err(e)))) => e,
                Ok(Err(_)) => RelayError::UpstreamStream(format!(
                    "no output from upstream for {}s",
                    options.idle_timeout.as_secs_f32()
                )),
                Err(_) => RelayError::UpstreamStream(format!(
                    "upstream stream exceeded {}s",
                    options.stream_timeout.as_secs_f32()
                )),
            };

            warn!(error = %failure, fragments, "upstream stream failed mid-way");
            let _ = tx.send(StreamChunk::Error(failure.to_string())).await;
            break SessionOutcome::Failed;
        };

        // Close the client body before touching the disk.
        drop(upstream);
        drop(tx);

        info!(
            %outcome,
            fragments,
            output_len = full_output.len(),
            "relay session finished"
        );

        let record = SessionRecord::new(started_at, &document, full_output);
        write_record(log, record).await;
    }
}

async fn write_record(log: Arc<SessionLog>, record: SessionRecord) {
    match log.record(&record).await {
        Ok(path) => debug!(path = %path.display(), "session record written"),
        Err(e) => warn!(
            error = %e,
            dir = %log.output_dir().display(),
            "failed to write session log"
        ),
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
