use thiserror::Error;

/// Errors produced while relaying a chat request.
///
/// The variants follow who is at fault and how far the request got:
/// the first two are raised before any output is streamed, the third may
/// happen at any time, and the last one only ever comes from the session log.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The caller sent a missing or malformed message or image.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Upstream credentials are absent, or the provider rejected them.
    #[error("upstream authentication failed: {0}")]
    UpstreamAuth(String),

    /// The upstream connection failed, dropped, or reported a terminal error.
    #[error("upstream stream failed: {0}")]
    UpstreamStream(String),

    /// Writing the session log failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
