use strum::Display;

/// A single item published to the client by a relay session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    /// A piece of generated output.
    Token(String),
    /// Generation completed normally.
    Done,
    /// Generation stopped because of an upstream error. Always last.
    Error(String),
}

impl StreamChunk {
    /// `true` for [`StreamChunk::Done`] and [`StreamChunk::Error`].
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamChunk::Done | StreamChunk::Error(_))
    }
}

/// How a relay session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SessionOutcome {
    /// The upstream stream was exhausted without error.
    Completed,
    /// The upstream stream failed or timed out mid-way.
    Failed,
    /// The client went away before the stream finished.
    Cancelled,
}
