//! Decoding of OpenAI `chat.completion.chunk` server-sent events.

use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use serde::Deserialize;

use super::FragmentStream;
use crate::error::RelayError;

const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Deserialize)]
struct ChunkEvent {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<ChunkError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkError {
    #[serde(default)]
    message: String,
}

/// Turn a raw SSE byte stream into text fragments.
///
/// Empty deltas (role announcements, finish markers) are skipped. The stream
/// ends at `data: [DONE]`; ending without it is an error.
pub(crate) fn fragments<S, E>(byte_stream: S) -> FragmentStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::error::Error + Send + 'static,
{
    let mut events = Box::pin(
        byte_stream
            .map(|result| result.map_err(|e| std::io::Error::other(e.to_string())))
            .eventsource(),
    );

    Box::pin(async_stream::stream! {
        let mut finished = false;
        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    yield Err(RelayError::UpstreamStream(format!("upstream stream interrupted: {e}")));
                    finished = true;
                    break;
                }
            };

            if event.data.trim() == DONE_SENTINEL {
                finished = true;
                break;
            }

            match decode(&event.data) {
                Ok(Some(text)) => yield Ok(text),
                Ok(None) => {}
                Err(e) => {
                    yield Err(e);
                    finished = true;
                    break;
                }
            }
        }

        if !finished {
            yield Err(RelayError::UpstreamStream(
                "upstream closed the stream before it was complete".into(),
            ));
        }
    })
}

/// Decode one event payload into its text delta, if any.
fn decode(data: &str) -> Result<Option<String>, RelayError> {
    let event: ChunkEvent = serde_json::from_str(data)
        .map_err(|e| RelayError::UpstreamStream(format!("malformed upstream event: {e}")))?;

    if let Some(error) = event.error {
        return Err(RelayError::UpstreamStream(format!(
            "upstream reported an error: {}",
            error.message
        )));
    }

    Ok(event
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty()))
}
