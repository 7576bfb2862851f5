//! Prompt construction.
//!
//! [`build`] is pure: the same [`ChatRequest`] always yields the same
//! [`PromptDocument`], and the only failure is [`RelayError::InvalidRequest`].

use crate::error::RelayError;
use crate::types::{ChatRequest, ImageData, PromptContent, PromptDocument};

/// Fixed instruction prepended to every conversation.
pub const SYSTEM_PROMPT: &str = "You are a senior professional UI/UX designer and developer. \
Your main job is to follow the user's instructions, help them understand design decisions and \
design options better, and create web UI development code that matches their requirements. \
Use React and TailwindCSS in your implementation. Be helpful in answer other design-related \
questions too. Be concise in your response. Be specific and avoid generic terms such as \
usability or user friendly. Do not provide information you are not asked about.";

const BASE64_MARKER: &str = "base64,";

/// Media type declared when the payload carries none.
pub const DEFAULT_IMAGE_MEDIA_TYPE: &str = "image/png";

/// Build the prompt for one request.
pub fn build(request: &ChatRequest) -> Result<PromptDocument, RelayError> {
    if request.message.is_empty() {
        return Err(RelayError::InvalidRequest("no message provided".into()));
    }

    let image = request
        .image
        .as_deref()
        .map(|raw| (raw, strip_data_uri(raw).trim()))
        .filter(|(_, base64)| !base64.is_empty());

    let content = match image {
        None => PromptContent::Text(request.message.clone()),
        Some((raw, base64)) => PromptContent::TextWithImage {
            text: request.message.clone(),
            image: ImageData {
                base64: base64.to_owned(),
                media_type: media_type_of(raw).unwrap_or(DEFAULT_IMAGE_MEDIA_TYPE).to_owned(),
            },
        },
    };

    Ok(PromptDocument::new(SYSTEM_PROMPT, content))
}

/// Strip everything up to and including the last `base64,` marker.
///
/// Payloads without a marker are returned unchanged.
pub fn strip_data_uri(payload: &str) -> &str {
    payload
        .rsplit_once(BASE64_MARKER)
        .map_or(payload, |(_, data)| data)
}

/// Extract `image/jpeg` from `data:image/jpeg;base64,...`.
fn media_type_of(payload: &str) -> Option<&str> {
    let header = payload.strip_prefix("data:")?;
    let (header, _) = header.split_once(BASE64_MARKER)?;
    let media_type = header.trim_end_matches(';').split(';').next()?.trim();
    media_type.starts_with("image/").then_some(media_type)
}

// ── Tests ──────────────────────────────────────────────────────────────────────
