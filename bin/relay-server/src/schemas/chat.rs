//! Request type for `POST /api/chat`.

use relay_core::{ChatRequest, OutputMode};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Request body for `POST /api/chat`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatBody {
    /// The user's message. Must not be empty.
    #[serde(default)]
    pub message: String,
    /// Optional base64 image, bare or as a `data:` URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Ask the model for a single JSON object instead of free text.
    #[serde(default)]
    pub json_mode: bool,
}

impl From<ChatBody> for ChatRequest {
    fn from(body: ChatBody) -> Self {
        ChatRequest::new(body.message, body.image, OutputMode::from_json_flag(body.json_mode))
    }
}
