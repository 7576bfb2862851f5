//! Request and prompt types shared by the relay pipeline.

use serde::Serialize;
use strum::{AsRefStr, Display};

/// Output framing requested from the upstream provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum OutputMode {
    /// Free-form text.
    #[default]
    Plain,
    /// A single JSON object.
    Json,
}

impl OutputMode {
    /// Map the wire-level `json_mode` flag onto an [`OutputMode`].
    pub fn from_json_flag(json_mode: bool) -> Self {
        if json_mode { OutputMode::Json } else { OutputMode::Plain }
    }
}

/// One inbound chat request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    /// The user's message. Must be non-empty.
    pub message: String,
    /// Optional base64 image, either bare or as a `data:` URI.
    pub image: Option<String>,
    pub mode: OutputMode,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>, image: Option<String>, mode: OutputMode) -> Self {
        Self {
            message: message.into(),
            image,
            mode,
        }
    }
}

/// Author of a prompt part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// A base64 image embedded in the user part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    /// Bare base64 payload, with any `data:` prefix removed.
    pub base64: String,
    /// MIME type declared to the provider, e.g. `image/png`.
    pub media_type: String,
}

impl ImageData {
    /// Render as a `data:` URL for the provider.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.base64)
    }
}

/// Content of a prompt part: text alone, or text followed by an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptContent {
    Text(String),
    TextWithImage { text: String, image: ImageData },
}

impl PromptContent {
    pub fn text(&self) -> &str {
        match self {
            PromptContent::Text(text) | PromptContent::TextWithImage { text, .. } => text,
        }
    }

    pub fn image(&self) -> Option<&ImageData> {
        match self {
            PromptContent::Text(_) => None,
            PromptContent::TextWithImage { image, .. } => Some(image),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPart {
    pub role: Role,
    pub content: PromptContent,
}

/// The structured prompt sent upstream.
///
/// Always exactly one system part followed by exactly one user part; only
/// [`crate::prompt::build`] can construct one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptDocument {
    parts: [PromptPart; 2],
}

impl PromptDocument {
    pub(crate) fn new(system: impl Into<String>, user: PromptContent) -> Self {
        Self {
            parts: [
                PromptPart {
                    role: Role::System,
                    content: PromptContent::Text(system.into()),
                },
                PromptPart {
                    role: Role::User,
                    content: user,
                },
            ],
        }
    }

    /// Parts in the order they are sent upstream.
    pub fn parts(&self) -> &[PromptPart] {
        &self.parts
    }

    pub fn system_prompt(&self) -> &str {
        self.parts[0].content.text()
    }

    pub fn user(&self) -> &PromptPart {
        &self.parts[1]
    }

    pub fn user_message(&self) -> &str {
        self.parts[1].content.text()
    }

    pub fn has_image(&self) -> bool {
        self.parts[1].content.image().is_some()
    }
}
