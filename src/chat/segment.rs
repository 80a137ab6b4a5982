//! Bot reply segments and their upstream wire shapes.

use super::client::ChatError;
use serde::Deserialize;
use serde_json::Value;

/// One unit of bot output, in the order the upstream returned it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageSegment {
    /// Markdown text bubble
    Text { markdown: String },
    /// Audio bubble pointing at a remote resource
    Audio { url: String },
    /// Any bubble kind the relay doesn't forward (images, videos, embeds...)
    Unknown { kind: String },
}

impl MessageSegment {
    pub fn text(markdown: impl Into<String>) -> Self {
        MessageSegment::Text { markdown: markdown.into() }
    }

    pub fn audio(url: impl Into<String>) -> Self {
        MessageSegment::Audio { url: url.into() }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &str {
        match self {
            MessageSegment::Text { .. } => "text",
            MessageSegment::Audio { .. } => "audio",
            MessageSegment::Unknown { kind } => kind,
        }
    }

    /// Convert one upstream message into a segment.
    ///
    /// ## Upstream shapes:
    /// - `{"type": "text", "content": {"markdown": "..."}}`
    /// - `{"type": "audio", "content": {"url": "..."}}`
    ///
    /// A text or audio message without its payload field is a protocol error; any other
    /// type becomes `Unknown` so the relay can skip it.
    pub fn from_upstream(message: UpstreamMessage) -> Result<Self, ChatError> {
        match message.kind.as_str() {
            "text" => message
                .content
                .get("markdown")
                .and_then(Value::as_str)
                .map(MessageSegment::text)
                .ok_or_else(|| {
                    ChatError::UpstreamProtocolError("text message without markdown content".to_string())
                }),
            "audio" => message
                .content
                .get("url")
                .and_then(Value::as_str)
                .map(MessageSegment::audio)
                .ok_or_else(|| {
                    ChatError::UpstreamProtocolError("audio message without url".to_string())
                }),
            other => Ok(MessageSegment::Unknown { kind: other.to_string() }),
        }
    }
}

/// A message entry as returned by the bot API.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub content: Value,
}

/// Body of a `startChat` or `continueChat` response.
///
/// Both fields are optional here so their absence is reported as a protocol error
/// naming the field, rather than a generic deserialization failure.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
    pub messages: Option<Vec<UpstreamMessage>>,
}

impl ChatResponse {
    /// Convert the message array into segments, preserving order.
    pub fn into_segments(self) -> Result<Vec<MessageSegment>, ChatError> {
        self.messages
            .ok_or_else(|| ChatError::UpstreamProtocolError("response has no messages array".to_string()))?
            .into_iter()
            .map(MessageSegment::from_upstream)
            .collect()
    }
}
