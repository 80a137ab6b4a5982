//! Wire events written to the client stream.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::{Serialize, Serializer};

/// One unit of the relayed reply, serialized as `{"type": ..., "content": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "content", rename_all = "lowercase")]
pub enum RelayEvent {
    /// Markdown text of one bot bubble, unchanged
    Text(String),
    /// One transcoded audio chunk, base64 on the wire
    Audio(#[serde(serialize_with = "as_base64")] Bytes),
    /// Terminal failure of the turn
    Error(ErrorContent),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorContent {
    pub kind: String,
    pub message: String,
}

fn as_base64<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(bytes))
}

impl RelayEvent {
    pub fn error(kind: &str, message: impl Into<String>) -> Self {
        RelayEvent::Error(ErrorContent {
            kind: kind.to_string(),
            message: message.into(),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            RelayEvent::Text(_) => "text",
            RelayEvent::Audio(_) => "audio",
            RelayEvent::Error(_) => "error",
        }
    }

    /// JSON body of the event.
    pub fn to_json(&self) -> String {
        // Every variant holds only strings, so serialization can't fail
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","content":{"kind":"internal","message":"event serialization failed"}}"#
                .to_string()
        })
    }

    /// Server-sent events frame: `data: <json>\n\n`.
    pub fn to_sse_frame(&self) -> Bytes {
        Bytes::from(format!("data: {}\n\n", self.to_json()))
    }
}
