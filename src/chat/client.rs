//! # Upstream Chat Client
//!
//! Translates the relay's two chat operations into calls against a Typebot-compatible
//! bot API:
//! - **start**: `POST {base}/api/v1/typebots/{bot_id}/startChat`
//! - **continue**: `POST {base}/api/v1/sessions/{session_id}/continueChat`
//!
//! Both answer with `{"sessionId": ..., "messages": [...]}`. Nothing is retried: every
//! failure is returned to the caller and ends that turn.

use super::segment::{ChatResponse, MessageSegment};
use crate::session::SessionHandle;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Failures of the upstream chat API.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Network error, timeout, or non-success status
    #[error("Upstream chat API unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Response missing `sessionId`/`messages` or otherwise malformed
    #[error("Unexpected upstream response: {0}")]
    UpstreamProtocolError(String),

    /// Upstream no longer recognizes the session handle
    #[error("Upstream session {0} has expired")]
    UpstreamSessionExpired(String),
}

impl ChatError {
    /// Wire name used in `error` relay events.
    pub fn kind(&self) -> &'static str {
        match self {
            ChatError::UpstreamUnavailable(_) => "upstream_unavailable",
            ChatError::UpstreamProtocolError(_) => "upstream_protocol_error",
            ChatError::UpstreamSessionExpired(_) => "upstream_session_expired",
        }
    }
}

/// Operations the relay needs from the bot API.
///
/// ## Why a trait:
/// Handlers hold an `Arc<dyn ChatBackend>` from `AppState`, so tests can swap in an
/// in-memory bot and count how often each operation was invoked.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Start a new upstream session, optionally seeding it with a first user message.
    async fn start_chat(
        &self,
        bot_id: &str,
        prefill: Option<&str>,
    ) -> Result<(SessionHandle, Vec<MessageSegment>), ChatError>;

    /// Send a user message on an existing session.
    async fn continue_chat(
        &self,
        handle: &SessionHandle,
        user_text: &str,
    ) -> Result<Vec<MessageSegment>, ChatError>;
}

/// reqwest-backed client for Typebot's public chat API.
#[derive(Debug, Clone)]
pub struct TypebotClient {
    http: reqwest::Client,
    base_url: String,
}

impl TypebotClient {
    /// Create a client whose every request is bounded by `request_timeout`.
    pub fn new(base_url: &str, request_timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn start_url(&self, bot_id: &str) -> String {
        format!("{}/api/v1/typebots/{}/startChat", self.base_url, bot_id)
    }

    fn continue_url(&self, handle: &SessionHandle) -> String {
        format!("{}/api/v1/sessions/{}/continueChat", self.base_url, handle)
    }

    async fn post(&self, url: &str, body: &Value) -> Result<reqwest::Response, ChatError> {
        debug!(url = %url, "Calling upstream chat API");
        self.http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| ChatError::UpstreamUnavailable(e.to_string()))
    }

    async fn parse_body(response: reqwest::Response) -> Result<ChatResponse, ChatError> {
        response
            .json::<ChatResponse>()
            .await
            .map_err(|e| ChatError::UpstreamProtocolError(format!("invalid JSON body: {}", e)))
    }
}

/// Request body shared by both operations.
fn chat_body(message: Option<&str>) -> Value {
    let mut body = json!({ "textBubbleContentFormat": "markdown" });
    if let Some(text) = message {
        body["message"] = json!({ "type": "text", "text": text });
    }
    body
}

/// Whether a failed `continueChat` status means the session is gone.
///
/// Typebot answers 404 for unknown sessions; 410 and a 400 that says "expired" are
/// treated the same way.
fn is_session_expired(status: StatusCode, body: &str) -> bool {
    status == StatusCode::NOT_FOUND
        || status == StatusCode::GONE
        || (status == StatusCode::BAD_REQUEST && body.to_ascii_lowercase().contains("expired"))
}

#[async_trait]
impl ChatBackend for TypebotClient {
    async fn start_chat(
        &self,
        bot_id: &str,
        prefill: Option<&str>,
    ) -> Result<(SessionHandle, Vec<MessageSegment>), ChatError> {
        let response = self.post(&self.start_url(bot_id), &chat_body(prefill)).await?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = %status.as_u16(), bot_id = %bot_id, "startChat rejected");
            return Err(ChatError::UpstreamUnavailable(format!(
                "startChat returned status {}",
                status.as_u16()
            )));
        }

        let body = Self::parse_body(response).await?;
        let session_id = body
            .session_id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ChatError::UpstreamProtocolError("response has no sessionId".to_string()))?;

        Ok((SessionHandle::new(session_id), body.into_segments()?))
    }

    async fn continue_chat(
        &self,
        handle: &SessionHandle,
        user_text: &str,
    ) -> Result<Vec<MessageSegment>, ChatError> {
        let response = self
            .post(&self.continue_url(handle), &chat_body(Some(user_text)))
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            if is_session_expired(status, &text) {
                return Err(ChatError::UpstreamSessionExpired(handle.to_string()));
            }
            warn!(status = %status.as_u16(), session = %handle, "continueChat rejected");
            return Err(ChatError::UpstreamUnavailable(format!(
                "continueChat returned status {}",
                status.as_u16()
            )));
        }

        Self::parse_body(response).await?.into_segments()
    }
}
