//! In-memory bot used by tests across the crate.

use super::client::{ChatBackend, ChatError};
use super::segment::MessageSegment;
use crate::session::SessionHandle;
use async_trait::async_trait;
use std::sync::Mutex;

/// Scripted `ChatBackend` that records every invocation.
#[derive(Default)]
pub struct ScriptedChat {
    start_reply: Option<(String, Vec<MessageSegment>)>,
    continue_reply: Vec<MessageSegment>,
    fail_start: bool,
    expire_sessions: bool,
    started: Mutex<Vec<(String, Option<String>)>>,
    continued: Mutex<Vec<(String, String)>>,
}

impl ScriptedChat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_start(mut self, handle: &str, segments: Vec<MessageSegment>) -> Self {
        self.start_reply = Some((handle.to_string(), segments));
        self
    }

    pub fn on_continue(mut self, segments: Vec<MessageSegment>) -> Self {
        self.continue_reply = segments;
        self
    }

    pub fn fail_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn expire_sessions(mut self) -> Self {
        self.expire_sessions = true;
        self
    }

    pub fn start_calls(&self) -> usize {
        self.started.lock().unwrap().len()
    }

    pub fn continue_calls(&self) -> usize {
        self.continued.lock().unwrap().len()
    }

    pub fn started_with(&self) -> Vec<(String, Option<String>)> {
        self.started.lock().unwrap().clone()
    }

    pub fn continued_with(&self) -> Vec<(String, String)> {
        self.continued.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatBackend for ScriptedChat {
    async fn start_chat(
        &self,
        bot_id: &str,
        prefill: Option<&str>,
    ) -> Result<(SessionHandle, Vec<MessageSegment>), ChatError> {
        self.started
            .lock()
            .unwrap()
            .push((bot_id.to_string(), prefill.map(str::to_string)));

        if self.fail_start {
            return Err(ChatError::UpstreamUnavailable("connection refused".to_string()));
        }
        let (handle, segments) = self
            .start_reply
            .clone()
            .unwrap_or_else(|| ("sess-default".to_string(), Vec::new()));
        Ok((SessionHandle::new(handle), segments))
    }

    async fn continue_chat(
        &self,
        handle: &SessionHandle,
        user_text: &str,
    ) -> Result<Vec<MessageSegment>, ChatError> {
        self.continued
            .lock()
            .unwrap()
            .push((handle.to_string(), user_text.to_string()));

        if self.expire_sessions {
            return Err(ChatError::UpstreamSessionExpired(handle.to_string()));
        }
        Ok(self.continue_reply.clone())
    }
}
