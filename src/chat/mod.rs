//! # Upstream Chat
//!
//! Everything that talks to the remote conversational bot:
//! - **client**: the `ChatBackend` trait and its Typebot implementation
//! - **segment**: bot reply segments (text / audio / unknown) and response parsing
//!
//! `resolve_turn` ties the bot to the session registry: a conversation's first turn
//! starts an upstream session, every later turn continues it.

pub mod client;
pub mod segment;

#[cfg(test)]
pub(crate) mod fake;

pub use client::{ChatBackend, ChatError, TypebotClient};
pub use segment::MessageSegment;

use crate::session::{SessionHandle, SessionLookup, SessionRegistry};
use tracing::{info, warn};

/// Outcome of resolving one client turn against the bot.
#[derive(Debug, Clone)]
pub struct ResolvedTurn {
    pub handle: SessionHandle,
    pub segments: Vec<MessageSegment>,
    /// True when this turn started a new upstream session
    pub started: bool,
}

/// Send one client message to the bot, starting or continuing its session.
///
/// ## Flow:
/// 1. **Lookup**: ask the registry for the conversation's handle
/// 2. **Missing** → `start_chat` and register the returned handle
/// 3. **Existing** → `continue_chat` with the user's message
///
/// On a first turn the message is only forwarded when `prefill_first_message` is set;
/// otherwise the bot's opening messages are the reply.
///
/// An expired session is reported to the caller (never silently restarted) and its
/// registry entry is dropped, so the conversation's next turn starts fresh.
///
/// Callers are expected to hold the conversation's turn lock.
pub async fn resolve_turn(
    registry: &SessionRegistry,
    backend: &dyn ChatBackend,
    bot_id: &str,
    conversation_id: &str,
    message: &str,
    prefill_first_message: bool,
) -> Result<ResolvedTurn, ChatError> {
    match registry.get_or_create(conversation_id) {
        SessionLookup::Existing(handle) => {
            match backend.continue_chat(&handle, message).await {
                Ok(segments) => Ok(ResolvedTurn { handle, segments, started: false }),
                Err(err @ ChatError::UpstreamSessionExpired(_)) => {
                    warn!(conversation_id = %conversation_id, session = %handle, "Upstream session expired");
                    registry.remove(conversation_id);
                    Err(err)
                }
                Err(err) => Err(err),
            }
        }
        SessionLookup::Missing => {
            let prefill = prefill_first_message.then_some(message);
            let (handle, segments) = backend.start_chat(bot_id, prefill).await?;
            registry.set(conversation_id, handle.clone());
            info!(conversation_id = %conversation_id, session = %handle, "Started upstream session");
            Ok(ResolvedTurn { handle, segments, started: true })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::ScriptedChat;
    use super::*;

    #[tokio::test]
    async fn test_first_turn_starts_then_continues() {
        let registry = SessionRegistry::unbounded();
        let bot = ScriptedChat::new()
            .on_start("sess-1", vec![MessageSegment::text("Welcome")])
            .on_continue(vec![MessageSegment::text("Sure")]);

        let first = resolve_turn(&registry, &bot, "bot-1", "conv-1", "hi", false)
            .await
            .unwrap();
        assert!(first.started);
        assert_eq!(first.handle.as_str(), "sess-1");
        assert_eq!(first.segments, vec![MessageSegment::text("Welcome")]);

        let second = resolve_turn(&registry, &bot, "bot-1", "conv-1", "more", false)
            .await
            .unwrap();
        assert!(!second.started);
        assert_eq!(second.segments, vec![MessageSegment::text("Sure")]);

        assert_eq!(bot.start_calls(), 1);
        assert_eq!(bot.continue_calls(), 1);
        assert_eq!(bot.continued_with(), vec![("sess-1".to_string(), "more".to_string())]);
    }

    #[tokio::test]
    async fn test_prefill_forwards_first_message() {
        let registry = SessionRegistry::unbounded();
        let bot = ScriptedChat::new().on_start("sess-1", vec![]);

        resolve_turn(&registry, &bot, "bot-1", "conv-1", "hello", true)
            .await
            .unwrap();
        assert_eq!(bot.started_with(), vec![("bot-1".to_string(), Some("hello".to_string()))]);
    }

    #[tokio::test]
    async fn test_expired_session_is_surfaced_and_forgotten() {
        let registry = SessionRegistry::unbounded();
        registry.set("conv-1", SessionHandle::new("stale"));
        let bot = ScriptedChat::new().expire_sessions();

        let err = resolve_turn(&registry, &bot, "bot-1", "conv-1", "hi", false)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::UpstreamSessionExpired(_)));
        assert_eq!(bot.start_calls(), 0);
        assert_eq!(registry.get_or_create("conv-1"), SessionLookup::Missing);
    }

    #[tokio::test]
    async fn test_failed_start_registers_nothing() {
        let registry = SessionRegistry::unbounded();
        let bot = ScriptedChat::new().fail_start();

        let err = resolve_turn(&registry, &bot, "bot-1", "conv-1", "hi", false)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::UpstreamUnavailable(_)));
        assert!(registry.is_empty());
    }
}
