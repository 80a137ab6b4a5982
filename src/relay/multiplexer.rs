//! # Stream Multiplexer
//!
//! Writes one turn's segments to the client sink, strictly in order:
//! - **Text** → one `text` event
//! - **Audio** → one `audio` event per transcoded chunk; the whole chunk stream is
//!   drained before the next segment starts
//! - **Unknown** → skipped
//!
//! The first audio failure aborts the turn. Segments after it are never sent.

use super::event::RelayEvent;
use crate::audio::{AudioError, Transcoder};
use crate::chat::{ChatError, MessageSegment};
use futures_util::StreamExt;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Lifecycle of a single client turn.
///
/// ```text
/// Received → SessionResolved → SegmentsFetched → Relaying
///     → (TextSent | AudioTranscoding → AudioSent)* → Closed
/// ```
/// Any non-terminal state may move to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Received,
    SessionResolved,
    SegmentsFetched,
    Relaying,
    TextSent,
    AudioTranscoding,
    AudioSent,
    Closed,
    Failed,
}

impl TurnState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TurnState::Closed | TurnState::Failed)
    }

    pub fn can_transition_to(self, next: TurnState) -> bool {
        use TurnState::*;

        if next == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Received, SessionResolved)
                | (SessionResolved, SegmentsFetched)
                | (SegmentsFetched, Relaying)
                | (Relaying | TextSent | AudioSent, TextSent | AudioTranscoding | Closed)
                | (AudioTranscoding, AudioSent)
        )
    }
}

/// Tracks and logs a turn's state transitions.
#[derive(Debug)]
pub struct TurnTracker {
    conversation_id: String,
    state: TurnState,
}

impl TurnTracker {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            state: TurnState::Received,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn transition(&mut self, next: TurnState) {
        if !self.state.can_transition_to(next) {
            warn!(
                conversation_id = %self.conversation_id,
                from = ?self.state,
                to = ?next,
                "Unexpected turn state transition"
            );
        }
        debug!(conversation_id = %self.conversation_id, from = ?self.state, to = ?next, "Turn state");
        self.state = next;
    }
}

/// What one relay run wrote to the client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelaySummary {
    pub text_events: usize,
    pub audio_segments: usize,
    pub audio_chunks: usize,
    pub skipped_segments: usize,
}

/// Reasons a turn ends before its last segment is delivered.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error("Client disconnected before the reply was complete")]
    ClientGone,
}

impl RelayError {
    /// Wire name used in the trailing `error` event.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Chat(err) => err.kind(),
            RelayError::Audio(err) => err.kind(),
            RelayError::ClientGone => "client_gone",
        }
    }
}

async fn send(sink: &mpsc::Sender<RelayEvent>, event: RelayEvent) -> Result<(), RelayError> {
    sink.send(event).await.map_err(|_| RelayError::ClientGone)
}

/// Relay `segments` into `sink`, one at a time.
///
/// ## Errors:
/// - `Audio`: an audio segment failed to fetch or transcode; nothing after it is sent
/// - `ClientGone`: the sink was closed (the client disconnected)
///
/// The tracker must be in `SegmentsFetched`. It ends in `Closed` on success; on error the
/// caller decides how the turn fails.
pub async fn relay(
    segments: &[MessageSegment],
    transcoder: &dyn Transcoder,
    sink: &mpsc::Sender<RelayEvent>,
    turn: &mut TurnTracker,
) -> Result<RelaySummary, RelayError> {
    let mut summary = RelaySummary::default();
    turn.transition(TurnState::Relaying);

    for (index, segment) in segments.iter().enumerate() {
        match segment {
            MessageSegment::Text { markdown } => {
                send(sink, RelayEvent::Text(markdown.clone())).await?;
                summary.text_events += 1;
                turn.transition(TurnState::TextSent);
            }
            MessageSegment::Audio { url } => {
                turn.transition(TurnState::AudioTranscoding);
                let mut chunks = transcoder.transcode(url);
                let mut sent = 0usize;

                while let Some(item) = chunks.next().await {
                    let chunk = item.map_err(|err| {
                        error!(
                            conversation_id = %turn.conversation_id,
                            segment_index = index,
                            url = %url,
                            chunks = sent,
                            error = %err,
                            "Audio segment failed"
                        );
                        RelayError::Audio(err)
                    })?;
                    send(sink, RelayEvent::Audio(chunk)).await?;
                    sent += 1;
                }

                debug!(
                    conversation_id = %turn.conversation_id,
                    segment_index = index,
                    chunks = sent,
                    "Audio segment relayed"
                );
                summary.audio_segments += 1;
                summary.audio_chunks += sent;
                turn.transition(TurnState::AudioSent);
            }
            MessageSegment::Unknown { kind } => {
                warn!(
                    conversation_id = %turn.conversation_id,
                    segment_index = index,
                    kind = %kind,
                    "Skipping unsupported segment"
                );
                summary.skipped_segments += 1;
            }
        }
    }

    turn.transition(TurnState::Closed);
    Ok(summary)
}
