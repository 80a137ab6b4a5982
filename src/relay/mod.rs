//! # Message Relay
//!
//! Drives one client turn from request to closed stream:
//!
//! ```text
//! turn lock ─► resolve_turn (start/continue upstream) ─► relay segments ─► close
//!                         │                                   │
//!                         └──────── error ────────────────────┴─► trailing `error` event
//! ```
//!
//! - **event**: the wire events (`text`, `audio`, `error`) and their SSE framing
//! - **multiplexer**: ordered dispatch of segments, turn state machine, `RelayError`

pub mod event;
pub mod multiplexer;

pub use event::RelayEvent;
pub use multiplexer::{relay, RelayError, RelaySummary, TurnState, TurnTracker};

use crate::chat::resolve_turn;
use crate::state::AppState;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Run one full turn, writing events into `sink`.
///
/// Overlapping turns for the same conversation wait for each other on the registry's
/// turn lock. Any failure after the stream opened is reported as one trailing `error`
/// event (unless the client is already gone); the stream ends when `sink` is dropped.
pub async fn run_turn(
    state: AppState,
    conversation_id: String,
    message: String,
    sink: mpsc::Sender<RelayEvent>,
) -> Result<RelaySummary, RelayError> {
    let _active = state.track_relay();
    let started = Instant::now();
    let mut turn = TurnTracker::new(&conversation_id);

    let outcome = drive(&state, &conversation_id, &message, &sink, &mut turn).await;

    match &outcome {
        Ok(summary) => {
            info!(
                conversation_id = %conversation_id,
                text_events = summary.text_events,
                audio_segments = summary.audio_segments,
                chunks = summary.audio_chunks,
                duration_ms = started.elapsed().as_millis() as u64,
                "Turn completed"
            );
            state.record_turn(true);
        }
        Err(err) => {
            turn.transition(TurnState::Failed);
            error!(
                conversation_id = %conversation_id,
                kind = err.kind(),
                error = %err,
                duration_ms = started.elapsed().as_millis() as u64,
                "Turn failed"
            );
            if !matches!(err, RelayError::ClientGone) {
                let _ = sink.send(RelayEvent::error(err.kind(), err.to_string())).await;
            }
            state.record_turn(false);
        }
    }

    outcome
}

async fn drive(
    state: &AppState,
    conversation_id: &str,
    message: &str,
    sink: &mpsc::Sender<RelayEvent>,
    turn: &mut TurnTracker,
) -> Result<RelaySummary, RelayError> {
    let _turn_guard = state.sessions.turn_lock(conversation_id).await;
    let upstream = &state.config().upstream;

    let resolved = resolve_turn(
        &state.sessions,
        state.chat.as_ref(),
        &upstream.bot_id,
        conversation_id,
        message,
        upstream.prefill_first_message,
    )
    .await?;

    turn.transition(TurnState::SessionResolved);
    debug!(
        conversation_id = %conversation_id,
        session = %resolved.handle,
        started = resolved.started,
        segments = resolved.segments.len(),
        "Upstream reply received"
    );
    turn.transition(TurnState::SegmentsFetched);

    relay(&resolved.segments, state.transcoder.as_ref(), sink, turn).await
}
