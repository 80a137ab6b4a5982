//! # Session Registry
//!
//! Process-wide store from conversation identifier to upstream session handle.
//!
//! ## Entry Lifecycle:
//! 1. **Missing**: first turn for a conversation; the chat service starts an upstream
//!    session and registers the handle with `set`
//! 2. **Live**: later turns find the handle and continue that session
//! 3. **Evicted**: idle longer than the TTL, pushed out by the capacity bound, or
//!    removed after the upstream reported the session expired
//!
//! ## Concurrency:
//! Lookups and inserts take a short `RwLock` critical section and never hold it across
//! an `.await`. Overlapping turns for one conversation are serialized separately with
//! `turn_lock`, so the lookup → start → set sequence can't race into two upstream sessions.

use super::SessionHandle;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::OwnedMutexGuard;

/// Result of looking a conversation up in the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionLookup {
    /// A live handle exists; continue that upstream session
    Existing(SessionHandle),
    /// No handle yet; the caller must start a session and `set` it
    Missing,
}

/// One registry entry.
#[derive(Debug, Clone)]
struct SessionEntry {
    handle: SessionHandle,
    /// When the upstream session was started (reported in summaries)
    created_at: DateTime<Utc>,
    /// Monotonic time of the last lookup or insert (drives TTL and LRU eviction)
    last_used: Instant,
}

/// Maps conversation identifiers to upstream session handles.
///
/// ## Bounds:
/// - **ttl**: entries idle for longer are removed by `evict_expired`
/// - **max_sessions**: inserting into a full registry evicts the least recently used entry
///
/// Both bounds are optional; with neither set the registry grows for the lifetime of the
/// process, one entry per conversation ever seen.
pub struct SessionRegistry {
    entries: RwLock<HashMap<String, SessionEntry>>,

    /// Per-conversation turn locks, created on demand
    turn_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,

    ttl: Option<Duration>,

    /// 0 means unbounded
    max_sessions: usize,
}

impl SessionRegistry {
    /// Create a registry with optional TTL and capacity bounds.
    pub fn new(ttl: Option<Duration>, max_sessions: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            turn_locks: Mutex::new(HashMap::new()),
            ttl,
            max_sessions,
        }
    }

    /// A registry with no eviction at all.
    pub fn unbounded() -> Self {
        Self::new(None, 0)
    }

    /// Look up the session handle for a conversation.
    ///
    /// ## Returns:
    /// - **Existing(handle)**: a live entry was found (its idle timer is reset)
    /// - **Missing**: no entry, or the entry outlived its TTL and was dropped
    pub fn get_or_create(&self, conversation_id: &str) -> SessionLookup {
        let mut entries = self.entries.write().unwrap();
        let now = Instant::now();

        let expired = match entries.get_mut(conversation_id) {
            Some(entry) if !self.is_expired(entry, now) => {
                entry.last_used = now;
                return SessionLookup::Existing(entry.handle.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.remove(conversation_id);
        }
        SessionLookup::Missing
    }

    /// Register the handle of a freshly started session.
    ///
    /// Replaces any previous handle for the same conversation. When the registry is full
    /// the least recently used entry is evicted first.
    pub fn set(&self, conversation_id: &str, handle: SessionHandle) {
        let mut entries = self.entries.write().unwrap();

        if self.max_sessions > 0
            && !entries.contains_key(conversation_id)
            && entries.len() >= self.max_sessions
        {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(id, _)| id.clone());

            if let Some(oldest) = oldest {
                entries.remove(&oldest);
                tracing::debug!(conversation_id = %oldest, "Evicted least recently used session");
            }
        }

        entries.insert(
            conversation_id.to_string(),
            SessionEntry {
                handle,
                created_at: Utc::now(),
                last_used: Instant::now(),
            },
        );
    }

    /// Forget a conversation's session (used when the upstream reports it expired).
    pub fn remove(&self, conversation_id: &str) -> bool {
        self.entries.write().unwrap().remove(conversation_id).is_some()
    }

    /// Remove every entry idle for longer than the TTL.
    ///
    /// Also drops turn locks nobody is holding or waiting on, so the lock map is bounded
    /// by the number of in-flight turns plus live sessions.
    ///
    /// ## Returns:
    /// Number of session entries removed.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let removed = {
            let mut entries = self.entries.write().unwrap();
            let before = entries.len();
            entries.retain(|_, entry| !self.is_expired(entry, now));
            before - entries.len()
        };

        let entries = self.entries.read().unwrap();
        self.turn_locks
            .lock()
            .unwrap()
            .retain(|id, lock| Arc::strong_count(lock) > 1 || entries.contains_key(id));

        removed
    }

    /// Acquire the turn lock for a conversation.
    ///
    /// At most one turn per conversation identifier runs at a time; a second request for
    /// the same conversation waits here until the first one's relay finishes.
    pub async fn turn_lock(&self, conversation_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.turn_locks.lock().unwrap();
            locks
                .entry(conversation_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Number of stored sessions (including expired ones not yet swept).
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }

    /// Snapshot for the health endpoints.
    pub fn summary(&self) -> SessionRegistrySummary {
        let entries = self.entries.read().unwrap();
        SessionRegistrySummary {
            total_sessions: entries.len(),
            max_sessions: self.max_sessions,
            ttl_secs: self.ttl.map(|ttl| ttl.as_secs()).unwrap_or(0),
            oldest_session_started_at: entries.values().map(|entry| entry.created_at).min(),
        }
    }

    fn is_expired(&self, entry: &SessionEntry, now: Instant) -> bool {
        match self.ttl {
            Some(ttl) => now.duration_since(entry.last_used) > ttl,
            None => false,
        }
    }
}

/// Summary of registry state.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionRegistrySummary {
    pub total_sessions: usize,
    pub max_sessions: usize,
    pub ttl_secs: u64,
    pub oldest_session_started_at: Option<DateTime<Utc>>,
}
