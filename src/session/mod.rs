//! # Conversation Sessions
//!
//! Maps client-chosen conversation identifiers to the upstream bot's session handles.
//! The registry is created once at startup and injected into request handlers through
//! `AppState`, so every turn for the same conversation continues the same bot session.

pub mod registry;     // Handle storage, eviction and per-conversation turn locks

pub use registry::{SessionLookup, SessionRegistry};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque session identifier issued by the upstream bot API.
///
/// ## Rust Concepts:
/// - **Newtype pattern**: wraps a `String` so a handle can't be confused with a
///   conversation id (both are plain strings on the wire)
/// - **#[serde(transparent)]**: serializes exactly like the inner string
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionHandle(String);

impl SessionHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
