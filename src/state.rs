//! # Application State Management
//!
//! Shared state handed to every HTTP handler through `web::Data<AppState>`.
//!
//! ## What lives here:
//! - **config**: the validated configuration, read-only after startup
//! - **metrics**: request/error counters, active relays, turn outcomes, per-endpoint stats
//! - **sessions**: the conversation → upstream session registry
//! - **chat** / **transcoder**: the injected upstream bot client and audio pipeline
//!
//! ## Key Rust Concepts:
//!
//! ### Arc<dyn Trait>
//! - **Purpose**: share one implementation across all workers without knowing its type
//! - **Why needed**: production uses `TypebotClient` and `AudioPipeline`, tests swap in
//!   scripted fakes; handlers only see the trait
//!
//! ### Arc<RwLock<T>> Pattern
//! - **Arc**: multiple ownership (every worker holds a clone of `AppState`)
//! - **RwLock**: many readers or one writer; metrics are written on every request

use crate::audio::Transcoder;
use crate::chat::ChatBackend;
use crate::config::AppConfig;
use crate::session::SessionRegistry;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// The main application state that's shared across all HTTP request handlers.
///
/// Cloning is cheap: every field is either `Copy` or behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (fixed for the process lifetime)
    pub config: Arc<AppConfig>,

    /// Performance metrics, updated by middleware and by every relay
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,

    /// Conversation id → upstream session handle
    pub sessions: Arc<SessionRegistry>,

    /// Upstream bot API
    pub chat: Arc<dyn ChatBackend>,

    /// Audio segment transcoder
    pub transcoder: Arc<dyn Transcoder>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("sessions", &self.sessions.len())
            .field("uptime_seconds", &self.get_uptime_seconds())
            .finish_non_exhaustive()
    }
}

/// Counters collected across all HTTP requests and relays.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of errors encountered since server start
    pub error_count: u64,

    /// Turns currently streaming to a client
    pub active_relays: u32,

    /// Turns that delivered every segment
    pub turns_completed: u64,

    /// Turns that ended with an error event (or lost their client)
    pub turns_failed: u64,

    /// Detailed metrics for each API endpoint, keyed like "POST /prompt-stream"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

/// Keeps `active_relays` accurate even if a relay task panics.
///
/// Returned by [`AppState::track_relay`]; the counter is decremented on drop.
pub struct ActiveRelay {
    metrics: Arc<RwLock<AppMetrics>>,
}

impl Drop for ActiveRelay {
    fn drop(&mut self) {
        if let Ok(mut metrics) = self.metrics.write() {
            metrics.active_relays = metrics.active_relays.saturating_sub(1);
        }
    }
}

impl AppState {
    pub fn new(
        config: AppConfig,
        sessions: Arc<SessionRegistry>,
        chat: Arc<dyn ChatBackend>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
            sessions,
            chat,
            transcoder,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Increment the total request counter (called by middleware for every request).
    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    /// Increment the total error counter (4xx and 5xx responses).
    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    ///
    /// For streaming endpoints the duration covers handler time up to the response head,
    /// not the whole stream.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();

        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Count a relay as active until the returned guard is dropped.
    pub fn track_relay(&self) -> ActiveRelay {
        self.metrics.write().unwrap().active_relays += 1;
        ActiveRelay {
            metrics: Arc::clone(&self.metrics),
        }
    }

    /// Record how a turn ended.
    pub fn record_turn(&self, completed: bool) {
        let mut metrics = self.metrics.write().unwrap();
        if completed {
            metrics.turns_completed += 1;
        } else {
            metrics.turns_failed += 1;
        }
    }

    /// Copy of the current metrics, so no lock is held while serializing.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics.read().unwrap().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average response time in milliseconds (0.0 before the first request).
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate as a fraction (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
