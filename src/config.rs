//! # Configuration Management
//!
//! This module handles loading and managing the relay configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Serialization/deserialization library for converting between Rust structs and data formats
//! - **derive macros**: Automatically generate code for common traits (Debug, Clone, Serialize, Deserialize)
//! - **Result<T, E>**: Error handling that forces you to handle potential failures
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Deployment variables (HOST, PORT, TYPEBOT_PUBLIC_ID, TYPEBOT_BASE_URL)
//! 2. Environment variables (APP_SERVER__PORT, APP_UPSTREAM__BOT_ID, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use anyhow::Result;              // Better error handling with context
use serde::{Deserialize, Serialize};  // For converting to/from TOML, JSON, etc.
use std::env;                    // For reading environment variables
use std::time::Duration;

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Each collaborator (HTTP server, upstream bot API, audio pipeline, session store,
/// relay channel) gets its own group so it can be handed only what it needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub audio: AudioConfig,
    pub sessions: SessionsConfig,
    pub relay: RelayConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,  // u16 = unsigned 16-bit integer (0-65535), perfect for port numbers
}

/// Remote conversational-bot API settings.
///
/// ## Fields:
/// - `base_url`: Root of the Typebot-compatible API (no trailing `/api/v1`)
/// - `bot_id`: Public bot identifier, used only to start new sessions
/// - `request_timeout_secs`: Upper bound for a single start/continue call
/// - `prefill_first_message`: Forward the first user message with the start call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub bot_id: String,
    pub request_timeout_secs: u64,
    pub prefill_first_message: bool,
}

/// Audio transcoding pipeline settings.
///
/// ## Output format:
/// The pipeline always produces 16-bit little-endian PCM in a WAV container.
/// `sample_rate` and `channels` describe that output; telephony wants 8kHz mono.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Size of each emitted chunk in bytes (must hold whole 16-bit samples)
    pub chunk_bytes: usize,
    pub connect_timeout_secs: u64,
    /// Longest silence allowed between two chunks before the fetch is abandoned
    pub idle_timeout_secs: u64,
    /// Bounded channel between the blocking decoder and the relay loop
    pub channel_capacity: usize,
}

/// Session registry bounds.
///
/// Setting `ttl_secs` or `max_sessions` to 0 disables that bound.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    pub ttl_secs: u64,
    pub max_sessions: usize,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Number of serialized events buffered between the relay task and the response body
    pub channel_capacity: usize,
}

/// Provides default configuration values.
///
/// ## Why defaults matter:
/// Default values ensure the application can start even if no configuration file exists.
/// They also serve as documentation of reasonable starting values.
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 6005,
            },
            upstream: UpstreamConfig {
                base_url: "https://typebot.io".to_string(),
                bot_id: String::new(),  // Must be supplied by the deployment
                request_timeout_secs: 30,
                prefill_first_message: false,
            },
            audio: AudioConfig {
                sample_rate: 8000,
                channels: 1,
                chunk_bytes: 3200,      // 200ms of 8kHz mono 16-bit audio
                connect_timeout_secs: 10,
                idle_timeout_secs: 30,
                channel_capacity: 16,
            },
            sessions: SessionsConfig {
                ttl_secs: 3600,
                max_sessions: 10_000,
                sweep_interval_secs: 60,
            },
            relay: RelayConfig {
                channel_capacity: 64,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle the plain variables used by deployment platforms and existing relay setups
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_UPSTREAM__BOT_ID=my-bot`: Override bot identifier
    /// - `APP_AUDIO__CHUNK_BYTES=1600`: Override chunk size
    /// - `TYPEBOT_PUBLIC_ID=my-bot`: Same as APP_UPSTREAM__BOT_ID
    ///
    /// The double underscore separates sections because field names contain single ones.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(bot_id) = env::var("TYPEBOT_PUBLIC_ID") {
            settings = settings.set_override("upstream.bot_id", bot_id)?;
        }

        if let Ok(base_url) = env::var("TYPEBOT_BASE_URL") {
            settings = settings.set_override("upstream.base_url", base_url)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - A bot identifier and base URL are present
    /// - Audio output can actually be produced (non-zero rate, whole samples per chunk)
    /// - Channels are bounded (a zero-capacity tokio channel panics)
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.upstream.bot_id.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "Bot identifier is required (set TYPEBOT_PUBLIC_ID or upstream.bot_id)"
            ));
        }

        if self.upstream.base_url.trim().is_empty() {
            return Err(anyhow::anyhow!("Upstream base URL cannot be empty"));
        }

        if self.audio.sample_rate == 0 {
            return Err(anyhow::anyhow!("Audio sample rate must be greater than 0"));
        }

        if self.audio.channels != 1 {
            return Err(anyhow::anyhow!("Only mono audio output is supported"));
        }

        if self.audio.chunk_bytes == 0 || self.audio.chunk_bytes % 2 != 0 {
            return Err(anyhow::anyhow!("Audio chunk size must be a positive even number of bytes"));
        }

        if self.audio.idle_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Audio idle timeout must be greater than 0"));
        }

        if self.audio.channel_capacity == 0 || self.relay.channel_capacity == 0 {
            return Err(anyhow::anyhow!("Channel capacities must be greater than 0"));
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream.request_timeout_secs)
    }

    /// `None` when the TTL bound is disabled.
    pub fn session_ttl(&self) -> Option<Duration> {
        (self.sessions.ttl_secs > 0).then(|| Duration::from_secs(self.sessions.ttl_secs))
    }
}
