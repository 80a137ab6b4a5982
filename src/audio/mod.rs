//! # Audio Transcoding Module
//!
//! Converts audio segments referenced by the chat backend into a telephony-friendly
//! stream: WAV header first, then signed 16-bit little-endian mono PCM at 8kHz.
//!
//! ## Key Components:
//! - **Fetch**: opens the remote resource as a byte stream (`fetch`)
//! - **Decoder**: probes the container and decodes packets with symphonia (`decoder`)
//! - **Resample**: channel downmix and linear rate conversion (`resample`)
//! - **WAV**: streaming header and PCM chunking (`wav`)
//! - **Pipeline**: ties the above together behind the `Transcoder` trait (`pipeline`)
//!
//! ## Output Format:
//! - **Sample Rate**: 8kHz (configurable)
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono
//! - **Encoding**: Little-endian signed integers

pub mod decoder;     // Container probe and packet decoding
pub mod fetch;       // HTTP resource fetch
pub mod pipeline;    // Transcoder trait and the network-backed implementation
pub mod resample;    // Downmix and sample-rate conversion
pub mod wav;         // WAV header and PCM chunking

#[cfg(test)]
pub(crate) mod fake;

use thiserror::Error;

pub use pipeline::{AudioPipeline, Transcoder};

/// Failures while turning an audio locator into PCM.
#[derive(Debug, Clone, Error)]
pub enum AudioError {
    /// The resource could not be fetched, or stopped arriving mid-stream
    #[error("Failed to fetch audio resource: {0}")]
    ResourceFetch(String),

    /// The bytes arrived but could not be decoded or converted
    #[error("Failed to transcode audio: {0}")]
    Transcode(String),
}

impl AudioError {
    /// Wire name used in relay error events.
    pub fn kind(&self) -> &'static str {
        match self {
            AudioError::ResourceFetch(_) => "resource_fetch_error",
            AudioError::Transcode(_) => "transcode_error",
        }
    }
}
