//! # WAV / PCM Encoding
//!
//! Produces the byte stream the relay sends for audio segments:
//! a 44-byte WAV header followed by signed 16-bit little-endian PCM samples.
//!
//! ## Streaming header:
//! The total length isn't known when the header is written (the source is still being
//! downloaded), so the RIFF and `data` sizes are set to `0xFFFFFFFF`, the same
//! convention ffmpeg uses when writing WAV to a pipe. Players treat it as "read until EOF".

use byteorder::{ByteOrder, LittleEndian};
use bytes::{Bytes, BytesMut};

/// Length of the canonical PCM WAV header.
pub const WAV_HEADER_LEN: usize = 44;

/// Placeholder size for streams of unknown length.
pub const UNKNOWN_SIZE: u32 = 0xFFFF_FFFF;

const BITS_PER_SAMPLE: u16 = 16;
const BYTES_PER_SAMPLE: usize = 2;
const WAVE_FORMAT_PCM: u16 = 1;

/// Output format of the transcoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl OutputFormat {
    /// Mono 8kHz, the telephony format the relay emits by default.
    pub const TELEPHONY: OutputFormat = OutputFormat { sample_rate: 8000, channels: 1 };

    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * self.channels as u32 * BYTES_PER_SAMPLE as u32
    }

    pub fn block_align(&self) -> u16 {
        self.channels * BYTES_PER_SAMPLE as u16
    }
}

/// Build the WAV header for a stream of unknown length.
///
/// ## Layout (all integers little-endian):
/// ```text
/// 0  "RIFF"   4  riff size    8  "WAVE"
/// 12 "fmt "   16 16 (fmt size) 20 1 (PCM)  22 channels
/// 24 sample rate  28 byte rate  32 block align  34 bits per sample
/// 36 "data"   40 data size
/// ```
pub fn streaming_header(format: OutputFormat) -> [u8; WAV_HEADER_LEN] {
    let mut header = [0u8; WAV_HEADER_LEN];

    header[0..4].copy_from_slice(b"RIFF");
    LittleEndian::write_u32(&mut header[4..8], UNKNOWN_SIZE);
    header[8..12].copy_from_slice(b"WAVE");

    header[12..16].copy_from_slice(b"fmt ");
    LittleEndian::write_u32(&mut header[16..20], 16);
    LittleEndian::write_u16(&mut header[20..22], WAVE_FORMAT_PCM);
    LittleEndian::write_u16(&mut header[22..24], format.channels);
    LittleEndian::write_u32(&mut header[24..28], format.sample_rate);
    LittleEndian::write_u32(&mut header[28..32], format.byte_rate());
    LittleEndian::write_u16(&mut header[32..34], format.block_align());
    LittleEndian::write_u16(&mut header[34..36], BITS_PER_SAMPLE);

    header[36..40].copy_from_slice(b"data");
    LittleEndian::write_u32(&mut header[40..44], UNKNOWN_SIZE);

    header
}

/// Convert a float sample in [-1.0, 1.0] to 16-bit PCM, clamping out-of-range input.
pub fn float_to_pcm(sample: f32) -> i16 {
    let scaled = sample * 32768.0;
    scaled.clamp(-32768.0, 32767.0) as i16
}

/// Splits an unbounded run of PCM samples into fixed-size byte chunks.
///
/// ## Usage:
/// Feed decoded (already mono, already resampled) float samples with `push`, collect the
/// full chunks it returns, and call `finish` at end of stream for the remainder.
pub struct PcmChunker {
    chunk_bytes: usize,
    pending: BytesMut,
}

impl PcmChunker {
    /// `chunk_bytes` must be even so a chunk never splits a sample.
    pub fn new(chunk_bytes: usize) -> Self {
        debug_assert!(chunk_bytes > 0 && chunk_bytes % BYTES_PER_SAMPLE == 0);
        Self {
            chunk_bytes,
            pending: BytesMut::with_capacity(chunk_bytes * 2),
        }
    }

    /// Encode samples and return every chunk that is now complete.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Bytes> {
        let start = self.pending.len();
        self.pending.resize(start + samples.len() * BYTES_PER_SAMPLE, 0);

        for (i, &sample) in samples.iter().enumerate() {
            let offset = start + i * BYTES_PER_SAMPLE;
            LittleEndian::write_i16(&mut self.pending[offset..offset + BYTES_PER_SAMPLE], float_to_pcm(sample));
        }

        let mut chunks = Vec::new();
        while self.pending.len() >= self.chunk_bytes {
            chunks.push(self.pending.split_to(self.chunk_bytes).freeze());
        }
        chunks
    }

    /// Flush whatever is left (a final, shorter chunk), if anything.
    pub fn finish(&mut self) -> Option<Bytes> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.pending.split().freeze())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streaming_header_layout() {
        let header = streaming_header(OutputFormat::TELEPHONY);

        assert_eq!(&header[0..4], b"RIFF");
        assert_eq!(LittleEndian::read_u32(&header[4..8]), UNKNOWN_SIZE);
        assert_eq!(&header[8..12], b"WAVE");
        assert_eq!(&header[12..16], b"fmt ");
        assert_eq!(LittleEndian::read_u32(&header[16..20]), 16);
        assert_eq!(LittleEndian::read_u16(&header[20..22]), 1);     // PCM
        assert_eq!(LittleEndian::read_u16(&header[22..24]), 1);     // mono
        assert_eq!(LittleEndian::read_u32(&header[24..28]), 8000);  // sample rate
        assert_eq!(LittleEndian::read_u32(&header[28..32]), 16000); // byte rate
        assert_eq!(LittleEndian::read_u16(&header[32..34]), 2);     // block align
        assert_eq!(LittleEndian::read_u16(&header[34..36]), 16);    // bits per sample
        assert_eq!(&header[36..40], b"data");
        assert_eq!(LittleEndian::read_u32(&header[40..44]), UNKNOWN_SIZE);
    }

    #[test]
    fn test_float_to_pcm_clamps() {
        assert_eq!(float_to_pcm(0.0), 0);
        assert_eq!(float_to_pcm(0.5), 16384);
        assert_eq!(float_to_pcm(-1.0), -32768);
        assert_eq!(float_to_pcm(1.0), 32767);
        assert_eq!(float_to_pcm(3.0), 32767);
        assert_eq!(float_to_pcm(-3.0), -32768);
    }

    #[test]
    fn test_chunker_splits_and_flushes() {
        let mut chunker = PcmChunker::new(4); // two samples per chunk

        assert!(chunker.push(&[0.5]).is_empty());
        let chunks = chunker.push(&[-0.5, 0.0, 0.25, 1.0]);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.len() == 4));

        // Samples come out little-endian, in order
        assert_eq!(LittleEndian::read_i16(&chunks[0][0..2]), 16384);
        assert_eq!(LittleEndian::read_i16(&chunks[0][2..4]), -16384);
        assert_eq!(LittleEndian::read_i16(&chunks[1][0..2]), 0);
        assert_eq!(LittleEndian::read_i16(&chunks[1][2..4]), 8192);

        let rest = chunker.finish().unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(LittleEndian::read_i16(&rest), 32767);
        assert!(chunker.finish().is_none());
    }
}
