//! # Decode → Downmix → Resample → Encode
//!
//! The blocking half of the transcoding pipeline. Runs on a `spawn_blocking` worker,
//! reading the remote resource through a synchronous bridge and handing finished
//! chunks to a callback as soon as they are complete.
//!
//! ## Stages per packet:
//! 1. **Decode**: symphonia turns the compressed packet into f32 frames
//! 2. **Downmix**: frames averaged to mono
//! 3. **Resample**: linear interpolation to the output rate
//! 4. **Encode**: 16-bit little-endian PCM, cut into fixed-size chunks
//!
//! The first chunk emitted is always the WAV header.

use super::resample::{downmix, LinearResampler};
use super::wav::{streaming_header, OutputFormat, PcmChunker};
use super::AudioError;
use bytes::Bytes;
use std::io::{ErrorKind, Read};
use std::sync::Mutex;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSourceStream, ReadOnlySource};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Hints for the container probe.
#[derive(Debug, Clone, Default)]
pub struct SourceHint {
    pub extension: Option<String>,
    pub mime_type: Option<String>,
}

/// What a finished decode produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub chunks: usize,
    pub pcm_bytes: usize,
    /// Decoder errors on single packets that were skipped
    pub skipped_packets: usize,
    /// Times the container asked for a new decoder mid-stream
    pub decoder_resets: usize,
    /// True when decoding stopped early because the consumer went away
    pub cancelled: bool,
}

/// Gives a `Read + Send` source the `Sync` bound symphonia's `MediaSource` demands.
///
/// The reader is only ever touched through `&mut self`, so the mutex is never
/// actually contended; `get_mut` skips locking entirely.
struct SyncReader<R>(Mutex<R>);

impl<R: Read> Read for SyncReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.0.get_mut() {
            Ok(reader) => reader.read(buf),
            Err(poisoned) => poisoned.into_inner().read(buf),
        }
    }
}

/// Source read failures come from the network; everything else is a decode problem.
fn classify(err: SymphoniaError) -> AudioError {
    match err {
        SymphoniaError::IoError(e) if e.kind() != ErrorKind::UnexpectedEof => {
            AudioError::ResourceFetch(e.to_string())
        }
        SymphoniaError::IoError(_) => {
            AudioError::Transcode("audio stream ended before any audio could be decoded".to_string())
        }
        other => AudioError::Transcode(other.to_string()),
    }
}

/// Transcode `source` into WAV chunks, calling `emit` for each one in order.
///
/// ## Parameters:
/// - **source**: the raw resource bytes (any container/codec symphonia understands)
/// - **hint**: extension and MIME type used to pick a demuxer faster
/// - **format**: output sample rate and channel count for the header
/// - **chunk_bytes**: size of each PCM chunk (the last one may be shorter)
/// - **emit**: receives each chunk; returning `false` stops decoding (consumer gone)
/// - **cancel**: checked between packets
///
/// ## Errors:
/// - `ResourceFetch` when reading the source fails mid-stream
/// - `Transcode` when the container can't be probed or the codec can't be decoded
pub fn transcode<R, F>(
    source: R,
    hint: &SourceHint,
    format: OutputFormat,
    chunk_bytes: usize,
    emit: F,
    cancel: &CancellationToken,
) -> Result<DecodeStats, AudioError>
where
    R: Read + Send + 'static,
    F: FnMut(Bytes) -> bool,
{
    let media = ReadOnlySource::new(SyncReader(Mutex::new(source)));
    let stream = MediaSourceStream::new(Box::new(media), Default::default());

    let mut probe_hint = Hint::new();
    if let Some(extension) = &hint.extension {
        probe_hint.with_extension(extension);
    }
    if let Some(mime_type) = &hint.mime_type {
        probe_hint.mime_type(mime_type);
    }

    let probed = symphonia::default::get_probe()
        .format(&probe_hint, stream, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(classify)?;

    decode_packets(probed.format, format, chunk_bytes, emit, cancel)
}

/// First decodable track of `reader` and a fresh decoder for it.
fn open_track(reader: &dyn FormatReader) -> Result<(u32, Box<dyn Decoder>), AudioError> {
    let track = reader
        .tracks()
        .iter()
        .find(|track| track.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| AudioError::Transcode("no decodable audio track".to_string()))?;

    let decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(classify)?;

    debug!(track_id = track.id, declared_rate = ?track.codec_params.sample_rate, "Audio track selected");
    Ok((track.id, decoder))
}

fn decode_packets<F>(
    mut reader: Box<dyn FormatReader>,
    format: OutputFormat,
    chunk_bytes: usize,
    mut emit: F,
    cancel: &CancellationToken,
) -> Result<DecodeStats, AudioError>
where
    F: FnMut(Bytes) -> bool,
{
    let (mut track_id, mut decoder) = open_track(&*reader)?;

    let mut stats = DecodeStats::default();
    let mut chunker = PcmChunker::new(chunk_bytes);
    let mut resampler: Option<(u32, LinearResampler)> = None;

    let header = Bytes::copy_from_slice(&streaming_header(format));
    stats.chunks += 1;
    if !emit(header) {
        stats.cancelled = true;
        return Ok(stats);
    }

    loop {
        if cancel.is_cancelled() {
            stats.cancelled = true;
            return Ok(stats);
        }

        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => {
                // Chained stream or new track list: reselect the track, restart the decoder
                (track_id, decoder) = open_track(&*reader)?;
                stats.decoder_resets += 1;
                continue;
            }
            Err(err) => return Err(classify(err)),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(msg)) => {
                // A single corrupt frame; the codec resynchronizes on the next packet
                warn!(error = %msg, "Skipping undecodable audio packet");
                stats.skipped_packets += 1;
                continue;
            }
            Err(err) => return Err(classify(err)),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count();
        if decoded.frames() == 0 || channels == 0 {
            continue;
        }

        let mut samples = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        samples.copy_interleaved_ref(decoded);

        let mono = downmix(samples.samples(), channels);

        let resampled = match &mut resampler {
            Some((rate, resampler)) if *rate == spec.rate => resampler.process(&mono),
            _ => {
                let mut fresh = LinearResampler::new(spec.rate, format.sample_rate);
                let output = fresh.process(&mono);
                resampler = Some((spec.rate, fresh));
                output
            }
        };

        for chunk in chunker.push(&resampled) {
            stats.chunks += 1;
            stats.pcm_bytes += chunk.len();
            if !emit(chunk) {
                stats.cancelled = true;
                return Ok(stats);
            }
        }
    }

    if let Some((_, resampler)) = &mut resampler {
        let tail = resampler.flush();
        for chunk in chunker.push(&tail) {
            stats.chunks += 1;
            stats.pcm_bytes += chunk.len();
            if !emit(chunk) {
                stats.cancelled = true;
                return Ok(stats);
            }
        }
    }

    if let Some(chunk) = chunker.finish() {
        stats.chunks += 1;
        stats.pcm_bytes += chunk.len();
        if !emit(chunk) {
            stats.cancelled = true;
        }
    }

    Ok(stats)
}
