//! # Audio Transcoding Pipeline
//!
//! Turns an audio URL into a lazy stream of WAV chunks.
//!
//! ## Architecture:
//! ```text
//!  fetch task (async)          decoder worker (spawn_blocking)        relay loop
//!  GET url ──► StreamReader ──► SyncIoBridge ──► transcode() ──► mpsc ──► ChunkStream
//! ```
//! - The channel between the worker and the consumer is bounded, so a slow client
//!   slows down decoding instead of buffering the whole resource.
//! - Dropping the `ChunkStream` cancels the worker: the response body ends, the
//!   channel closes, and the worker stops at the next read or packet.
//! - A consumer waiting longer than the idle timeout for the next chunk gets a
//!   `ResourceFetch` error, the worker is cancelled and the stream ends.
//! - Socket reads on the audio client time out after the idle timeout as well.

use super::decoder::{self, SourceHint};
use super::fetch;
use super::wav::OutputFormat;
use super::AudioError;
use crate::config::AudioConfig;
use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::io::SyncIoBridge;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info};

/// Ordered chunks of one audio segment. Ends after the last chunk or the first error.
pub type ChunkStream = BoxStream<'static, Result<Bytes, AudioError>>;

/// Converts an audio resource locator into a chunk stream.
///
/// ## Contract:
/// - the returned stream is lazy and not restartable; every call fetches afresh
/// - chunks arrive in order, the first one being the WAV header
/// - at most one error is yielded, and nothing follows it
pub trait Transcoder: Send + Sync {
    fn transcode(&self, locator: &str) -> ChunkStream;
}

/// Network-backed transcoder: reqwest fetch + symphonia decode.
#[derive(Debug, Clone)]
pub struct AudioPipeline {
    http: reqwest::Client,
    format: OutputFormat,
    chunk_bytes: usize,
    idle_timeout: Duration,
    channel_capacity: usize,
}

impl AudioPipeline {
    pub fn new(config: &AudioConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .read_timeout(Duration::from_secs(config.idle_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            format: OutputFormat {
                sample_rate: config.sample_rate,
                channels: config.channels,
            },
            chunk_bytes: config.chunk_bytes,
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
            channel_capacity: config.channel_capacity,
        })
    }

    /// Override the idle timeout (mostly useful in tests).
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }
}

impl Transcoder for AudioPipeline {
    fn transcode(&self, locator: &str) -> ChunkStream {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let cancel = CancellationToken::new();

        tokio::spawn(run(
            self.http.clone(),
            locator.to_string(),
            self.format,
            self.chunk_bytes,
            tx,
            cancel.clone(),
        ));

        chunk_stream(rx, self.idle_timeout, cancel.drop_guard())
    }
}

/// Fetch, then decode on a blocking worker, forwarding everything into `tx`.
async fn run(
    http: reqwest::Client,
    locator: String,
    format: OutputFormat,
    chunk_bytes: usize,
    tx: mpsc::Sender<Result<Bytes, AudioError>>,
    cancel: CancellationToken,
) {
    let source = tokio::select! {
        _ = cancel.cancelled() => return,
        opened = fetch::open(&http, &locator, &cancel) => opened,
    };

    let source = match source {
        Ok(source) => source,
        Err(err) => {
            error!(locator = %locator, error = %err, "Audio fetch failed");
            let _ = tx.send(Err(err)).await;
            return;
        }
    };

    let hint = SourceHint {
        extension: source.extension,
        mime_type: source.mime_type,
    };
    // The bridge captures the current runtime handle, so it must be built here
    let reader = SyncIoBridge::new(source.reader);
    let worker_tx = tx.clone();
    let worker_cancel = cancel.clone();

    let worker = tokio::task::spawn_blocking(move || {
        decoder::transcode(
            reader,
            &hint,
            format,
            chunk_bytes,
            |chunk| worker_tx.blocking_send(Ok(chunk)).is_ok(),
            &worker_cancel,
        )
    });

    match worker.await {
        Ok(Ok(stats)) => {
            info!(
                locator = %locator,
                chunks = stats.chunks,
                pcm_bytes = stats.pcm_bytes,
                skipped_packets = stats.skipped_packets,
                decoder_resets = stats.decoder_resets,
                cancelled = stats.cancelled,
                "Audio transcoded"
            );
        }
        Ok(Err(err)) => {
            error!(locator = %locator, error = %err, "Audio transcoding failed");
            let _ = tx.send(Err(err)).await;
        }
        Err(join_err) => {
            error!(locator = %locator, error = %join_err, "Audio decoder worker crashed");
            let _ = tx
                .send(Err(AudioError::Transcode(format!("decoder worker failed: {}", join_err))))
                .await;
        }
    }
}

struct ChunkState {
    rx: mpsc::Receiver<Result<Bytes, AudioError>>,
    idle_timeout: Duration,
    /// Cancels the worker when dropped; released as soon as the stream finishes
    cancel_on_drop: Option<DropGuard>,
}

impl ChunkState {
    fn finish(&mut self) {
        self.cancel_on_drop = None;
    }

    fn finished(&self) -> bool {
        self.cancel_on_drop.is_none()
    }
}

/// Pull-based view over the worker channel with an idle timeout.
fn chunk_stream(
    rx: mpsc::Receiver<Result<Bytes, AudioError>>,
    idle_timeout: Duration,
    guard: DropGuard,
) -> ChunkStream {
    let state = ChunkState {
        rx,
        idle_timeout,
        cancel_on_drop: Some(guard),
    };

    stream::unfold(state, |mut state| async move {
        if state.finished() {
            return None;
        }

        match tokio::time::timeout(state.idle_timeout, state.rx.recv()).await {
            Ok(Some(Ok(chunk))) => Some((Ok(chunk), state)),
            Ok(Some(Err(err))) => {
                state.finish();
                Some((Err(err), state))
            }
            Ok(None) => {
                state.finish();
                None
            }
            Err(_) => {
                debug!(timeout = ?state.idle_timeout, "Audio stream idle timeout");
                state.finish();
                Some((
                    Err(AudioError::ResourceFetch(format!(
                        "no audio data received for {:?}",
                        state.idle_timeout
                    ))),
                    state,
                ))
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::decoder::tests::tone_wav;
    use crate::audio::wav::WAV_HEADER_LEN;
    use crate::config::AppConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn pipeline() -> AudioPipeline {
        AudioPipeline::new(&AppConfig::default().audio).unwrap()
    }

    async fn collect(mut stream: ChunkStream) -> Vec<Result<Bytes, AudioError>> {
        let mut items = Vec::new();
        while let Some(item) = stream.next().await {
            items.push(item);
        }
        items
    }

    #[tokio::test]
    async fn test_transcodes_remote_wav() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/greeting.wav"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(tone_wav(22050, 2, 0.5))
                    .insert_header("content-type", "audio/wav"),
            )
            .mount(&server)
            .await;

        let items = collect(pipeline().transcode(&format!("{}/greeting.wav", server.uri()))).await;
        let chunks: Vec<Bytes> = items.into_iter().map(|item| item.unwrap()).collect();

        assert_eq!(chunks[0].len(), WAV_HEADER_LEN);
        let pcm: usize = chunks[1..].iter().map(|c| c.len()).sum();
        // 0.5s at 8kHz mono 16-bit
        assert!((7_980..=8_020).contains(&pcm), "got {pcm} bytes");
    }

    #[tokio::test]
    async fn test_fetch_failure_is_single_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let items = collect(pipeline().transcode(&format!("{}/down.mp3", server.uri()))).await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(AudioError::ResourceFetch(_))));
    }

    #[tokio::test]
    async fn test_undecodable_body_is_transcode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("this is not audio at all"))
            .mount(&server)
            .await;

        let items = collect(pipeline().transcode(&format!("{}/fake.bin", server.uri()))).await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(AudioError::Transcode(_))));
    }

    #[tokio::test]
    async fn test_idle_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(tone_wav(8000, 1, 0.1))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let pipeline = pipeline().with_idle_timeout(Duration::from_millis(200));
        let items = collect(pipeline.transcode(&format!("{}/slow.wav", server.uri()))).await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(AudioError::ResourceFetch(_))));
    }

    #[tokio::test]
    async fn test_stalled_body_released_after_idle_timeout() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let wav = tone_wav(8000, 1, 1.0);

        // Sends the head and a prefix of the body, then stalls until the client hangs up
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 2048];
            socket.read(&mut request).await.unwrap();
            let head = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: audio/wav\r\ncontent-length: {}\r\n\r\n",
                wav.len()
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(&wav[..2000]).await.unwrap();

            let mut rest = [0u8; 64];
            tokio::time::timeout(Duration::from_secs(3), socket.read(&mut rest)).await
        });

        let pipeline = pipeline().with_idle_timeout(Duration::from_millis(300));
        let items = collect(pipeline.transcode(&format!("http://{}/stalled.wav", addr))).await;
        assert!(items[0].is_ok());
        assert!(matches!(items.last(), Some(Err(AudioError::ResourceFetch(_)))));

        let hung_up = server.await.unwrap();
        assert!(hung_up.is_ok(), "audio connection still open after the stream was dropped");
    }

    #[tokio::test]
    async fn test_chunk_stream_stops_after_error() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok(Bytes::from_static(b"a"))).await.unwrap();
        tx.send(Err(AudioError::Transcode("bad frame".into()))).await.unwrap();
        tx.send(Ok(Bytes::from_static(b"b"))).await.unwrap();
        drop(tx);

        let token = CancellationToken::new();
        let items = collect(chunk_stream(rx, Duration::from_secs(1), token.clone().drop_guard())).await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
        // Dropping the stream cancels the worker
        assert!(token.is_cancelled());
    }
}
