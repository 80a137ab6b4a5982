//! Remote audio fetch: opens an audio URL as an async byte stream.

use super::AudioError;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::Url;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Response body as an `AsyncRead`.
pub type BodyReader = StreamReader<BoxStream<'static, std::io::Result<Bytes>>, Bytes>;

/// An opened audio resource, ready for decoding.
pub struct AudioSource {
    pub reader: BodyReader,
    /// `Content-Type` reported by the server, if any
    pub mime_type: Option<String>,
    /// File extension of the URL path, if any (e.g. `mp3`)
    pub extension: Option<String>,
}

/// Open `locator` for streaming.
///
/// ## Errors:
/// `ResourceFetch` when the URL is invalid or not http(s), the host is unreachable, the
/// connect timeout passes, or the server answers with a non-success status.
///
/// The body ends early once `cancel` fires, so a reader blocked on a stalled server
/// sees end-of-stream instead of waiting for the remote side.
pub async fn open(
    client: &reqwest::Client,
    locator: &str,
    cancel: &CancellationToken,
) -> Result<AudioSource, AudioError> {
    let url = Url::parse(locator)
        .map_err(|e| AudioError::ResourceFetch(format!("invalid audio URL '{}': {}", locator, e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(AudioError::ResourceFetch(format!(
            "unsupported audio URL scheme '{}'",
            url.scheme()
        )));
    }

    let extension = extension_of(&url);

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| AudioError::ResourceFetch(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(AudioError::ResourceFetch(format!(
            "audio resource returned status {}",
            status.as_u16()
        )));
    }

    let mime_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split(';').next().unwrap_or(value).trim().to_string());

    debug!(
        locator = %locator,
        mime_type = ?mime_type,
        content_length = ?response.content_length(),
        "Audio resource opened"
    );

    let body = response
        .bytes_stream()
        .map_err(std::io::Error::other)
        .take_until(cancel.clone().cancelled_owned())
        .boxed();

    Ok(AudioSource {
        reader: StreamReader::new(body),
        mime_type,
        extension,
    })
}

fn extension_of(url: &Url) -> Option<String> {
    let file = url.path_segments()?.last()?;
    let (_, extension) = file.rsplit_once('.')?;
    (!extension.is_empty()).then(|| extension.to_ascii_lowercase())
}
