//! In-memory transcoder used by relay and handler tests.

use super::pipeline::{ChunkStream, Transcoder};
use super::AudioError;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Mutex;

/// Serves scripted chunk sequences per locator and records every request.
#[derive(Default)]
pub struct ScriptedTranscoder {
    scripts: HashMap<String, Vec<Result<Bytes, AudioError>>>,
    requested: Mutex<Vec<String>>,
}

impl ScriptedTranscoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(mut self, locator: &str, chunks: &[&'static str]) -> Self {
        let items = chunks.iter().map(|c| Ok(Bytes::from_static(c.as_bytes()))).collect();
        self.scripts.insert(locator.to_string(), items);
        self
    }

    /// Yield `chunks` and then fail with `error`.
    pub fn fail_after(mut self, locator: &str, chunks: &[&'static str], error: AudioError) -> Self {
        let mut items: Vec<_> = chunks.iter().map(|c| Ok(Bytes::from_static(c.as_bytes()))).collect();
        items.push(Err(error));
        self.scripts.insert(locator.to_string(), items);
        self
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

impl Transcoder for ScriptedTranscoder {
    fn transcode(&self, locator: &str) -> ChunkStream {
        self.requested.lock().unwrap().push(locator.to_string());

        let items = self.scripts.get(locator).cloned().unwrap_or_else(|| {
            vec![Err(AudioError::ResourceFetch(format!("no script for {}", locator)))]
        });

        // Yield between chunks so interleaving bugs would show up
        stream::iter(items)
            .then(|item| async move {
                tokio::task::yield_now().await;
                item
            })
            .boxed()
    }
}
