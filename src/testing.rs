//! In-process fakes for the pipeline's external collaborators.

use crate::blob::{audio_key, BlobStore};
use crate::embedding::Embedder;
use crate::error::{ClipdexError, Result};
use crate::media::{validate_external_id, FetchedAudio, MediaFetcher};
use crate::transcription::{SpeechProvider, TranscriptDocument, TranscriptSegment};
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

enum SpeechBehavior {
    Text(String),
    TimeOut,
    Hang,
    Fail(String),
}

/// Speech provider that answers from a script.
pub struct ScriptedSpeech {
    behavior: Mutex<SpeechBehavior>,
    calls: AtomicUsize,
}

impl ScriptedSpeech {
    fn new(behavior: SpeechBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            calls: AtomicUsize::new(0),
        }
    }

    /// Returns `text` as a single English segment.
    pub fn with_text(text: &str) -> Self {
        Self::new(SpeechBehavior::Text(text.to_string()))
    }

    /// Fails the way an HTTP client timeout does.
    pub fn timing_out() -> Self {
        Self::new(SpeechBehavior::TimeOut)
    }

    /// Never answers.
    pub fn hanging() -> Self {
        Self::new(SpeechBehavior::Hang)
    }

    pub fn failing(message: &str) -> Self {
        Self::new(SpeechBehavior::Fail(message.to_string()))
    }

    /// Answer with `text` from now on.
    pub fn respond_with(&self, text: &str) {
        *self.behavior.lock().unwrap() = SpeechBehavior::Text(text.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechProvider for ScriptedSpeech {
    async fn transcribe(&self, audio_path: &Path, _language: Option<&str>) -> Result<TranscriptDocument> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(audio_path.exists(), "audio copy should exist during the call");

        let scripted = {
            let behavior = self.behavior.lock().unwrap();
            match &*behavior {
                SpeechBehavior::Text(text) => Some(Ok(text.clone())),
                SpeechBehavior::TimeOut => Some(Err(ClipdexError::Timeout(
                    "speech provider timeout after 600s".to_string(),
                ))),
                SpeechBehavior::Fail(message) => {
                    Some(Err(ClipdexError::Transcription(message.clone())))
                }
                SpeechBehavior::Hang => None,
            }
        };
        let Some(outcome) = scripted else {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            return Err(ClipdexError::Transcription("speech provider never answered".to_string()));
        };

        let text = outcome?;
        let segments = if text.trim().is_empty() {
            Vec::new()
        } else {
            vec![TranscriptSegment::new(0.0, 12.5, text.clone())]
        };
        Ok(TranscriptDocument {
            text,
            language: "en".to_string(),
            duration: 12.5,
            segments,
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Media fetcher that writes placeholder audio straight into the blob store.
pub struct ScriptedFetcher {
    blob_store: Arc<dyn BlobStore>,
    calls: AtomicUsize,
    failing: AtomicBool,
    delay: Duration,
}

impl ScriptedFetcher {
    pub fn new(blob_store: Arc<dyn BlobStore>) -> Self {
        Self {
            blob_store,
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            delay: Duration::ZERO,
        }
    }

    /// Sleep before storing audio, to widen race windows.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaFetcher for ScriptedFetcher {
    async fn fetch(&self, external_id: &str) -> Result<FetchedAudio> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        validate_external_id(external_id).map_err(|e| ClipdexError::Fetch(e.to_string()))?;

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(ClipdexError::Fetch(format!(
                "yt-dlp failed for {}: video unavailable",
                external_id
            )));
        }

        let bytes = format!("ID3 fake audio for {}", external_id).into_bytes();
        let size_bytes = bytes.len() as u64;
        let key = self
            .blob_store
            .put(&audio_key(external_id, "mp3"), bytes, "audio/mpeg")
            .await?;

        Ok(FetchedAudio {
            key,
            size_bytes,
            duration_seconds: Some(12.5),
        })
    }
}

/// Deterministic bag-of-words embedder.
///
/// Each lowercase word is hashed into one of `dimensions` buckets and the
/// resulting count vector is normalized, so texts sharing words are close.
pub struct HashEmbedder {
    dimensions: usize,
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of batch calls made.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for word in text.split_whitespace() {
            let word = word
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            if word.is_empty() {
                continue;
            }
            // FNV-1a
            let mut hash: u64 = 0xcbf29ce484222325;
            for byte in word.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(0x100000001b3);
            }
            vector[(hash % self.dimensions as u64) as usize] += 1.0;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ClipdexError::Embedding("embedding service unavailable".to_string()));
        }
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// `count` distinct four-character words: "w000 w001 ...".
pub fn numbered_words(count: usize) -> String {
    (0..count)
        .map(|i| format!("w{:03}", i))
        .collect::<Vec<_>>()
        .join(" ")
}
