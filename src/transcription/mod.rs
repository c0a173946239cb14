//! Transcription stage for clipdex.
//!
//! Reads stored audio, sends it to a speech-to-text provider and writes the
//! resulting transcript document back to the blob store.

mod models;
mod whisper;

pub use models::{TranscriptDocument, TranscriptSegment, TranscriptSummary};
pub use whisper::WhisperProvider;

use crate::blob::{transcript_key, BlobStore};
use crate::error::{ClipdexError, Result};
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, instrument};

/// Trait for speech-to-text providers.
#[async_trait]
pub trait SpeechProvider: Send + Sync {
    /// Transcribe a local audio file with segment-level timestamps.
    async fn transcribe(&self, audio_path: &Path, language: Option<&str>) -> Result<TranscriptDocument>;

    /// Provider or model name, for logging.
    fn name(&self) -> &str;
}

/// The transcription stage.
pub struct Transcriber {
    blob_store: Arc<dyn BlobStore>,
    provider: Arc<dyn SpeechProvider>,
    temp_root: PathBuf,
    language: Option<String>,
}

impl Transcriber {
    pub fn new(
        blob_store: Arc<dyn BlobStore>,
        provider: Arc<dyn SpeechProvider>,
        temp_root: &Path,
    ) -> Self {
        Self {
            blob_store,
            provider,
            temp_root: temp_root.to_path_buf(),
            language: None,
        }
    }

    /// Pass a language hint to the provider.
    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }

    /// Transcribe the audio stored at `audio_key` and persist the transcript.
    #[instrument(skip(self), fields(provider = self.provider.name()))]
    pub async fn transcribe(&self, audio_key: &str, external_id: &str) -> Result<TranscriptSummary> {
        let bytes = self.blob_store.get(audio_key).await?;

        std::fs::create_dir_all(&self.temp_root)?;
        let ext = Path::new(audio_key)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp3");
        // Deleted on drop, whichever way this function returns
        let mut local = tempfile::Builder::new()
            .prefix("clipdex-audio-")
            .suffix(&format!(".{}", ext))
            .tempfile_in(&self.temp_root)?;
        local.write_all(&bytes)?;
        local.flush()?;
        drop(bytes);

        let document = self
            .provider
            .transcribe(local.path(), self.language.as_deref())
            .await
            .map_err(|e| match e {
                ClipdexError::Transcription(_) => e,
                other => ClipdexError::Transcription(other.to_string()),
            })?;

        if !document.has_text() {
            return Err(ClipdexError::Transcription(format!(
                "Provider returned no text for {}",
                external_id
            )));
        }

        let key = transcript_key(external_id);
        let json = serde_json::to_vec_pretty(&document)?;
        self.blob_store.put(&key, json, "application/json").await?;

        info!(
            "Stored transcript at {} ({} segments, language {})",
            key,
            document.segments.len(),
            document.language
        );

        Ok(TranscriptSummary {
            key,
            language: document.language,
            duration: document.duration,
            segment_count: document.segments.len(),
        })
    }
}

/// Load a transcript document from the blob store.
pub async fn load_transcript(blob_store: &dyn BlobStore, key: &str) -> Result<TranscriptDocument> {
    let bytes = blob_store.get(key).await?;
    Ok(serde_json::from_slice(&bytes)?)
}
