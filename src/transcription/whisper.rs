//! OpenAI Whisper speech provider.

use super::{SpeechProvider, TranscriptDocument, TranscriptSegment};
use crate::error::{ClipdexError, Result};
use crate::media::split_audio;
use crate::openai::create_client_with_timeout;
use async_openai::error::OpenAIError;
use async_openai::types::{
    AudioInput, AudioResponseFormat, CreateTranscriptionRequestArgs, TimestampGranularity,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Whisper rejects uploads above 25 MB; stay a little below it.
const MAX_UPLOAD_BYTES: u64 = 24 * 1024 * 1024;

/// Length of the pieces oversized audio is split into.
const SPLIT_SEGMENT_SECONDS: u32 = 600;

/// OpenAI Whisper-based speech provider.
pub struct WhisperProvider {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    model: String,
    request_timeout: Duration,
    temp_root: PathBuf,
}

impl WhisperProvider {
    /// Create a provider for `model` with a per-request timeout.
    pub fn new(model: &str, request_timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: create_client_with_timeout(request_timeout)?,
            model: model.to_string(),
            request_timeout,
            temp_root: std::env::temp_dir(),
        })
    }

    /// Directory that split pieces of oversized audio are written under.
    pub fn with_temp_root(mut self, temp_root: &Path) -> Self {
        self.temp_root = temp_root.to_path_buf();
        self
    }

    fn split_dir(&self) -> Result<tempfile::TempDir> {
        std::fs::create_dir_all(&self.temp_root)?;
        Ok(tempfile::Builder::new()
            .prefix("split-")
            .tempdir_in(&self.temp_root)?)
    }

    /// Transcribe a single file that fits in one upload.
    #[instrument(skip(self), fields(audio_path = %audio_path.display()))]
    async fn transcribe_single(
        &self,
        audio_path: &Path,
        language: Option<&str>,
    ) -> Result<TranscriptDocument> {
        let file_bytes = tokio::fs::read(audio_path).await?;

        let mut request_builder = CreateTranscriptionRequestArgs::default();
        request_builder
            .file(AudioInput::from_vec_u8(
                audio_path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("audio.mp3")
                    .to_string(),
                file_bytes,
            ))
            .model(&self.model)
            .response_format(AudioResponseFormat::VerboseJson)
            .timestamp_granularities(vec![TimestampGranularity::Segment]);

        if let Some(lang) = language {
            request_builder.language(lang);
        }

        let request = request_builder
            .build()
            .map_err(|e| ClipdexError::Transcription(format!("Failed to build request: {}", e)))?;

        let response = self
            .client
            .audio()
            .transcribe_verbose_json(request)
            .await
            .map_err(|e| self.map_api_error(e))?;

        let segments: Vec<TranscriptSegment> = response
            .segments
            .map(|segs| {
                segs.iter()
                    .map(|s| TranscriptSegment::new(s.start as f64, s.end as f64, s.text.trim()))
                    .collect()
            })
            .unwrap_or_else(|| {
                // No segment list: keep the text as one segment
                vec![TranscriptSegment::new(
                    0.0,
                    response.duration as f64,
                    response.text.trim(),
                )]
            });

        debug!("Transcribed {} segments", segments.len());

        Ok(TranscriptDocument {
            text: response.text.trim().to_string(),
            language: response.language,
            duration: response.duration as f64,
            segments,
        })
    }

    fn map_api_error(&self, err: OpenAIError) -> ClipdexError {
        match err {
            OpenAIError::Reqwest(ref e) if e.is_timeout() => ClipdexError::Timeout(format!(
                "Whisper request timeout after {}s",
                self.request_timeout.as_secs()
            )),
            other => ClipdexError::OpenAI(format!("Whisper API error: {}", other)),
        }
    }
}

#[async_trait]
impl SpeechProvider for WhisperProvider {
    async fn transcribe(&self, audio_path: &Path, language: Option<&str>) -> Result<TranscriptDocument> {
        let size = tokio::fs::metadata(audio_path).await?.len();
        if size <= MAX_UPLOAD_BYTES {
            return self.transcribe_single(audio_path, language).await;
        }

        let temp_dir = self.split_dir()?;
        let pieces = split_audio(audio_path, temp_dir.path(), SPLIT_SEGMENT_SECONDS).await?;
        info!("Transcribing {} pieces with {}", pieces.len(), self.model);

        let mut parts = Vec::with_capacity(pieces.len());
        for (idx, (piece, offset)) in pieces.iter().enumerate() {
            let part = self
                .transcribe_single(piece, language)
                .await
                .map_err(|e| match e {
                    ClipdexError::Timeout(msg) => {
                        ClipdexError::Timeout(format!("piece {} at {:.0}s: {}", idx, offset, msg))
                    }
                    other => ClipdexError::Transcription(format!(
                        "piece {} at {:.0}s failed: {}",
                        idx, offset, other
                    )),
                })?;
            parts.push(part.offset_by(*offset));
        }

        Ok(TranscriptDocument::concat(parts))
    }

    fn name(&self) -> &str {
        &self.model
    }
}
