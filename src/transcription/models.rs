//! Transcript data models.

use serde::{Deserialize, Serialize};

/// A single timed segment of a transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Start time in seconds.
    pub start: f64,
    /// End time in seconds.
    pub end: f64,
    /// Transcribed text content.
    pub text: String,
}

impl TranscriptSegment {
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }

    /// Duration of this segment in seconds.
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Transcript as stored in the blob store at `transcripts/{id}.json`.
///
/// ```json
/// { "text": "...", "language": "en", "duration": 12.5,
///   "segments": [{ "start": 0.0, "end": 4.2, "text": "..." }] }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptDocument {
    /// Full transcript text.
    pub text: String,
    /// Detected language.
    #[serde(default = "unknown_language")]
    pub language: String,
    /// Audio duration in seconds.
    #[serde(default)]
    pub duration: f64,
    /// Timed segments.
    #[serde(default)]
    pub segments: Vec<TranscriptSegment>,
}

fn unknown_language() -> String {
    "unknown".to_string()
}

impl TranscriptDocument {
    /// Build a document from segments, joining their text.
    pub fn from_segments(language: impl Into<String>, segments: Vec<TranscriptSegment>) -> Self {
        let text = segments
            .iter()
            .map(|s| s.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        let duration = segments.last().map(|s| s.end).unwrap_or(0.0);

        Self {
            text,
            language: language.into(),
            duration,
            segments,
        }
    }

    /// Whether the transcript carries any text.
    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }

    /// Shift all segment timestamps by `offset` seconds.
    pub fn offset_by(mut self, offset: f64) -> Self {
        for segment in &mut self.segments {
            segment.start += offset;
            segment.end += offset;
        }
        self
    }

    /// Concatenate consecutive parts of one recording.
    pub fn concat(parts: Vec<TranscriptDocument>) -> Self {
        let language = parts
            .iter()
            .map(|p| p.language.as_str())
            .find(|l| !l.is_empty() && *l != "unknown")
            .unwrap_or("unknown")
            .to_string();
        let duration = parts
            .iter()
            .flat_map(|p| p.segments.last().map(|s| s.end))
            .fold(0.0, f64::max);
        let text = parts
            .iter()
            .map(|p| p.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        let segments = parts.into_iter().flat_map(|p| p.segments).collect();

        Self {
            text,
            language,
            duration,
            segments,
        }
    }
}

/// Summary returned by the transcription stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSummary {
    /// Blob store key of the transcript document.
    pub key: String,
    /// Detected language.
    pub language: String,
    /// Audio duration in seconds.
    pub duration: f64,
    /// Number of timed segments.
    pub segment_count: usize,
}
