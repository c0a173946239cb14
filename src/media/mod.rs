//! Media acquisition for clipdex.
//!
//! A fetcher turns an external content ID into an audio artifact in the blob
//! store. Nothing is uploaded until local transcoding has succeeded.

mod ffmpeg;
mod ytdlp;

pub use ffmpeg::{probe_duration, split_audio, transcode};
pub use ytdlp::YtDlpFetcher;

use crate::error::{ClipdexError, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Summary of a fetched audio artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedAudio {
    /// Blob store key of the audio.
    pub key: String,
    /// Size of the stored audio in bytes.
    pub size_bytes: u64,
    /// Audio duration in seconds, when it could be probed.
    pub duration_seconds: Option<f64>,
}

/// Trait for media fetchers.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Fetch the audio track for an external content ID and persist it.
    async fn fetch(&self, external_id: &str) -> Result<FetchedAudio>;
}

fn external_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("Invalid regex"))
}

/// Check that an external content ID is safe to use in URLs, file names and blob keys.
pub fn validate_external_id(external_id: &str) -> Result<()> {
    if external_id_regex().is_match(external_id) {
        Ok(())
    } else {
        Err(ClipdexError::InvalidInput(format!(
            "Invalid external content ID: {:?}",
            external_id
        )))
    }
}

/// MIME type for a stored audio extension.
pub fn audio_content_type(ext: &str) -> &'static str {
    match ext {
        "mp3" => "audio/mpeg",
        "m4a" | "aac" => "audio/mp4",
        "opus" | "ogg" => "audio/ogg",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        _ => "application/octet-stream",
    }
}
