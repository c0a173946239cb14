//! yt-dlp media fetcher.
//!
//! Downloads the best audio-only stream with yt-dlp, transcodes it with ffmpeg
//! at a fixed bitrate and uploads the result to the blob store.

use super::ffmpeg::{probe_duration, transcode};
use super::{audio_content_type, validate_external_id, FetchedAudio, MediaFetcher};
use crate::blob::{audio_key, BlobStore};
use crate::config::MediaSettings;
use crate::error::{ClipdexError, Result};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{info, instrument, warn};

/// Fetches audio through the yt-dlp and ffmpeg command line tools.
pub struct YtDlpFetcher {
    blob_store: Arc<dyn BlobStore>,
    settings: MediaSettings,
    temp_root: PathBuf,
}

impl YtDlpFetcher {
    pub fn new(blob_store: Arc<dyn BlobStore>, settings: MediaSettings, temp_root: &Path) -> Self {
        Self {
            blob_store,
            settings,
            temp_root: temp_root.to_path_buf(),
        }
    }

    /// Run yt-dlp into `dir`, returning the downloaded file.
    async fn download(&self, url: &str, external_id: &str, dir: &Path) -> Result<PathBuf> {
        info!("Downloading audio from {}", url);

        let template = dir.join(format!("{}.%(ext)s", external_id));
        let output = Command::new("yt-dlp")
            .args(ytdlp_args(url, &template))
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await;

        let output = match output {
            Ok(o) => o,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ClipdexError::ToolNotFound("yt-dlp".into()));
            }
            Err(e) => return Err(ClipdexError::Fetch(format!("yt-dlp execution failed: {e}"))),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ClipdexError::Fetch(format!("yt-dlp failed: {}", stderr.trim())));
        }

        find_audio_file(dir, external_id)
    }
}

#[async_trait]
impl MediaFetcher for YtDlpFetcher {
    #[instrument(skip(self), fields(external_id = %external_id))]
    async fn fetch(&self, external_id: &str) -> Result<FetchedAudio> {
        validate_external_id(external_id).map_err(|e| ClipdexError::Fetch(e.to_string()))?;

        std::fs::create_dir_all(&self.temp_root)?;
        // Removed on drop, whichever way this function returns
        let work_dir = tempfile::Builder::new()
            .prefix("clipdex-fetch-")
            .tempdir_in(&self.temp_root)?;

        let url = self.settings.source_url(external_id);
        let downloaded = self.download(&url, external_id, work_dir.path()).await?;

        let ext = self.settings.audio_format.as_str();
        let encoded = work_dir.path().join(format!("{}.encoded.{}", external_id, ext));
        transcode(&downloaded, &encoded, ext, self.settings.audio_bitrate_kbps).await?;

        let duration_seconds = match probe_duration(&encoded).await {
            Ok(d) => Some(d),
            Err(e) => {
                warn!("Could not probe audio duration: {}", e);
                None
            }
        };

        let bytes = tokio::fs::read(&encoded).await?;
        let size_bytes = bytes.len() as u64;
        if size_bytes == 0 {
            return Err(ClipdexError::Fetch("Encoded audio is empty".into()));
        }

        let key = self
            .blob_store
            .put(&audio_key(external_id, ext), bytes, audio_content_type(ext))
            .await?;

        info!(
            "Stored audio at {} ({:.2} MB)",
            key,
            size_bytes as f64 / (1024.0 * 1024.0)
        );

        Ok(FetchedAudio {
            key,
            size_bytes,
            duration_seconds,
        })
    }
}

/// yt-dlp arguments for an audio-only download.
fn ytdlp_args(url: &str, template: &Path) -> Vec<OsString> {
    vec![
        "--format".into(),
        "bestaudio/best".into(),
        "--output".into(),
        template.as_os_str().to_owned(),
        "--no-playlist".into(),
        "--quiet".into(),
        "--no-warnings".into(),
        url.into(),
    ]
}

/// Locates a downloaded audio file by external ID.
fn find_audio_file(dir: &Path, external_id: &str) -> Result<PathBuf> {
    // Common audio formats that yt-dlp may produce
    for ext in &["webm", "m4a", "opus", "mp3", "ogg"] {
        let candidate = dir.join(format!("{}.{}", external_id, ext));
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    // Fallback: scan directory for matching prefix
    let entries = std::fs::read_dir(dir)
        .map_err(|e| ClipdexError::Fetch(format!("Cannot read directory: {e}")))?;

    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(external_id) && !name.ends_with(".part") {
            return Ok(entry.path());
        }
    }

    Err(ClipdexError::Fetch("Audio file not found after download".into()))
}
