//! ffmpeg / ffprobe helpers.

use crate::error::{ClipdexError, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

/// ffmpeg encoder for a target extension.
fn codec_for(ext: &str) -> &'static str {
    match ext {
        "m4a" | "aac" => "aac",
        "opus" => "libopus",
        "ogg" => "libvorbis",
        "flac" => "flac",
        "wav" => "pcm_s16le",
        _ => "libmp3lame",
    }
}

/// ffmpeg arguments for a fixed-bitrate audio-only transcode.
pub(crate) fn transcode_args(source: &Path, dest: &Path, ext: &str, bitrate_kbps: u32) -> Vec<OsString> {
    vec![
        "-i".into(),
        source.as_os_str().to_owned(),
        "-vn".into(),
        "-codec:a".into(),
        codec_for(ext).into(),
        "-b:a".into(),
        format!("{}k", bitrate_kbps).into(),
        "-y".into(),
        "-loglevel".into(),
        "error".into(),
        dest.as_os_str().to_owned(),
    ]
}

/// Transcode `source` to `dest` with the codec implied by `ext`.
pub async fn transcode(source: &Path, dest: &Path, ext: &str, bitrate_kbps: u32) -> Result<()> {
    debug!("Transcoding {:?} -> {:?}", source, dest);

    let result = Command::new("ffmpeg")
        .args(transcode_args(source, dest, ext, bitrate_kbps))
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await;

    match result {
        Ok(out) if out.status.success() => Ok(()),
        Ok(out) => {
            let err = String::from_utf8_lossy(&out.stderr);
            Err(ClipdexError::Fetch(format!("ffmpeg encoding failed: {}", err.trim())))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ClipdexError::ToolNotFound("ffmpeg".into()))
        }
        Err(e) => Err(ClipdexError::Fetch(format!("ffmpeg error: {e}"))),
    }
}

/// Segments a long audio file into smaller pieces.
///
/// Each piece is approximately `segment_seconds` long. Returns tuples of
/// (segment_path, offset_seconds).
#[instrument(skip_all)]
pub async fn split_audio(
    source: &Path,
    output_dir: &Path,
    segment_seconds: u32,
) -> Result<Vec<(PathBuf, f64)>> {
    std::fs::create_dir_all(output_dir)?;

    let total_duration = probe_duration(source).await?;
    let segment_len = segment_seconds.max(1) as f64;

    if total_duration <= segment_len {
        return Ok(vec![(source.to_path_buf(), 0.0)]);
    }

    let ext = source
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("mp3");

    let mut segments = Vec::new();
    let mut offset = 0.0;
    let mut idx = 0u32;

    while offset < total_duration {
        let segment_path = output_dir.join(format!("segment_{:04}.{}", idx, ext));
        let length = segment_len.min(total_duration - offset);

        extract_segment(source, &segment_path, offset, length).await?;
        segments.push((segment_path, offset));

        offset += segment_len;
        idx += 1;
    }

    info!("Split {:.1}s of audio into {} segments", total_duration, segments.len());
    Ok(segments)
}

/// Extracts a time segment from an audio file.
async fn extract_segment(source: &Path, dest: &Path, start: f64, length: f64) -> Result<()> {
    // Stream copy first: fast and lossless
    let copy_result = Command::new("ffmpeg")
        .arg("-ss").arg(format!("{:.3}", start))
        .arg("-i").arg(source)
        .arg("-t").arg(format!("{:.3}", length))
        .arg("-c").arg("copy")
        .arg("-y")
        .arg("-loglevel").arg("warning")
        .arg(dest)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    if let Ok(status) = copy_result {
        if status.success() && dest.exists() {
            return Ok(());
        }
    }

    warn!("Stream copy failed, re-encoding segment");

    let encode_result = Command::new("ffmpeg")
        .arg("-ss").arg(format!("{:.3}", start))
        .arg("-i").arg(source)
        .arg("-t").arg(format!("{:.3}", length))
        .arg("-codec:a").arg("libmp3lame")
        .arg("-qscale:a").arg("2")
        .arg("-y")
        .arg("-loglevel").arg("error")
        .arg(dest)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await;

    match encode_result {
        Ok(out) if out.status.success() => Ok(()),
        Ok(out) => {
            let err = String::from_utf8_lossy(&out.stderr);
            Err(ClipdexError::Transcription(format!("Segment extraction failed: {}", err.trim())))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ClipdexError::ToolNotFound("ffmpeg".into()))
        }
        Err(e) => Err(ClipdexError::Transcription(format!("ffmpeg error: {e}"))),
    }
}

/// Queries the duration of an audio file using ffprobe with JSON output.
pub async fn probe_duration(path: &Path) -> Result<f64> {
    let result = Command::new("ffprobe")
        .arg("-v").arg("quiet")
        .arg("-print_format").arg("json")
        .arg("-show_format")
        .arg(path)
        .output()
        .await;

    let output = match result {
        Ok(o) => o,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ClipdexError::ToolNotFound("ffprobe".into()));
        }
        Err(e) => return Err(ClipdexError::Fetch(format!("ffprobe failed: {e}"))),
    };

    if !output.status.success() {
        return Err(ClipdexError::Fetch("ffprobe returned error".into()));
    }

    parse_probe_duration(&String::from_utf8_lossy(&output.stdout))
}

fn parse_probe_duration(json_str: &str) -> Result<f64> {
    let parsed: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|_| ClipdexError::Fetch("Invalid ffprobe output".into()))?;

    parsed["format"]["duration"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| ClipdexError::Fetch("Could not determine audio duration".into()))
}
