//! Pre-flight checks before running pipeline work.
//!
//! A worker that starts without yt-dlp or an API key would lease tasks
//! only to fail every item, so the tools are checked up front.

use crate::error::{ClipdexError, Result};
use crate::openai::is_api_key_configured;
use std::process::Command;

/// Requirements for different operations.
#[derive(Debug, Clone, Copy)]
pub enum Operation {
    /// Running the pipeline needs the media tools and the API key.
    Process,
    /// Queries are embedded, so search needs the API key.
    Search,
    /// Catalog and queue bookkeeping.
    Bookkeeping,
}

/// Run pre-flight checks for the given operation.
pub fn check(operation: Operation) -> Result<()> {
    match operation {
        Operation::Process => {
            check_api_key()?;
            check_tool("yt-dlp")?;
            check_tool("ffmpeg")?;
            check_tool("ffprobe")?;
        }
        Operation::Search => {
            check_api_key()?;
        }
        Operation::Bookkeeping => {}
    }
    Ok(())
}

fn check_api_key() -> Result<()> {
    if is_api_key_configured() {
        Ok(())
    } else {
        Err(ClipdexError::Config(
            "OPENAI_API_KEY not set. Set it with: export OPENAI_API_KEY='sk-...'".to_string(),
        ))
    }
}

/// Check that an external tool runs.
fn check_tool(name: &str) -> Result<()> {
    // ffmpeg/ffprobe use -version (single dash)
    let version_arg = match name {
        "ffmpeg" | "ffprobe" => "-version",
        _ => "--version",
    };
    match Command::new(name).arg(version_arg).output() {
        Ok(output) if output.status.success() => Ok(()),
        Ok(_) => Err(ClipdexError::ToolNotFound(format!(
            "{} is installed but not working correctly",
            name
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ClipdexError::ToolNotFound(name.to_string()))
        }
        Err(e) => Err(ClipdexError::ToolNotFound(format!("{}: {}", name, e))),
    }
}
