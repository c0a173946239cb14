//! CLI output formatting utilities.

use crate::catalog::{ItemStatus, ProcessingItem};
use crate::indexer::SearchHit;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

/// Output helper for CLI formatting.
pub struct Output;

impl Output {
    /// Print an info message.
    pub fn info(msg: &str) {
        println!("{} {}", style(">>").cyan().bold(), msg);
    }

    /// Print a success message.
    pub fn success(msg: &str) {
        println!("{} {}", style(">>").green().bold(), msg);
    }

    /// Print a warning message.
    pub fn warning(msg: &str) {
        eprintln!("{} {}", style(">>").yellow().bold(), msg);
    }

    /// Print an error message.
    pub fn error(msg: &str) {
        eprintln!("{} {}", style(">>").red().bold(), msg);
    }

    /// Print a header.
    pub fn header(msg: &str) {
        println!("\n{}", style(msg).bold().underlined());
    }

    /// Print a key-value pair.
    pub fn kv(key: &str, value: &str) {
        println!("  {}: {}", style(key).dim(), value);
    }

    /// Print a list item.
    pub fn list_item(msg: &str) {
        println!("  {} {}", style("*").cyan(), msg);
    }

    /// Print one catalog item.
    pub fn item_row(item: &ProcessingItem) {
        let title = if item.title.is_empty() {
            "(untitled)"
        } else {
            item.title.as_str()
        };
        println!(
            "  {} {:>5} {} {} [{}]",
            style("*").cyan(),
            item.id,
            style(&item.external_id).bold(),
            style(title).dim(),
            status_label(item.status)
        );
        if let Some(error) = &item.error {
            if item.status == ItemStatus::Error {
                println!("          {}", style(content_preview(error, 120)).red());
            }
        }
    }

    /// Print a search hit.
    pub fn search_result(hit: &SearchHit) {
        let title = if hit.metadata.title.is_empty() {
            hit.metadata.external_id.as_str()
        } else {
            hit.metadata.title.as_str()
        };
        println!(
            "\n{} {} chunk {}/{} (distance: {:.3})",
            style(">>").green(),
            style(title).bold(),
            hit.metadata.chunk_index + 1,
            hit.metadata.total_chunks,
            hit.distance
        );
        println!("   {}", content_preview(&hit.text, 200));
        println!(
            "   {}",
            style(format!(
                "{} | {} | {}",
                hit.metadata.external_id,
                hit.metadata.language,
                format_duration(hit.metadata.duration)
            ))
            .dim()
        );
    }

    /// Create a progress bar.
    pub fn progress_bar(len: u64, msg: &str) -> ProgressBar {
        let pb = ProgressBar::new(len);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_message(msg.to_string());
        pb
    }

    /// Create a spinner.
    pub fn spinner(msg: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap(),
        );
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        pb
    }
}

/// Colored status name.
pub fn status_label(status: ItemStatus) -> String {
    let label = style(status.as_str());
    match status {
        ItemStatus::Complete => label.green().to_string(),
        ItemStatus::Error => label.red().to_string(),
        ItemStatus::Synced => label.dim().to_string(),
        _ => label.yellow().to_string(),
    }
}

/// Format duration in seconds to a human-readable string.
pub fn format_duration(seconds: f64) -> String {
    let total_seconds = seconds.max(0.0) as u64;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Truncate content with ellipsis, on a character boundary.
fn content_preview(content: &str, max_chars: usize) -> String {
    let content = content.replace('\n', " ");
    match content.char_indices().nth(max_chars) {
        None => content,
        Some((cut, _)) => format!("{}...", &content[..cut]),
    }
}
