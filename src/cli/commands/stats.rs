//! Stats command implementation.

use super::open_queue;
use crate::catalog::{ItemStatus, ItemStore};
use crate::cli::output::status_label;
use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::Orchestrator;
use crate::queue::TaskQueue;
use anyhow::Result;

/// Show catalog, index and queue statistics.
pub async fn run_stats(settings: &Settings) -> Result<()> {
    let orchestrator = Orchestrator::new(settings)?;
    let queue = open_queue(settings)?;

    let items = orchestrator.catalog().list(None).await?;
    Output::header("Catalog");
    Output::kv("Items", &items.len().to_string());
    for status in ItemStatus::ALL {
        let count = items.iter().filter(|i| i.status == status).count();
        if count > 0 {
            Output::kv(&status_label(status), &count.to_string());
        }
    }

    let index = orchestrator.indexer().stats().await?;
    Output::header("Vector index");
    Output::kv("Provider", &settings.vector_store.provider);
    Output::kv("Chunks", &index.total_chunks.to_string());
    Output::kv("Items", &index.total_items.to_string());

    Output::header("Task queue");
    let counts = queue.counts().await?;
    if counts.is_empty() {
        Output::info("No tasks.");
    }
    for count in counts {
        Output::kv(&format!("{} {}", count.queue, count.state), &count.count.to_string());
    }

    Ok(())
}
