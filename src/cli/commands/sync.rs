//! Sync command implementation.

use super::{open_catalog, open_queue, print_summary};
use crate::catalog::{ItemStatus, ItemStore};
use crate::cli::Output;
use crate::config::Settings;
use crate::sync::enqueue_eligible;
use anyhow::Result;

/// Run the sync command: queue every item that is waiting or failed.
pub async fn run_sync(queue_name: Option<String>, settings: &Settings) -> Result<()> {
    let catalog = open_catalog(settings)?;
    let queue = open_queue(settings)?;
    let queue_name = queue_name.unwrap_or_else(|| settings.queue.pipeline_queue.clone());

    let mut items = catalog.list(Some(ItemStatus::Synced)).await?;
    items.extend(catalog.list(Some(ItemStatus::Error)).await?);

    if items.is_empty() {
        Output::info("Nothing to sync. Every item is queued, running or complete.");
        return Ok(());
    }

    Output::info(&format!("Queueing {} items on '{}'", items.len(), queue_name));
    let summary = enqueue_eligible(&queue, &queue_name, &items).await;
    print_summary(&summary);

    if !summary.failed.is_empty() {
        anyhow::bail!("{} items could not be queued", summary.failed.len());
    }
    Ok(())
}
