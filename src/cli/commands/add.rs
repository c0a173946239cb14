//! Add command implementation.

use super::{open_catalog, open_queue, print_summary};
use crate::catalog::{ItemStore, NewItem};
use crate::cli::Output;
use crate::config::Settings;
use crate::sync::enqueue_eligible;
use anyhow::Result;

/// Run the add command.
pub async fn run_add(
    external_id: &str,
    title: &str,
    views: u64,
    likes: u64,
    duration: Option<f64>,
    enqueue: bool,
    settings: &Settings,
) -> Result<()> {
    let catalog = open_catalog(settings)?;

    let mut new_item = NewItem::new(external_id)
        .with_title(title)
        .with_metrics(views, likes);
    new_item.duration_seconds = duration;

    let item = catalog.register(&new_item).await?;
    Output::success(&format!(
        "Registered {} as item {} ({})",
        item.external_id, item.id, item.status
    ));

    if enqueue {
        let queue = open_queue(settings)?;
        let summary = enqueue_eligible(&queue, &settings.queue.pipeline_queue, &[item]).await;
        print_summary(&summary);
    }

    Ok(())
}
