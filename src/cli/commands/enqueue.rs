//! Enqueue command implementation.

use super::{open_catalog, open_queue, print_summary};
use crate::cli::Output;
use crate::config::Settings;
use crate::queue::{wait_for_item, WaitOutcome};
use crate::sync::{enqueue_items, enqueue_reindex};
use anyhow::Result;
use chrono::Utc;
use std::time::Duration;

/// Run the enqueue command.
pub async fn run_enqueue(
    item_ids: &[i64],
    reindex: bool,
    queue_name: Option<String>,
    wait: Option<u64>,
    settings: &Settings,
) -> Result<()> {
    let catalog = open_catalog(settings)?;
    let queue = open_queue(settings)?;
    let queue_name = queue_name.unwrap_or_else(|| settings.queue.pipeline_queue.clone());
    let started = Utc::now();

    let summary = if reindex {
        enqueue_reindex(&catalog, &queue, &queue_name, item_ids).await
    } else {
        enqueue_items(&catalog, &queue, &queue_name, item_ids).await
    };
    print_summary(&summary);

    if let Some(seconds) = wait {
        let poll = Duration::from_millis(settings.queue.poll_interval_ms.max(100));
        let pb = Output::progress_bar(summary.queued.len() as u64, "waiting for workers");

        for queued in &summary.queued {
            let outcome = wait_for_item(
                &catalog,
                queued.item_id,
                started,
                Duration::from_secs(seconds),
                poll,
            )
            .await?;
            pb.inc(1);

            match outcome {
                WaitOutcome::Complete(_) => pb.println(format!("{} complete", queued.external_id)),
                WaitOutcome::Failed(view) => pb.println(format!(
                    "{} failed: {}",
                    queued.external_id,
                    view.error.unwrap_or_default()
                )),
                WaitOutcome::Unknown(view) => pb.println(format!(
                    "{} still {} after {}s; check again with 'clipdex status {}'",
                    queued.external_id,
                    view.map(|v| v.status.to_string()).unwrap_or_else(|| "unknown".into()),
                    seconds,
                    queued.item_id
                )),
            }
        }
        pb.finish_and_clear();
    }

    if !summary.failed.is_empty() {
        anyhow::bail!("{} items could not be queued", summary.failed.len());
    }
    Ok(())
}
