//! Status and task command implementations.

use super::{open_catalog, open_queue};
use crate::catalog::ItemStore;
use crate::cli::output::status_label;
use crate::cli::Output;
use crate::config::Settings;
use crate::queue::{TaskMessage, TaskQueue, TaskState};
use anyhow::Result;

/// Show an item's pipeline status.
pub async fn run_status(item_id: i64, settings: &Settings) -> Result<()> {
    let catalog = open_catalog(settings)?;
    let Some(item) = catalog.get(item_id).await? else {
        Output::error(&format!("Item {} not found", item_id));
        anyhow::bail!("item {} not found", item_id);
    };

    Output::header(&format!("Item {} ({})", item.id, item.external_id));
    Output::kv("Status", &status_label(item.status));
    if !item.title.is_empty() {
        Output::kv("Title", &item.title);
    }
    Output::kv("Audio", item.audio_key.as_deref().unwrap_or("-"));
    Output::kv("Transcript", item.transcript_key.as_deref().unwrap_or("-"));
    if let Some(indexed_at) = item.indexed_at {
        Output::kv("Indexed at", &indexed_at.to_rfc3339());
    }
    if let Some(claimed_at) = item.claimed_at {
        Output::kv("Stage started", &claimed_at.to_rfc3339());
    }
    if let Some(error) = &item.error {
        Output::kv("Last error", error);
    }
    Output::kv("Updated", &item.updated_at.to_rfc3339());

    Ok(())
}

/// Show a queued task.
pub async fn run_task(task_id: &str, settings: &Settings) -> Result<()> {
    let queue = open_queue(settings)?;
    let Some(task) = queue.task_status(task_id).await? else {
        Output::error(&format!("Task {} not found", task_id));
        anyhow::bail!("task {} not found", task_id);
    };

    Output::header(&format!("Task {}", task.id));
    Output::kv("Queue", &task.queue);
    Output::kv("State", task.state.as_str());
    match TaskMessage::from_json(&task.payload) {
        Ok(message) => {
            Output::kv("Operation", message.operation.as_str());
            Output::kv("Item", &format!("{} ({})", message.item_id(), message.external_id()));
        }
        Err(_) => Output::kv("Payload", &task.payload),
    }
    Output::kv("Attempts", &format!("{}/{}", task.attempts, task.max_attempts));
    if let Some(worker) = &task.worker_id {
        Output::kv("Worker", worker);
    }
    if let Some(error) = &task.last_error {
        Output::kv("Last error", error);
    }
    if let Some(result) = &task.result {
        Output::kv("Result", result);
    }
    Output::kv("Updated", &task.updated_at.to_rfc3339());

    if task.state == TaskState::Dead {
        Output::warning("This task will not be retried. Re-enqueue the item to try again.");
    }
    Ok(())
}
