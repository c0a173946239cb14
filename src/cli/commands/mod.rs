//! CLI command implementations.

mod add;
mod config;
mod delete;
mod enqueue;
mod list;
mod process;
mod search;
mod stats;
mod status;
mod sync;
mod worker;

pub use add::run_add;
pub use config::run_config;
pub use delete::run_delete;
pub use enqueue::run_enqueue;
pub use list::run_list;
pub use process::run_process;
pub use search::run_search;
pub use stats::run_stats;
pub use status::{run_status, run_task};
pub use sync::run_sync;
pub use worker::run_worker;

use crate::catalog::SqliteCatalog;
use crate::cli::Output;
use crate::config::Settings;
use crate::queue::{RetryPolicy, SqliteTaskQueue};
use crate::sync::BatchEnqueueSummary;
use std::time::Duration;

fn open_catalog(settings: &Settings) -> crate::Result<SqliteCatalog> {
    SqliteCatalog::new(
        &settings.catalog_path(),
        Duration::from_millis(settings.database.busy_timeout_ms),
    )
}

fn open_queue(settings: &Settings) -> crate::Result<SqliteTaskQueue> {
    SqliteTaskQueue::new(
        &settings.queue_path(),
        Duration::from_millis(settings.database.busy_timeout_ms),
        RetryPolicy::from(&settings.queue),
    )
}

fn print_summary(summary: &BatchEnqueueSummary) {
    for queued in &summary.queued {
        Output::list_item(&format!(
            "{} ({}) -> task {}",
            queued.external_id, queued.item_id, queued.task.id
        ));
    }
    for skipped in &summary.skipped {
        Output::list_item(&format!(
            "{} ({}) skipped: {}",
            skipped.external_id, skipped.item_id, skipped.status
        ));
    }
    for failed in &summary.failed {
        let who = match failed.item_id {
            Some(id) if failed.external_id.is_empty() => id.to_string(),
            Some(id) => format!("{} ({})", failed.external_id, id),
            None => failed.external_id.clone(),
        };
        Output::error(&format!("{}: {}", who, failed.message));
    }

    let line = format!(
        "Queued {}, skipped {}, failed {}",
        summary.queued.len(),
        summary.skipped.len(),
        summary.failed.len()
    );
    if summary.failed.is_empty() {
        Output::success(&line);
    } else {
        Output::warning(&line);
    }
}
