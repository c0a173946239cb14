//! Delete command implementation.

use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::Orchestrator;
use anyhow::Result;

/// Run the delete command.
pub async fn run_delete(item_id: i64, settings: &Settings) -> Result<()> {
    let orchestrator = Orchestrator::new(settings)?;

    match orchestrator.forget_item(item_id).await {
        Ok(removed) => {
            Output::success(&format!("Deleted item {} ({} chunks removed)", item_id, removed));
            Ok(())
        }
        Err(e) => {
            Output::error(&format!("Failed to delete item {}: {}", item_id, e));
            Err(e.into())
        }
    }
}
