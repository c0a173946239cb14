//! Process command implementation.

use crate::catalog::ItemStore;
use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::{Orchestrator, ProcessOptions, ProcessOutcome};
use anyhow::Result;

/// Run the pipeline for one item in the foreground.
pub async fn run_process(item_id: i64, force_reindex: bool, settings: &Settings) -> Result<()> {
    preflight::check(Operation::Process)?;

    let orchestrator = Orchestrator::new(settings)?;
    let item = orchestrator
        .catalog()
        .get(item_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Item {} not found", item_id))?;

    let spinner = Output::spinner(&format!("Processing {}...", item.external_id));
    let outcome = orchestrator
        .process_item(item_id, &item.external_id, ProcessOptions { force_reindex })
        .await;
    spinner.finish_and_clear();

    match outcome? {
        ProcessOutcome::Completed(report) => {
            Output::success(&format!("Indexed {}", report.external_id));
            let ran: Vec<_> = report.stages_run.iter().map(|s| s.as_str()).collect();
            let skipped: Vec<_> = report.stages_skipped.iter().map(|s| s.as_str()).collect();
            Output::kv("Stages run", &ran.join(", "));
            if !skipped.is_empty() {
                Output::kv("Stages skipped", &skipped.join(", "));
            }
            Output::kv("Chunks", &report.chunks_indexed.to_string());
            if let Some(key) = &report.transcript_key {
                Output::kv("Transcript", key);
            }
        }
        ProcessOutcome::AlreadyComplete(report) => {
            Output::info(&format!(
                "{} is already complete. Use --force-reindex to index it again.",
                report.external_id
            ));
        }
        ProcessOutcome::Failed(failure) => {
            Output::error(&format!("{} stage failed: {}", failure.stage, failure.message));
            anyhow::bail!("processing {} failed", item.external_id);
        }
    }

    Ok(())
}
