//! Worker command implementation.

use super::open_queue;
use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::Orchestrator;
use crate::queue::{run_workers, TaskQueue, Worker};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::warn;

/// Run queue workers until Ctrl-C.
pub async fn run_worker(queues: Vec<String>, workers: Option<usize>, settings: &Settings) -> Result<()> {
    preflight::check(Operation::Process)?;

    let mut queue_settings = settings.queue.clone();
    if !queues.is_empty() {
        queue_settings.queues = queues;
    }
    let count = workers.unwrap_or(queue_settings.workers).max(1);

    let orchestrator = Arc::new(Orchestrator::new(settings)?);
    let queue: Arc<dyn TaskQueue> = Arc::new(open_queue(settings)?);

    let recovered = queue.recover_expired().await?;
    if recovered > 0 {
        Output::warning(&format!("Recovered {} tasks left running by a previous worker", recovered));
    }

    let pid = std::process::id();
    let pool: Vec<Worker> = (0..count)
        .map(|i| {
            Worker::new(
                format!("{}-{}", pid, i),
                queue.clone(),
                orchestrator.clone(),
                &queue_settings,
            )
        })
        .collect();

    Output::info(&format!(
        "Starting {} workers on {}. Press Ctrl-C to stop.",
        count,
        queue_settings.queues.join(", ")
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Could not listen for Ctrl-C: {}", e);
            // Keep the sender alive so the workers keep running
            futures::future::pending::<()>().await;
        }
        Output::info("Shutting down after current tasks...");
        let _ = shutdown_tx.send(true);
    });

    run_workers(pool, shutdown_rx).await;
    Output::success("Workers stopped.");
    Ok(())
}
