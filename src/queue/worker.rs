//! Queue workers that drive items through the orchestrator.

use super::{LeasedTask, TaskOperation, TaskQueue, TaskState};
use crate::config::QueueSettings;
use crate::error::Result;
use crate::orchestrator::{Orchestrator, ProcessOptions, ProcessOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

/// What a worker did with a task.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// The pipeline ran; the task was acknowledged with its outcome.
    Acked(ProcessOutcome),
    /// An infrastructure error; the task goes back to the queue or, when out
    /// of attempts, to the dead letters.
    Failed { error: String, state: TaskState },
    /// The task can never succeed (malformed message, unknown item).
    DeadLettered(String),
}

/// A single queue consumer.
pub struct Worker {
    id: String,
    queue: Arc<dyn TaskQueue>,
    orchestrator: Arc<Orchestrator>,
    queues: Vec<String>,
    lease: Duration,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        queue: Arc<dyn TaskQueue>,
        orchestrator: Arc<Orchestrator>,
        settings: &QueueSettings,
    ) -> Self {
        Self {
            id: id.into(),
            queue,
            orchestrator,
            queues: settings.queues.clone(),
            lease: Duration::from_secs(settings.lease_seconds),
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Lease and handle at most one task. `None` when no task is ready.
    pub async fn run_once(&self) -> Result<Option<Disposition>> {
        let Some(task) = self.queue.dequeue(&self.queues, &self.id, self.lease).await? else {
            return Ok(None);
        };
        self.handle(task).await.map(Some)
    }

    #[instrument(skip(self, task), fields(worker = %self.id, task = %task.id, attempt = task.attempt))]
    async fn handle(&self, task: LeasedTask) -> Result<Disposition> {
        let message = match task.message() {
            Ok(message) => message,
            Err(e) => {
                let reason = e.to_string();
                self.queue.dead_letter(&task.id, &reason).await?;
                return Ok(Disposition::DeadLettered(reason));
            }
        };

        let options = match message.operation {
            TaskOperation::ProcessItem => ProcessOptions::default(),
            TaskOperation::ReindexItem => ProcessOptions::reindex(),
        };

        debug!("Processing item {} ({})", message.item_id(), message.external_id());
        match self
            .orchestrator
            .process_item(message.item_id(), message.external_id(), options)
            .await
        {
            Ok(outcome) => {
                let result = serde_json::to_string(&outcome)?;
                self.queue.complete(&task.id, &result).await?;
                if outcome.is_success() {
                    info!("Task {} done for {}", task.id, message.external_id());
                } else {
                    info!("Task {} done; item {} failed", task.id, message.external_id());
                }
                Ok(Disposition::Acked(outcome))
            }
            Err(e) if e.is_item_scoped() => {
                let reason = e.to_string();
                self.queue.dead_letter(&task.id, &reason).await?;
                Ok(Disposition::DeadLettered(reason))
            }
            Err(e) => {
                let error = e.to_string();
                let state = self.queue.fail(&task.id, &error).await?;
                warn!("Task {} failed ({}): {}", task.id, state, error);
                Ok(Disposition::Failed { error, state })
            }
        }
    }

    /// Consume tasks until `shutdown` turns true. A task in progress is
    /// finished before the worker stops.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Worker {} listening on {:?}", self.id, self.queues);

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_once().await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => error!("Worker {} error: {}", self.id, e),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Worker {} stopped", self.id);
    }
}

/// Run `workers` concurrently until `shutdown` turns true.
pub async fn run_workers(workers: Vec<Worker>, shutdown: watch::Receiver<bool>) {
    let mut set = JoinSet::new();
    for worker in workers {
        let shutdown = shutdown.clone();
        set.spawn(async move { worker.run(shutdown).await });
    }

    while let Some(joined) = set.join_next().await {
        if let Err(e) = joined {
            error!("Worker task panicked: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ItemStatus, ItemStore, NewItem};
    use crate::orchestrator::tests::{harness, Harness};
    use crate::queue::{RetryPolicy, SqliteTaskQueue, TaskMessage};

    fn settings() -> QueueSettings {
        QueueSettings {
            poll_interval_ms: 10,
            ..QueueSettings::default()
        }
    }

    fn setup() -> (Harness, Arc<SqliteTaskQueue>, Worker) {
        let h = harness();
        let queue = Arc::new(
            SqliteTaskQueue::in_memory(RetryPolicy {
                max_attempts: 3,
                backoff: Duration::ZERO,
            })
            .unwrap(),
        );
        let worker = Worker::new("w1", queue.clone(), h.orchestrator.clone(), &settings());
        (h, queue, worker)
    }

    #[tokio::test]
    async fn test_run_once_processes_item() {
        let (h, queue, worker) = setup();
        let item = h.catalog.register(&NewItem::new("abc123")).await.unwrap();
        let handle = queue
            .enqueue("ingest", &TaskMessage::process_item(item.id, "abc123"))
            .await
            .unwrap();

        let disposition = worker.run_once().await.unwrap().unwrap();
        assert!(matches!(disposition, Disposition::Acked(ProcessOutcome::Completed(_))));
        assert!(worker.run_once().await.unwrap().is_none());

        let record = queue.task_status(&handle.id).await.unwrap().unwrap();
        assert_eq!(record.state, TaskState::Done);
        assert!(record.result.unwrap().contains("\"outcome\":\"completed\""));
        assert_eq!(h.catalog.status(item.id).await.unwrap().unwrap().status, ItemStatus::Complete);
    }

    #[tokio::test]
    async fn test_stage_failure_is_acked() {
        let (h, queue, worker) = setup();
        h.fetcher.set_failing(true);
        let item = h.catalog.register(&NewItem::new("abc123")).await.unwrap();
        let handle = queue
            .enqueue("ingest", &TaskMessage::process_item(item.id, "abc123"))
            .await
            .unwrap();

        let disposition = worker.run_once().await.unwrap().unwrap();
        assert!(matches!(disposition, Disposition::Acked(ProcessOutcome::Failed(_))));

        let record = queue.task_status(&handle.id).await.unwrap().unwrap();
        assert_eq!(record.state, TaskState::Done);
        assert_eq!(record.attempts, 1);
        let view = h.catalog.status(item.id).await.unwrap().unwrap();
        assert_eq!(view.status, ItemStatus::Error);
        assert!(view.error.unwrap().contains("video unavailable"));
    }

    #[tokio::test]
    async fn test_reindex_task_reruns_index_stage() {
        let (h, queue, worker) = setup();
        let item = h.catalog.register(&NewItem::new("abc123")).await.unwrap();
        queue.enqueue("ingest", &TaskMessage::process_item(item.id, "abc123")).await.unwrap();
        worker.run_once().await.unwrap().unwrap();

        queue.enqueue("ingest", &TaskMessage::reindex_item(item.id, "abc123")).await.unwrap();
        match worker.run_once().await.unwrap().unwrap() {
            Disposition::Acked(ProcessOutcome::Completed(report)) => {
                assert_eq!(report.chunks_indexed, 3);
                assert_eq!(report.stages_run.len(), 1);
            }
            other => panic!("unexpected disposition {:?}", other),
        }
        assert_eq!(h.fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_unknown_item_and_malformed_message_are_dead_lettered() {
        let (_h, queue, worker) = setup();
        let missing = queue
            .enqueue("ingest", &TaskMessage::process_item(404, "nothing"))
            .await
            .unwrap();
        let garbage = queue.enqueue_raw("ingest", "{\"operation\":\"drop_tables\"}").unwrap();

        assert!(matches!(
            worker.run_once().await.unwrap().unwrap(),
            Disposition::DeadLettered(_)
        ));
        assert!(matches!(
            worker.run_once().await.unwrap().unwrap(),
            Disposition::DeadLettered(_)
        ));

        for handle in [missing, garbage] {
            let record = queue.task_status(&handle.id).await.unwrap().unwrap();
            assert_eq!(record.state, TaskState::Dead);
            assert!(record.last_error.is_some());
        }
    }

    #[tokio::test]
    async fn test_pool_drains_queue_and_stops() {
        let (h, queue, _worker) = setup();
        let mut ids = Vec::new();
        for external_id in ["one", "two", "three"] {
            let item = h.catalog.register(&NewItem::new(external_id)).await.unwrap();
            queue
                .enqueue("ingest", &TaskMessage::process_item(item.id, external_id))
                .await
                .unwrap();
            ids.push(item.id);
        }

        let workers = (0..2)
            .map(|i| {
                Worker::new(format!("w{}", i), queue.clone(), h.orchestrator.clone(), &settings())
            })
            .collect();
        let (tx, rx) = watch::channel(false);
        let pool = tokio::spawn(run_workers(workers, rx));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let counts = queue.counts().await.unwrap();
            if counts.len() == 1 && counts[0].state == TaskState::Done && counts[0].count == 3 {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "queue not drained: {:?}", counts);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), pool)
            .await
            .unwrap()
            .unwrap();

        for id in ids {
            assert_eq!(h.catalog.status(id).await.unwrap().unwrap().status, ItemStatus::Complete);
        }
    }
}
