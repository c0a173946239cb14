//! Batch sync: register discovered items and queue the ones that need work.

use crate::catalog::{ItemStatus, ItemStore, NewItem, ProcessingItem};
use crate::queue::{TaskHandle, TaskMessage, TaskQueue};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

/// An item that was handed to the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedItem {
    pub item_id: i64,
    pub external_id: String,
    pub task: TaskHandle,
}

/// An item left alone because of its status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedItem {
    pub item_id: i64,
    pub external_id: String,
    pub status: ItemStatus,
}

/// A per-item failure during a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedItem {
    /// Internal ID, when the item got that far.
    pub item_id: Option<i64>,
    pub external_id: String,
    pub message: String,
}

/// Result of a batch enqueue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchEnqueueSummary {
    pub queued: Vec<QueuedItem>,
    pub skipped: Vec<SkippedItem>,
    pub failed: Vec<FailedItem>,
}

impl BatchEnqueueSummary {
    pub fn total(&self) -> usize {
        self.queued.len() + self.skipped.len() + self.failed.len()
    }
}

/// Enqueue every item in `SYNCED` or `ERROR`; anything mid-flight or
/// complete is skipped. Enqueue failures are collected per item.
#[instrument(skip(queue, items), fields(items = items.len()))]
pub async fn enqueue_eligible(
    queue: &dyn TaskQueue,
    queue_name: &str,
    items: &[ProcessingItem],
) -> BatchEnqueueSummary {
    let mut summary = BatchEnqueueSummary::default();

    for item in items {
        if !item.status.is_enqueueable() {
            summary.skipped.push(SkippedItem {
                item_id: item.id,
                external_id: item.external_id.clone(),
                status: item.status,
            });
            continue;
        }

        let message = TaskMessage::process_item(item.id, &item.external_id);
        match queue.enqueue(queue_name, &message).await {
            Ok(task) => summary.queued.push(QueuedItem {
                item_id: item.id,
                external_id: item.external_id.clone(),
                task,
            }),
            Err(e) => {
                warn!("Could not enqueue {}: {}", item.external_id, e);
                summary.failed.push(FailedItem {
                    item_id: Some(item.id),
                    external_id: item.external_id.clone(),
                    message: e.to_string(),
                });
            }
        }
    }

    info!(
        "Queued {} items ({} skipped, {} failed)",
        summary.queued.len(),
        summary.skipped.len(),
        summary.failed.len()
    );
    summary
}

/// Enqueue the eligible items among `item_ids`, looking each up first.
pub async fn enqueue_items(
    store: &dyn ItemStore,
    queue: &dyn TaskQueue,
    queue_name: &str,
    item_ids: &[i64],
) -> BatchEnqueueSummary {
    let (items, missing) = lookup_items(store, item_ids).await;
    let mut summary = enqueue_eligible(queue, queue_name, &items).await;
    summary.failed.extend(missing);
    summary
}

/// Queue a re-index for each of `item_ids` that is not mid-flight.
///
/// Unlike [`enqueue_items`], `COMPLETE` items are accepted: the worker runs
/// them with a forced re-index.
#[instrument(skip(store, queue, item_ids), fields(items = item_ids.len()))]
pub async fn enqueue_reindex(
    store: &dyn ItemStore,
    queue: &dyn TaskQueue,
    queue_name: &str,
    item_ids: &[i64],
) -> BatchEnqueueSummary {
    let (items, missing) = lookup_items(store, item_ids).await;
    let mut summary = BatchEnqueueSummary::default();

    for item in items {
        if item.status.is_in_flight() {
            summary.skipped.push(SkippedItem {
                item_id: item.id,
                external_id: item.external_id,
                status: item.status,
            });
            continue;
        }

        let message = TaskMessage::reindex_item(item.id, &item.external_id);
        match queue.enqueue(queue_name, &message).await {
            Ok(task) => summary.queued.push(QueuedItem {
                item_id: item.id,
                external_id: item.external_id,
                task,
            }),
            Err(e) => {
                warn!("Could not enqueue re-index of {}: {}", item.external_id, e);
                summary.failed.push(FailedItem {
                    item_id: Some(item.id),
                    external_id: item.external_id,
                    message: e.to_string(),
                });
            }
        }
    }

    summary.failed.extend(missing);
    info!(
        "Queued {} re-index tasks ({} skipped, {} failed)",
        summary.queued.len(),
        summary.skipped.len(),
        summary.failed.len()
    );
    summary
}

async fn lookup_items(store: &dyn ItemStore, item_ids: &[i64]) -> (Vec<ProcessingItem>, Vec<FailedItem>) {
    let mut items = Vec::with_capacity(item_ids.len());
    let mut missing = Vec::new();

    for &item_id in item_ids {
        match store.get(item_id).await {
            Ok(Some(item)) => items.push(item),
            Ok(None) => missing.push(FailedItem {
                item_id: Some(item_id),
                external_id: String::new(),
                message: format!("Item {} not found", item_id),
            }),
            Err(e) => missing.push(FailedItem {
                item_id: Some(item_id),
                external_id: String::new(),
                message: e.to_string(),
            }),
        }
    }

    (items, missing)
}

/// Register newly discovered items, then enqueue those that need work.
///
/// Items already known keep their pipeline state; only their metadata is
/// refreshed, so a complete item is not queued again.
#[instrument(skip(store, queue, discovered), fields(discovered = discovered.len()))]
pub async fn register_and_enqueue(
    store: &dyn ItemStore,
    queue: &dyn TaskQueue,
    queue_name: &str,
    discovered: &[NewItem],
) -> BatchEnqueueSummary {
    let mut registered = Vec::with_capacity(discovered.len());
    let mut failed = Vec::new();

    for item in discovered {
        match store.register(item).await {
            Ok(stored) => registered.push(stored),
            Err(e) => {
                warn!("Could not register {}: {}", item.external_id, e);
                failed.push(FailedItem {
                    item_id: None,
                    external_id: item.external_id.clone(),
                    message: e.to_string(),
                });
            }
        }
    }

    let mut summary = enqueue_eligible(queue, queue_name, &registered).await;
    summary.failed.extend(failed);
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SqliteCatalog;
    use crate::error::{ClipdexError, Result};
    use crate::queue::{
        LeasedTask, QueueCount, RetryPolicy, SqliteTaskQueue, TaskOperation, TaskRecord, TaskState,
    };
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn queue() -> SqliteTaskQueue {
        SqliteTaskQueue::in_memory(RetryPolicy {
            max_attempts: 3,
            backoff: Duration::ZERO,
        })
        .unwrap()
    }

    /// Refuses tasks for one external ID.
    struct PickyQueue {
        inner: SqliteTaskQueue,
        refuse: String,
    }

    #[async_trait]
    impl TaskQueue for PickyQueue {
        async fn enqueue(&self, queue: &str, message: &TaskMessage) -> Result<TaskHandle> {
            if message.external_id() == self.refuse {
                return Err(ClipdexError::Queue("queue is full".into()));
            }
            self.inner.enqueue(queue, message).await
        }

        async fn dequeue(&self, queues: &[String], worker_id: &str, lease: Duration) -> Result<Option<LeasedTask>> {
            self.inner.dequeue(queues, worker_id, lease).await
        }

        async fn complete(&self, task_id: &str, result: &str) -> Result<()> {
            self.inner.complete(task_id, result).await
        }

        async fn fail(&self, task_id: &str, error: &str) -> Result<TaskState> {
            self.inner.fail(task_id, error).await
        }

        async fn dead_letter(&self, task_id: &str, error: &str) -> Result<()> {
            self.inner.dead_letter(task_id, error).await
        }

        async fn task_status(&self, task_id: &str) -> Result<Option<TaskRecord>> {
            self.inner.task_status(task_id).await
        }

        async fn counts(&self) -> Result<Vec<QueueCount>> {
            self.inner.counts().await
        }

        async fn recover_expired(&self) -> Result<usize> {
            self.inner.recover_expired().await
        }
    }

    async fn catalog_with_states() -> SqliteCatalog {
        let catalog = SqliteCatalog::in_memory().unwrap();
        for external_id in ["fresh", "broken", "busy", "done"] {
            assert_ok!(catalog.register(&NewItem::new(external_id)).await);
        }
        let lease = Duration::from_secs(60);

        let broken = catalog.get_by_external_id("broken").await.unwrap().unwrap();
        assert_ok!(catalog.claim_stage(broken.id, ItemStatus::AudioDownloading, lease).await);
        assert_ok!(catalog.mark_error(broken.id, "video unavailable").await);

        let busy = catalog.get_by_external_id("busy").await.unwrap().unwrap();
        assert_ok!(catalog.claim_stage(busy.id, ItemStatus::AudioDownloading, lease).await);

        let done = catalog.get_by_external_id("done").await.unwrap().unwrap();
        assert_ok!(catalog.claim_stage(done.id, ItemStatus::AudioDownloading, lease).await);
        assert_ok!(catalog.record_audio(done.id, "audio/done.mp3").await);
        assert_ok!(catalog.claim_stage(done.id, ItemStatus::Transcribing, lease).await);
        assert_ok!(catalog.record_transcript(done.id, "transcripts/done.json").await);
        assert_ok!(catalog.claim_stage(done.id, ItemStatus::Indexing, lease).await);
        assert_ok!(catalog.mark_complete(done.id).await);

        catalog
    }

    #[tokio::test]
    async fn test_only_synced_and_error_items_are_queued() {
        let catalog = catalog_with_states().await;
        let queue = queue();
        let items = catalog.list(None).await.unwrap();

        let summary = enqueue_eligible(&queue, "ingest", &items).await;

        let queued: Vec<_> = summary.queued.iter().map(|q| q.external_id.as_str()).collect();
        assert_eq!(queued, vec!["fresh", "broken"]);
        let skipped: Vec<_> = summary.skipped.iter().map(|s| (s.external_id.as_str(), s.status)).collect();
        assert_eq!(
            skipped,
            vec![("busy", ItemStatus::AudioDownloading), ("done", ItemStatus::Complete)]
        );
        assert!(summary.failed.is_empty());
        assert_eq!(summary.total(), 4);

        for q in &summary.queued {
            let record = queue.task_status(&q.task.id).await.unwrap().unwrap();
            assert_eq!(record.state, TaskState::Queued);
            let message = TaskMessage::from_json(&record.payload).unwrap();
            assert_eq!(message.args, (q.item_id, q.external_id.clone()));
        }
    }

    #[tokio::test]
    async fn test_enqueue_failures_are_collected() {
        let catalog = catalog_with_states().await;
        let queue = PickyQueue {
            inner: queue(),
            refuse: "broken".into(),
        };
        let items = catalog.list(Some(ItemStatus::Error)).await.unwrap();
        let fresh = catalog.list(Some(ItemStatus::Synced)).await.unwrap();
        let all: Vec<_> = items.into_iter().chain(fresh).collect();

        let summary = enqueue_eligible(&queue, "ingest", &all).await;
        assert_eq!(summary.queued.len(), 1);
        assert_eq!(summary.queued[0].external_id, "fresh");
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].external_id, "broken");
        assert!(summary.failed[0].message.contains("queue is full"));
        assert_err!(queue.enqueue("ingest", &TaskMessage::process_item(1, "broken")).await);
    }

    #[tokio::test]
    async fn test_enqueue_items_reports_missing_ids() {
        let catalog = catalog_with_states().await;
        let queue = queue();
        let fresh = catalog.get_by_external_id("fresh").await.unwrap().unwrap();

        let summary = enqueue_items(&catalog, &queue, "ingest", &[fresh.id, 999]).await;
        assert_eq!(summary.queued.len(), 1);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].item_id, Some(999));
    }

    #[tokio::test]
    async fn test_register_and_enqueue() {
        let catalog = catalog_with_states().await;
        let queue = queue();

        let discovered = vec![
            NewItem::new("newcomer").with_title("New upload").with_metrics(10, 1),
            NewItem::new("done").with_metrics(5000, 300),
            NewItem::new("bad id!"),
        ];
        let summary = register_and_enqueue(&catalog, &queue, "ingest", &discovered).await;

        assert_eq!(summary.queued.len(), 1);
        assert_eq!(summary.queued[0].external_id, "newcomer");
        assert_eq!(summary.skipped.len(), 1);
        assert_eq!(summary.skipped[0].status, ItemStatus::Complete);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].item_id, None);

        // Metrics refreshed without touching pipeline state
        let done = catalog.get_by_external_id("done").await.unwrap().unwrap();
        assert_eq!(done.views, 5000);
        assert_eq!(done.status, ItemStatus::Complete);
    }

    #[tokio::test]
    async fn test_enqueue_reindex() {
        let catalog = catalog_with_states().await;
        let queue = queue();
        let done = catalog.get_by_external_id("done").await.unwrap().unwrap();
        let busy = catalog.get_by_external_id("busy").await.unwrap().unwrap();
        let broken = catalog.get_by_external_id("broken").await.unwrap().unwrap();

        let summary = enqueue_reindex(&catalog, &queue, "ingest", &[done.id, busy.id, broken.id, 999]).await;

        let queued: Vec<_> = summary.queued.iter().map(|q| q.external_id.as_str()).collect();
        assert_eq!(queued, vec!["done", "broken"]);
        assert_eq!(summary.skipped.len(), 1);
        assert_eq!(summary.skipped[0].external_id, "busy");
        assert_eq!(summary.skipped[0].status, ItemStatus::AudioDownloading);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].item_id, Some(999));

        let record = queue.task_status(&summary.queued[0].task.id).await.unwrap().unwrap();
        let message = TaskMessage::from_json(&record.payload).unwrap();
        assert_eq!(message.operation, TaskOperation::ReindexItem);
        assert_eq!(message.args, (done.id, "done".to_string()));

        // Items stay where they were until a worker picks the task up
        let done = catalog.get(done.id).await.unwrap().unwrap();
        assert_eq!(done.status, ItemStatus::Complete);
    }
}
