//! Durable task queue for pipeline work.
//!
//! Producers enqueue a [`TaskMessage`] and get a [`TaskHandle`] back
//! immediately; workers lease tasks, run them and acknowledge the outcome.
//! Delivery is at-least-once: a task whose lease runs out before it is
//! acknowledged becomes available again.

mod sqlite;
mod worker;

pub use sqlite::SqliteTaskQueue;
pub use worker::{run_workers, Worker};

use crate::catalog::{ItemStatus, ItemStatusView, ItemStore};
use crate::config::QueueSettings;
use crate::error::{ClipdexError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Operations a task can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskOperation {
    /// Run the pipeline for an item.
    #[serde(rename = "pipeline.process_item")]
    ProcessItem,
    /// Re-index an item, even if it is already complete.
    #[serde(rename = "pipeline.reindex_item")]
    ReindexItem,
}

impl TaskOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskOperation::ProcessItem => "pipeline.process_item",
            TaskOperation::ReindexItem => "pipeline.reindex_item",
        }
    }
}

/// A queued unit of work: an operation name and `(item_id, external_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub operation: TaskOperation,
    pub args: (i64, String),
}

impl TaskMessage {
    pub fn process_item(item_id: i64, external_id: &str) -> Self {
        Self {
            operation: TaskOperation::ProcessItem,
            args: (item_id, external_id.to_string()),
        }
    }

    pub fn reindex_item(item_id: i64, external_id: &str) -> Self {
        Self {
            operation: TaskOperation::ReindexItem,
            args: (item_id, external_id.to_string()),
        }
    }

    pub fn item_id(&self) -> i64 {
        self.args.0
    }

    pub fn external_id(&self) -> &str {
        &self.args.1
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(payload: &str) -> Result<Self> {
        serde_json::from_str(payload)
            .map_err(|e| ClipdexError::Queue(format!("Malformed task message: {}", e)))
    }
}

/// Returned by `enqueue`; the only reference a producer keeps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHandle {
    pub id: String,
    pub queue: String,
}

/// Lifecycle of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Waiting for a worker (possibly after a failed attempt).
    Queued,
    /// Leased by a worker.
    Running,
    /// Acknowledged.
    Done,
    /// Out of attempts or undeliverable.
    Dead,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Queued => "queued",
            TaskState::Running => "running",
            TaskState::Done => "done",
            TaskState::Dead => "dead",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = ClipdexError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(TaskState::Queued),
            "running" => Ok(TaskState::Running),
            "done" => Ok(TaskState::Done),
            "dead" => Ok(TaskState::Dead),
            other => Err(ClipdexError::Queue(format!("Unknown task state: {}", other))),
        }
    }
}

/// A task handed to a worker.
#[derive(Debug, Clone)]
pub struct LeasedTask {
    pub id: String,
    pub queue: String,
    /// Raw JSON message.
    pub payload: String,
    /// Delivery attempt, starting at 1.
    pub attempt: u32,
}

impl LeasedTask {
    pub fn message(&self) -> Result<TaskMessage> {
        TaskMessage::from_json(&self.payload)
    }
}

/// Stored state of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub queue: String,
    pub payload: String,
    pub state: TaskState,
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    /// Serialized outcome, once acknowledged.
    pub result: Option<String>,
    pub worker_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Number of tasks in one state of one queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCount {
    pub queue: String,
    pub state: TaskState,
    pub count: usize,
}

/// Redelivery rules for failed tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts before a task is dead-lettered.
    pub max_attempts: u32,
    /// Added to the redelivery delay per attempt made.
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Delay before the next delivery after `attempts` failed attempts.
    pub fn delay_after(&self, attempts: u32) -> Duration {
        self.backoff * attempts
    }
}

impl From<&QueueSettings> for RetryPolicy {
    fn from(settings: &QueueSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            backoff: Duration::from_secs(settings.retry_backoff_seconds),
        }
    }
}

/// A durable task queue.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Schedule a message on `queue` and return at once.
    async fn enqueue(&self, queue: &str, message: &TaskMessage) -> Result<TaskHandle>;

    /// Lease the oldest available task on any of `queues`.
    async fn dequeue(&self, queues: &[String], worker_id: &str, lease: Duration) -> Result<Option<LeasedTask>>;

    /// Acknowledge a task with its serialized result.
    async fn complete(&self, task_id: &str, result: &str) -> Result<()>;

    /// Record a failed attempt. The task is redelivered after a backoff, or
    /// dead-lettered once it is out of attempts. Returns the new state.
    async fn fail(&self, task_id: &str, error: &str) -> Result<TaskState>;

    /// Give up on a task without further attempts.
    async fn dead_letter(&self, task_id: &str, error: &str) -> Result<()>;

    /// Look up a task.
    async fn task_status(&self, task_id: &str) -> Result<Option<TaskRecord>>;

    /// Task counts per queue and state.
    async fn counts(&self) -> Result<Vec<QueueCount>>;

    /// Return tasks whose lease ran out to the queue. Returns how many moved.
    async fn recover_expired(&self) -> Result<usize>;
}

/// What a caller waiting on an item learned.
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome {
    /// The item is `COMPLETE`.
    Complete(ItemStatusView),
    /// The item failed after the wait began.
    Failed(ItemStatusView),
    /// No terminal status within the time limit. Not a failure: poll again.
    Unknown(Option<ItemStatusView>),
}

/// Poll an item's status until it completes or fails after `since`, or
/// `timeout` elapses. Outcomes written before `since` belong to an earlier
/// run and are not reported.
pub async fn wait_for_item(
    store: &dyn ItemStore,
    item_id: i64,
    since: DateTime<Utc>,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<WaitOutcome> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let view = store.status(item_id).await?;
        match &view {
            None => return Err(ClipdexError::NotFound(format!("Item {}", item_id))),
            Some(v) if v.status == ItemStatus::Complete && v.indexed_at.is_some_and(|t| t >= since) => {
                return Ok(WaitOutcome::Complete(v.clone()))
            }
            Some(v) if v.status == ItemStatus::Error && v.updated_at >= since => {
                return Ok(WaitOutcome::Failed(v.clone()))
            }
            Some(_) => {}
        }

        if tokio::time::Instant::now() + poll_interval > deadline {
            return Ok(WaitOutcome::Unknown(view));
        }
        tokio::time::sleep(poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{NewItem, SqliteCatalog};

    #[test]
    fn test_message_wire_format() {
        let message = TaskMessage::process_item(42, "abc123");
        let json = message.to_json().unwrap();
        assert_eq!(json, r#"{"operation":"pipeline.process_item","args":[42,"abc123"]}"#);
        assert_eq!(TaskMessage::from_json(&json).unwrap(), message);

        let reindex = TaskMessage::from_json(r#"{"operation":"pipeline.reindex_item","args":[1,"x"]}"#).unwrap();
        assert_eq!(reindex.operation, TaskOperation::ReindexItem);
        assert_eq!(reindex.item_id(), 1);
        assert_eq!(reindex.external_id(), "x");

        assert!(TaskMessage::from_json(r#"{"operation":"pipeline.explode","args":[1,"x"]}"#).is_err());
        assert!(TaskMessage::from_json("not json").is_err());
    }

    #[test]
    fn test_retry_policy() {
        let policy = RetryPolicy::from(&QueueSettings::default());
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_after(2), Duration::from_secs(60));
    }

    #[test]
    fn test_task_state_round_trip() {
        for state in [TaskState::Queued, TaskState::Running, TaskState::Done, TaskState::Dead] {
            assert_eq!(state.as_str().parse::<TaskState>().unwrap(), state);
        }
        assert!("lost".parse::<TaskState>().is_err());
    }

    #[tokio::test]
    async fn test_wait_times_out_as_unknown() {
        let catalog = SqliteCatalog::in_memory().unwrap();
        let item = catalog.register(&NewItem::new("abc123")).await.unwrap();

        let outcome = wait_for_item(
            &catalog,
            item.id,
            Utc::now(),
            Duration::from_millis(30),
            Duration::from_millis(10),
        )
        .await
        .unwrap();

        match outcome {
            WaitOutcome::Unknown(Some(view)) => assert_eq!(view.status, ItemStatus::Synced),
            other => panic!("expected unknown, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wait_ignores_earlier_errors() {
        let catalog = SqliteCatalog::in_memory().unwrap();
        let item = catalog.register(&NewItem::new("abc123")).await.unwrap();
        catalog
            .claim_stage(item.id, ItemStatus::AudioDownloading, Duration::from_secs(60))
            .await
            .unwrap();
        catalog.mark_error(item.id, "old failure").await.unwrap();

        let since = Utc::now() + chrono::Duration::seconds(1);
        let outcome = wait_for_item(&catalog, item.id, since, Duration::ZERO, Duration::from_millis(5))
            .await
            .unwrap();
        assert!(matches!(outcome, WaitOutcome::Unknown(_)));

        let outcome = wait_for_item(
            &catalog,
            item.id,
            Utc::now() - chrono::Duration::seconds(60),
            Duration::ZERO,
            Duration::from_millis(5),
        )
        .await
        .unwrap();
        match outcome {
            WaitOutcome::Failed(view) => assert_eq!(view.error.as_deref(), Some("old failure")),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wait_ignores_earlier_completion() {
        let catalog = SqliteCatalog::in_memory().unwrap();
        let item = catalog.register(&NewItem::new("abc123")).await.unwrap();
        let lease = Duration::from_secs(60);
        catalog.claim_stage(item.id, ItemStatus::AudioDownloading, lease).await.unwrap();
        catalog.record_audio(item.id, "audio/abc123.mp3").await.unwrap();
        catalog.claim_stage(item.id, ItemStatus::Transcribing, lease).await.unwrap();
        catalog.record_transcript(item.id, "transcripts/abc123.json").await.unwrap();
        catalog.claim_stage(item.id, ItemStatus::Indexing, lease).await.unwrap();
        catalog.mark_complete(item.id).await.unwrap();

        // Re-index queued after the item completed: no worker has run yet
        let since = Utc::now();
        let outcome = wait_for_item(
            &catalog,
            item.id,
            since,
            Duration::from_millis(30),
            Duration::from_millis(10),
        )
        .await
        .unwrap();
        match outcome {
            WaitOutcome::Unknown(Some(view)) => assert_eq!(view.status, ItemStatus::Complete),
            other => panic!("expected unknown, got {:?}", other),
        }

        catalog.claim_stage(item.id, ItemStatus::Indexing, lease).await.unwrap();
        catalog.mark_complete(item.id).await.unwrap();
        let outcome = wait_for_item(&catalog, item.id, since, Duration::ZERO, Duration::from_millis(5))
            .await
            .unwrap();
        match outcome {
            WaitOutcome::Complete(view) => assert!(view.indexed_at.unwrap() >= since),
            other => panic!("expected complete, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wait_unknown_item() {
        let catalog = SqliteCatalog::in_memory().unwrap();
        let err = wait_for_item(&catalog, 9, Utc::now(), Duration::ZERO, Duration::from_millis(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ClipdexError::NotFound(_)));
    }
}
