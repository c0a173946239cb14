//! SQLite-backed task queue.
//!
//! Leasing is a single `IMMEDIATE` transaction, so two workers sharing the
//! database file never lease the same task at the same time. Times used for
//! scheduling are stored as INTEGER milliseconds.

use super::{LeasedTask, QueueCount, RetryPolicy, TaskHandle, TaskMessage, TaskQueue, TaskRecord, TaskState};
use crate::error::{ClipdexError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS tasks (
        id TEXT PRIMARY KEY,
        queue TEXT NOT NULL,
        payload TEXT NOT NULL,
        state TEXT NOT NULL DEFAULT 'queued',
        attempts INTEGER NOT NULL DEFAULT 0,
        max_attempts INTEGER NOT NULL,
        available_at INTEGER NOT NULL,
        leased_until INTEGER,
        worker_id TEXT,
        last_error TEXT,
        result TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_tasks_ready ON tasks(queue, state, available_at);
"#;

const COLUMNS: &str = "id, queue, payload, state, attempts, max_attempts, last_error, result, \
     worker_id, created_at, updated_at";

/// Puts `running` tasks with a lapsed lease back in the queue, or buries
/// them if that was their last attempt.
const RECOVER_SQL: &str = r#"
    UPDATE tasks SET
        state = CASE WHEN attempts >= max_attempts THEN 'dead' ELSE 'queued' END,
        last_error = COALESCE(last_error, 'lease expired'),
        leased_until = NULL,
        worker_id = NULL,
        updated_at = ?2
    WHERE state = 'running' AND leased_until <= ?1
"#;

/// SQLite task queue.
pub struct SqliteTaskQueue {
    conn: Mutex<Connection>,
    policy: RetryPolicy,
}

impl SqliteTaskQueue {
    /// Open (or create) the queue at `path`.
    #[instrument(skip_all)]
    pub fn new(path: &Path, busy_timeout: Duration, policy: RetryPolicy) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch(SCHEMA)?;

        info!("Opened task queue at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
            policy,
        })
    }

    /// Create an in-memory queue (useful for testing).
    pub fn in_memory(policy: RetryPolicy) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            policy,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| ClipdexError::Queue(format!("Failed to acquire lock: {}", e)))
    }

    fn parse_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    fn millis(duration: Duration) -> i64 {
        i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
    }

    fn row_to_record(row: &Row<'_>) -> rusqlite::Result<TaskRecord> {
        let state: String = row.get(3)?;
        let created_at: String = row.get(9)?;
        let updated_at: String = row.get(10)?;

        Ok(TaskRecord {
            id: row.get(0)?,
            queue: row.get(1)?,
            payload: row.get(2)?,
            state: state.parse().unwrap_or(TaskState::Dead),
            attempts: row.get(4)?,
            max_attempts: row.get(5)?,
            last_error: row.get(6)?,
            result: row.get(7)?,
            worker_id: row.get(8)?,
            created_at: Self::parse_time(&created_at),
            updated_at: Self::parse_time(&updated_at),
        })
    }

    /// Insert a raw payload, bypassing message validation.
    #[cfg(test)]
    pub(crate) fn enqueue_raw(&self, queue: &str, payload: &str) -> Result<TaskHandle> {
        self.insert(queue, payload)
    }

    fn insert(&self, queue: &str, payload: &str) -> Result<TaskHandle> {
        let conn = self.lock()?;
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        conn.execute(
            r#"
            INSERT INTO tasks (id, queue, payload, state, attempts, max_attempts, available_at,
                               created_at, updated_at)
            VALUES (?1, ?2, ?3, 'queued', 0, ?4, ?5, ?6, ?6)
            "#,
            params![
                id,
                queue,
                payload,
                self.policy.max_attempts,
                now.timestamp_millis(),
                now.to_rfc3339(),
            ],
        )?;
        Ok(TaskHandle {
            id,
            queue: queue.to_string(),
        })
    }
}

#[async_trait]
impl TaskQueue for SqliteTaskQueue {
    #[instrument(skip(self, message), fields(operation = ?message.operation, item_id = message.item_id()))]
    async fn enqueue(&self, queue: &str, message: &TaskMessage) -> Result<TaskHandle> {
        if queue.trim().is_empty() {
            return Err(ClipdexError::InvalidInput("Queue name is empty".into()));
        }
        let handle = self.insert(queue, &message.to_json()?)?;
        debug!("Enqueued task {} on {}", handle.id, queue);
        Ok(handle)
    }

    async fn dequeue(&self, queues: &[String], worker_id: &str, lease: Duration) -> Result<Option<LeasedTask>> {
        if queues.is_empty() {
            return Ok(None);
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = Utc::now();
        let now_ms = now.timestamp_millis();

        let recovered = tx.execute(RECOVER_SQL, params![now_ms, now.to_rfc3339()])?;
        if recovered > 0 {
            warn!("Recovered {} tasks with expired leases", recovered);
        }

        let placeholders = (0..queues.len())
            .map(|i| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT id, queue, payload, attempts FROM tasks \
             WHERE state = 'queued' AND available_at <= ?1 AND queue IN ({}) \
             ORDER BY available_at, rowid LIMIT 1",
            placeholders
        );
        let mut values = vec![Value::Integer(now_ms)];
        values.extend(queues.iter().map(|q| Value::Text(q.clone())));

        let candidate = tx
            .query_row(&sql, params_from_iter(values.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, u32>(3)?,
                ))
            })
            .optional()?;

        let Some((id, queue, payload, attempts)) = candidate else {
            tx.commit()?;
            return Ok(None);
        };

        tx.execute(
            "UPDATE tasks SET state = 'running', attempts = attempts + 1, leased_until = ?1, \
             worker_id = ?2, updated_at = ?3 WHERE id = ?4",
            params![now_ms.saturating_add(Self::millis(lease)), worker_id, now.to_rfc3339(), id],
        )?;
        tx.commit()?;

        debug!("Worker {} leased task {} (attempt {})", worker_id, id, attempts + 1);
        Ok(Some(LeasedTask {
            id,
            queue,
            payload,
            attempt: attempts + 1,
        }))
    }

    async fn complete(&self, task_id: &str, result: &str) -> Result<()> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE tasks SET state = 'done', result = ?1, leased_until = NULL, updated_at = ?2 \
             WHERE id = ?3",
            params![result, Utc::now().to_rfc3339(), task_id],
        )?;
        if updated == 0 {
            return Err(ClipdexError::NotFound(format!("Task {}", task_id)));
        }
        Ok(())
    }

    async fn fail(&self, task_id: &str, error: &str) -> Result<TaskState> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let (attempts, max_attempts): (u32, u32) = tx
            .query_row(
                "SELECT attempts, max_attempts FROM tasks WHERE id = ?1",
                params![task_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .ok_or_else(|| ClipdexError::NotFound(format!("Task {}", task_id)))?;

        let now = Utc::now();
        let state = if attempts >= max_attempts {
            TaskState::Dead
        } else {
            TaskState::Queued
        };
        let available_at = now
            .timestamp_millis()
            .saturating_add(Self::millis(self.policy.delay_after(attempts)));

        tx.execute(
            "UPDATE tasks SET state = ?1, last_error = ?2, available_at = ?3, leased_until = NULL, \
             worker_id = NULL, updated_at = ?4 WHERE id = ?5",
            params![state.as_str(), error, available_at, now.to_rfc3339(), task_id],
        )?;
        tx.commit()?;

        match state {
            TaskState::Dead => warn!("Task {} dead after {} attempts: {}", task_id, attempts, error),
            _ => debug!("Task {} will be retried (attempt {} of {})", task_id, attempts, max_attempts),
        }
        Ok(state)
    }

    async fn dead_letter(&self, task_id: &str, error: &str) -> Result<()> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE tasks SET state = 'dead', last_error = ?1, leased_until = NULL, updated_at = ?2 \
             WHERE id = ?3",
            params![error, Utc::now().to_rfc3339(), task_id],
        )?;
        if updated == 0 {
            return Err(ClipdexError::NotFound(format!("Task {}", task_id)));
        }
        warn!("Task {} dead-lettered: {}", task_id, error);
        Ok(())
    }

    async fn task_status(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM tasks WHERE id = ?1", COLUMNS);
        Ok(conn
            .query_row(&sql, params![task_id], Self::row_to_record)
            .optional()?)
    }

    async fn counts(&self) -> Result<Vec<QueueCount>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT queue, state, COUNT(*) FROM tasks GROUP BY queue, state ORDER BY queue, state",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut counts = Vec::new();
        for row in rows {
            let (queue, state, count) = row?;
            counts.push(QueueCount {
                queue,
                state: state.parse()?,
                count: count.max(0) as usize,
            });
        }
        Ok(counts)
    }

    async fn recover_expired(&self) -> Result<usize> {
        let conn = self.lock()?;
        let now = Utc::now();
        let recovered = conn.execute(RECOVER_SQL, params![now.timestamp_millis(), now.to_rfc3339()])?;
        if recovered > 0 {
            info!("Recovered {} tasks with expired leases", recovered);
        }
        Ok(recovered)
    }
}
