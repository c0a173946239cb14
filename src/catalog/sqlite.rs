//! SQLite-backed processing item catalog.
//!
//! Each call takes the connection for a single statement or a short
//! `IMMEDIATE` transaction; nothing is held across a pipeline stage.

use super::{ItemStatus, ItemStore, NewItem, ProcessingItem};
use crate::error::{ClipdexError, Result};
use crate::media::validate_external_id;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        external_id TEXT NOT NULL UNIQUE,
        title TEXT NOT NULL DEFAULT '',
        views INTEGER NOT NULL DEFAULT 0,
        likes INTEGER NOT NULL DEFAULT 0,
        duration_seconds REAL,
        audio_key TEXT,
        transcript_key TEXT,
        status TEXT NOT NULL DEFAULT 'SYNCED',
        error TEXT,
        indexed_at TEXT,
        claimed_at INTEGER,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_items_status ON items(status);
"#;

const COLUMNS: &str = "id, external_id, title, views, likes, duration_seconds, audio_key, \
     transcript_key, status, error, indexed_at, claimed_at, created_at, updated_at";

impl ToSql for ItemStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for ItemStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: ClipdexError| FromSqlError::Other(Box::new(e)))
    }
}

/// SQLite processing item catalog.
pub struct SqliteCatalog {
    conn: Mutex<Connection>,
}

impl SqliteCatalog {
    /// Open (or create) the catalog at `path`.
    #[instrument(skip_all)]
    pub fn new(path: &Path, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch(SCHEMA)?;

        info!("Opened catalog at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory catalog (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| ClipdexError::Catalog(format!("Failed to acquire lock: {}", e)))
    }

    fn parse_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    fn row_to_item(row: &Row<'_>) -> rusqlite::Result<ProcessingItem> {
        let indexed_at: Option<String> = row.get(10)?;
        let claimed_at: Option<i64> = row.get(11)?;
        let created_at: String = row.get(12)?;
        let updated_at: String = row.get(13)?;

        Ok(ProcessingItem {
            id: row.get(0)?,
            external_id: row.get(1)?,
            title: row.get(2)?,
            views: row.get::<_, i64>(3)?.max(0) as u64,
            likes: row.get::<_, i64>(4)?.max(0) as u64,
            duration_seconds: row.get(5)?,
            audio_key: row.get(6)?,
            transcript_key: row.get(7)?,
            status: row.get(8)?,
            error: row.get(9)?,
            indexed_at: indexed_at.as_deref().map(Self::parse_time),
            claimed_at: claimed_at.and_then(DateTime::<Utc>::from_timestamp_millis),
            created_at: Self::parse_time(&created_at),
            updated_at: Self::parse_time(&updated_at),
        })
    }

    fn select_by_id(conn: &Connection, item_id: i64) -> Result<Option<ProcessingItem>> {
        let sql = format!("SELECT {} FROM items WHERE id = ?1", COLUMNS);
        Ok(conn
            .query_row(&sql, params![item_id], Self::row_to_item)
            .optional()?)
    }

    /// Apply `sql` to an item after checking that its current status may
    /// move to `target` and that `check` accepts it.
    fn transition(
        &self,
        item_id: i64,
        target: ItemStatus,
        check: impl FnOnce(&ProcessingItem) -> Result<()>,
        sql: &str,
        params: &[&dyn ToSql],
    ) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let item = Self::select_by_id(&tx, item_id)?
            .ok_or_else(|| ClipdexError::NotFound(format!("Item {}", item_id)))?;

        let allowed = item.status.can_transition_to(target)
            || (target == ItemStatus::Error && item.status == ItemStatus::Error);
        if !allowed {
            return Err(ClipdexError::Catalog(format!(
                "Item {} cannot move from {} to {}",
                item_id, item.status, target
            )));
        }
        check(&item)?;

        tx.execute(sql, params)?;
        tx.commit()?;
        debug!("Item {} {} -> {}", item_id, item.status, target);
        Ok(())
    }
}

#[async_trait]
impl ItemStore for SqliteCatalog {
    #[instrument(skip(self, item), fields(external_id = %item.external_id))]
    async fn register(&self, item: &NewItem) -> Result<ProcessingItem> {
        validate_external_id(&item.external_id)?;

        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            r#"
            INSERT INTO items (external_id, title, views, likes, duration_seconds, status,
                               created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            ON CONFLICT(external_id) DO UPDATE SET
                title = excluded.title,
                views = excluded.views,
                likes = excluded.likes,
                duration_seconds = COALESCE(excluded.duration_seconds, items.duration_seconds),
                updated_at = excluded.updated_at
            "#,
            params![
                item.external_id,
                item.title,
                item.views as i64,
                item.likes as i64,
                item.duration_seconds,
                ItemStatus::Synced,
                now,
            ],
        )?;

        let sql = format!("SELECT {} FROM items WHERE external_id = ?1", COLUMNS);
        let stored = conn.query_row(&sql, params![item.external_id], Self::row_to_item)?;
        debug!("Registered item {} ({})", stored.id, stored.status);
        Ok(stored)
    }

    async fn get(&self, item_id: i64) -> Result<Option<ProcessingItem>> {
        let conn = self.lock()?;
        Self::select_by_id(&conn, item_id)
    }

    async fn get_by_external_id(&self, external_id: &str) -> Result<Option<ProcessingItem>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM items WHERE external_id = ?1", COLUMNS);
        Ok(conn
            .query_row(&sql, params![external_id], Self::row_to_item)
            .optional()?)
    }

    async fn list(&self, status: Option<ItemStatus>) -> Result<Vec<ProcessingItem>> {
        let conn = self.lock()?;
        let items = match status {
            Some(status) => {
                let sql = format!("SELECT {} FROM items WHERE status = ?1 ORDER BY id", COLUMNS);
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![status], Self::row_to_item)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let sql = format!("SELECT {} FROM items ORDER BY id", COLUMNS);
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([], Self::row_to_item)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(items)
    }

    #[instrument(skip(self))]
    async fn claim_stage(&self, item_id: i64, target: ItemStatus, lease: Duration) -> Result<bool> {
        if !target.is_in_flight() {
            return Err(ClipdexError::Catalog(format!("{} is not a stage status", target)));
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let item = Self::select_by_id(&tx, item_id)?
            .ok_or_else(|| ClipdexError::NotFound(format!("Item {}", item_id)))?;

        let now = Utc::now();
        let stale = item.status == target && item.claim_expired(lease, now);
        if !item.status.can_transition_to(target) && !stale {
            debug!("Item {} is {}; claim for {} refused", item_id, item.status, target);
            return Ok(false);
        }
        if stale {
            warn!("Taking over stale {} claim on item {}", target, item_id);
        }

        tx.execute(
            "UPDATE items SET status = ?1, claimed_at = ?2, updated_at = ?3 WHERE id = ?4",
            params![target, now.timestamp_millis(), now.to_rfc3339(), item_id],
        )?;
        tx.commit()?;
        Ok(true)
    }

    async fn record_audio(&self, item_id: i64, audio_key: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.transition(
            item_id,
            ItemStatus::AudioDownloaded,
            |_| Ok(()),
            "UPDATE items SET audio_key = ?1, status = ?2, claimed_at = NULL, updated_at = ?3 \
             WHERE id = ?4",
            params![audio_key, ItemStatus::AudioDownloaded, now, item_id],
        )
    }

    async fn record_transcript(&self, item_id: i64, transcript_key: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.transition(
            item_id,
            ItemStatus::Transcribed,
            |_| Ok(()),
            "UPDATE items SET transcript_key = ?1, status = ?2, claimed_at = NULL, \
             updated_at = ?3 WHERE id = ?4",
            params![transcript_key, ItemStatus::Transcribed, now, item_id],
        )
    }

    async fn mark_complete(&self, item_id: i64) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.transition(
            item_id,
            ItemStatus::Complete,
            |item| {
                if item.audio_key.is_none() || item.transcript_key.is_none() {
                    return Err(ClipdexError::Catalog(format!(
                        "Item {} cannot complete without audio and transcript keys",
                        item_id
                    )));
                }
                Ok(())
            },
            "UPDATE items SET status = ?1, error = NULL, indexed_at = ?2, claimed_at = NULL, \
             updated_at = ?2 WHERE id = ?3",
            params![ItemStatus::Complete, now, item_id],
        )
    }

    async fn mark_error(&self, item_id: i64, message: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.transition(
            item_id,
            ItemStatus::Error,
            |_| Ok(()),
            "UPDATE items SET status = ?1, error = ?2, claimed_at = NULL, updated_at = ?3 \
             WHERE id = ?4",
            params![ItemStatus::Error, message, now, item_id],
        )
    }

    async fn delete(&self, item_id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM items WHERE id = ?1", params![item_id])?;
        Ok(deleted > 0)
    }
}
