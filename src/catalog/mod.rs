//! Processing item catalog.
//!
//! Durable per-item pipeline state: external ID, artifact keys, status and
//! last error. Only the orchestrator moves an item through its statuses;
//! every transition is checked against [`ItemStatus::can_transition_to`].

mod sqlite;

pub use sqlite::SqliteCatalog;

use crate::error::{ClipdexError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Pipeline status of a processing item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    Synced,
    AudioDownloading,
    AudioDownloaded,
    Transcribing,
    Transcribed,
    Indexing,
    Complete,
    Error,
}

impl ItemStatus {
    pub const ALL: [ItemStatus; 8] = [
        ItemStatus::Synced,
        ItemStatus::AudioDownloading,
        ItemStatus::AudioDownloaded,
        ItemStatus::Transcribing,
        ItemStatus::Transcribed,
        ItemStatus::Indexing,
        ItemStatus::Complete,
        ItemStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Synced => "SYNCED",
            ItemStatus::AudioDownloading => "AUDIO_DOWNLOADING",
            ItemStatus::AudioDownloaded => "AUDIO_DOWNLOADED",
            ItemStatus::Transcribing => "TRANSCRIBING",
            ItemStatus::Transcribed => "TRANSCRIBED",
            ItemStatus::Indexing => "INDEXING",
            ItemStatus::Complete => "COMPLETE",
            ItemStatus::Error => "ERROR",
        }
    }

    /// A stage is running for the item.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            ItemStatus::AudioDownloading | ItemStatus::Transcribing | ItemStatus::Indexing
        )
    }

    /// Items in these states may be handed to the task queue.
    pub fn is_enqueueable(&self) -> bool {
        matches!(self, ItemStatus::Synced | ItemStatus::Error)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// `SYNCED` and `ERROR` may enter whichever stage the item's persisted
    /// keys call for. `COMPLETE` only re-enters indexing on an explicit
    /// re-index request.
    pub fn can_transition_to(&self, next: ItemStatus) -> bool {
        use ItemStatus::*;
        match (self, next) {
            (Synced, AudioDownloading | Transcribing | Indexing | Error) => true,
            (AudioDownloading, AudioDownloaded | Error) => true,
            (AudioDownloaded, Transcribing | Error) => true,
            (Transcribing, Transcribed | Error) => true,
            (Transcribed, Indexing | Error) => true,
            (Indexing, Complete | Error) => true,
            (Complete, Indexing) => true,
            (Error, AudioDownloading | Transcribing | Indexing) => true,
            _ => false,
        }
    }

    /// Every status that may transition into `target`.
    pub fn predecessors(target: ItemStatus) -> Vec<ItemStatus> {
        Self::ALL
            .into_iter()
            .filter(|s| s.can_transition_to(target))
            .collect()
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = ClipdexError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| ClipdexError::InvalidInput(format!("Unknown item status: {}", s)))
    }
}

/// A media item tracked through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingItem {
    /// Internal ID.
    pub id: i64,
    /// External content ID.
    pub external_id: String,
    pub title: String,
    pub views: u64,
    pub likes: u64,
    pub duration_seconds: Option<f64>,
    /// Set once audio is fetched.
    pub audio_key: Option<String>,
    /// Set once transcribed.
    pub transcript_key: Option<String>,
    pub status: ItemStatus,
    /// Last failure cause.
    pub error: Option<String>,
    /// Set on successful completion.
    pub indexed_at: Option<DateTime<Utc>>,
    /// When the current in-flight stage was claimed.
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProcessingItem {
    /// Whether the in-flight claim is older than `lease`.
    pub fn claim_expired(&self, lease: Duration, now: DateTime<Utc>) -> bool {
        match self.claimed_at {
            Some(claimed_at) => {
                let lease = chrono::Duration::from_std(lease)
                    .unwrap_or_else(|_| chrono::Duration::days(36_500));
                claimed_at + lease <= now
            }
            None => true,
        }
    }
}

/// Metadata for a newly discovered item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewItem {
    pub external_id: String,
    pub title: String,
    pub views: u64,
    pub likes: u64,
    pub duration_seconds: Option<f64>,
}

impl NewItem {
    pub fn new(external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_metrics(mut self, views: u64, likes: u64) -> Self {
        self.views = views;
        self.likes = likes;
        self
    }
}

/// Read-only status projection of an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemStatusView {
    pub item_id: i64,
    pub external_id: String,
    pub status: ItemStatus,
    pub error: Option<String>,
    pub indexed_at: Option<DateTime<Utc>>,
    pub has_audio: bool,
    pub has_transcript: bool,
    pub claimed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl From<&ProcessingItem> for ItemStatusView {
    fn from(item: &ProcessingItem) -> Self {
        Self {
            item_id: item.id,
            external_id: item.external_id.clone(),
            status: item.status,
            error: item.error.clone(),
            indexed_at: item.indexed_at,
            has_audio: item.audio_key.is_some(),
            has_transcript: item.transcript_key.is_some(),
            claimed_at: item.claimed_at,
            updated_at: item.updated_at,
        }
    }
}

/// Persistence for processing items.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Create an item in `SYNCED`, or refresh the metadata of an existing
    /// item with the same external ID (its pipeline state is left alone).
    async fn register(&self, item: &NewItem) -> Result<ProcessingItem>;

    /// Fetch an item by internal ID.
    async fn get(&self, item_id: i64) -> Result<Option<ProcessingItem>>;

    /// Fetch an item by external content ID.
    async fn get_by_external_id(&self, external_id: &str) -> Result<Option<ProcessingItem>>;

    /// List items, optionally restricted to one status, by ID.
    async fn list(&self, status: Option<ItemStatus>) -> Result<Vec<ProcessingItem>>;

    /// Atomically move the item into the in-flight status `target`.
    ///
    /// Succeeds when the current status may transition to `target`, or when
    /// the item is already in `target` under a claim older than `lease`.
    /// Returns `false` when another run holds the stage.
    async fn claim_stage(&self, item_id: i64, target: ItemStatus, lease: Duration) -> Result<bool>;

    /// Store the audio key and mark the fetch stage done.
    async fn record_audio(&self, item_id: i64, audio_key: &str) -> Result<()>;

    /// Store the transcript key and mark the transcription stage done.
    async fn record_transcript(&self, item_id: i64, transcript_key: &str) -> Result<()>;

    /// Mark the item `COMPLETE` and stamp `indexed_at`.
    async fn mark_complete(&self, item_id: i64) -> Result<()>;

    /// Mark the item `ERROR` with a cause. Artifact keys are kept.
    async fn mark_error(&self, item_id: i64, message: &str) -> Result<()>;

    /// Status projection of an item.
    async fn status(&self, item_id: i64) -> Result<Option<ItemStatusView>> {
        Ok(self.get(item_id).await?.as_ref().map(ItemStatusView::from))
    }

    /// Delete an item. Returns whether it existed.
    async fn delete(&self, item_id: i64) -> Result<bool>;
}
