//! Pipeline orchestrator for clipdex.
//!
//! Runs an item through fetch, transcribe and index, persisting the item's
//! status before and after every stage. Re-running an item picks up from its
//! persisted keys: fetched audio and stored transcripts are never redone, and
//! indexing always replaces the item's chunks.

use crate::blob::{BlobStore, FsBlobStore};
use crate::catalog::{ItemStatus, ItemStore, ProcessingItem, SqliteCatalog};
use crate::chunking::ChunkingConfig;
use crate::config::{PipelineSettings, Settings};
use crate::embedding::{Embedder, OpenAIEmbedder};
use crate::error::{ClipdexError, Result};
use crate::indexer::{SearchHit, TranscriptIndexer};
use crate::media::{MediaFetcher, YtDlpFetcher};
use crate::transcription::{load_transcript, SpeechProvider, Transcriber, WhisperProvider};
use crate::vector_store::{MemoryVectorIndex, MetadataFilter, SqliteVectorIndex, VectorIndex};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// A pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Transcribe,
    Index,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Transcribe => "transcribe",
            Stage::Index => "index",
        }
    }

    /// Status an item holds while this stage runs.
    pub fn in_flight_status(&self) -> ItemStatus {
        match self {
            Stage::Fetch => ItemStatus::AudioDownloading,
            Stage::Transcribe => ItemStatus::Transcribing,
            Stage::Index => ItemStatus::Indexing,
        }
    }

    /// The stage an item needs next, if any.
    pub fn next_for(item: &ProcessingItem, reindex: bool) -> Option<Stage> {
        if item.status == ItemStatus::Complete && !reindex {
            None
        } else if item.audio_key.is_none() {
            Some(Stage::Fetch)
        } else if item.transcript_key.is_none() {
            Some(Stage::Transcribe)
        } else {
            Some(Stage::Index)
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-stage time limits.
#[derive(Debug, Clone, Copy)]
pub struct StageTimeouts {
    pub fetch: Duration,
    pub transcribe: Duration,
    pub index: Duration,
    /// How often a run waiting on another run's stage re-reads the item.
    pub claim_poll: Duration,
}

impl StageTimeouts {
    pub fn for_stage(&self, stage: Stage) -> Duration {
        match stage {
            Stage::Fetch => self.fetch,
            Stage::Transcribe => self.transcribe,
            Stage::Index => self.index,
        }
    }

    /// How long a stage claim is honored before another run may take it over.
    pub fn lease_for(&self, stage: Stage) -> Duration {
        self.for_stage(stage) + self.claim_poll
    }
}

impl From<&PipelineSettings> for StageTimeouts {
    fn from(settings: &PipelineSettings) -> Self {
        Self {
            fetch: settings.fetch_timeout(),
            transcribe: settings.transcribe_timeout(),
            index: settings.index_timeout(),
            claim_poll: settings.claim_poll_interval(),
        }
    }
}

/// Options for a single `process_item` call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ProcessOptions {
    /// Re-index an item that is already `COMPLETE`.
    pub force_reindex: bool,
}

impl ProcessOptions {
    pub fn reindex() -> Self {
        Self { force_reindex: true }
    }
}

/// What a pipeline run produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessReport {
    pub item_id: i64,
    pub external_id: String,
    pub audio_key: Option<String>,
    pub transcript_key: Option<String>,
    /// Chunks written by this run's index stage.
    pub chunks_indexed: usize,
    /// Stages this run executed.
    pub stages_run: Vec<Stage>,
    /// Stages satisfied by persisted keys.
    pub stages_skipped: Vec<Stage>,
}

/// The stage that failed and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: Stage,
    pub message: String,
}

/// Result of a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessOutcome {
    /// The item reached `COMPLETE`.
    Completed(ProcessReport),
    /// The item was already `COMPLETE`; nothing ran.
    AlreadyComplete(ProcessReport),
    /// A stage failed; the item is in `ERROR`.
    Failed(StageFailure),
}

impl ProcessOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, ProcessOutcome::Failed(_))
    }
}

/// Collaborators for [`Orchestrator::with_components`].
pub struct PipelineComponents {
    pub catalog: Arc<dyn ItemStore>,
    pub blob_store: Arc<dyn BlobStore>,
    pub fetcher: Arc<dyn MediaFetcher>,
    pub speech: Arc<dyn SpeechProvider>,
    pub embedder: Arc<dyn Embedder>,
    pub index: Arc<dyn VectorIndex>,
    pub chunking: ChunkingConfig,
    pub timeouts: StageTimeouts,
    pub language: Option<String>,
    pub temp_dir: PathBuf,
}

enum StageOutput {
    Audio(String),
    Transcript(String),
    Indexed(usize),
}

/// The main orchestrator for the clipdex pipeline.
pub struct Orchestrator {
    catalog: Arc<dyn ItemStore>,
    blob_store: Arc<dyn BlobStore>,
    fetcher: Arc<dyn MediaFetcher>,
    transcriber: Transcriber,
    indexer: TranscriptIndexer,
    timeouts: StageTimeouts,
}

impl Orchestrator {
    /// Build the production pipeline from settings.
    pub fn new(settings: &Settings) -> Result<Self> {
        let temp_dir = settings.temp_dir();
        std::fs::create_dir_all(&temp_dir)?;

        let blob_store: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(&settings.blob_dir())?);
        let busy_timeout = Duration::from_millis(settings.database.busy_timeout_ms);
        let catalog: Arc<dyn ItemStore> = Arc::new(SqliteCatalog::new(&settings.catalog_path(), busy_timeout)?);

        let fetcher = Arc::new(YtDlpFetcher::new(
            blob_store.clone(),
            settings.media.clone(),
            &temp_dir,
        ));

        info!("Using {} for transcription", settings.transcription.model);
        let speech = Arc::new(
            WhisperProvider::new(
                &settings.transcription.model,
                Duration::from_secs(settings.transcription.request_timeout_seconds),
            )?
            .with_temp_root(&temp_dir),
        );

        let embedder: Arc<dyn Embedder> = match settings.embedding.provider.as_str() {
            "openai" => Arc::new(OpenAIEmbedder::with_config(
                &settings.embedding.model,
                settings.embedding.dimensions as usize,
            )?),
            other => {
                return Err(ClipdexError::Config(format!(
                    "Unsupported embedding provider: {}",
                    other
                )))
            }
        };

        let index: Arc<dyn VectorIndex> = match settings.vector_store.provider.as_str() {
            "sqlite" => Arc::new(SqliteVectorIndex::new(&settings.sqlite_path(), busy_timeout)?),
            "memory" => {
                warn!("Using in-memory vector index; chunks are lost on exit");
                Arc::new(MemoryVectorIndex::new())
            }
            other => {
                return Err(ClipdexError::Config(format!(
                    "Unsupported vector store provider: {}",
                    other
                )))
            }
        };

        Self::with_components(PipelineComponents {
            catalog,
            blob_store,
            fetcher,
            speech,
            embedder,
            index,
            chunking: ChunkingConfig::from(&settings.chunking),
            timeouts: StageTimeouts::from(&settings.pipeline),
            language: settings.transcription.language.clone(),
            temp_dir,
        })
    }

    /// Create an orchestrator with custom components.
    pub fn with_components(components: PipelineComponents) -> Result<Self> {
        std::fs::create_dir_all(&components.temp_dir)?;

        let transcriber = Transcriber::new(
            components.blob_store.clone(),
            components.speech,
            &components.temp_dir,
        )
        .with_language(components.language);
        let indexer = TranscriptIndexer::new(components.embedder, components.index, components.chunking);

        Ok(Self {
            catalog: components.catalog,
            blob_store: components.blob_store,
            fetcher: components.fetcher,
            transcriber,
            indexer,
            timeouts: components.timeouts,
        })
    }

    /// The item catalog.
    pub fn catalog(&self) -> Arc<dyn ItemStore> {
        self.catalog.clone()
    }

    pub fn indexer(&self) -> &TranscriptIndexer {
        &self.indexer
    }

    /// Run the pipeline for an item.
    ///
    /// Stage failures are recorded on the item and returned as
    /// [`ProcessOutcome::Failed`]. `Err` means the item does not exist or
    /// the catalog could not be updated.
    #[instrument(skip(self, options), fields(force_reindex = options.force_reindex))]
    pub async fn process_item(
        &self,
        item_id: i64,
        external_id: &str,
        options: ProcessOptions,
    ) -> Result<ProcessOutcome> {
        let mut report = ProcessReport {
            item_id,
            external_id: external_id.to_string(),
            ..Default::default()
        };
        let mut reindex = options.force_reindex;

        loop {
            let item = self.load_item(item_id, external_id).await?;
            report.audio_key = item.audio_key.clone();
            report.transcript_key = item.transcript_key.clone();

            let Some(stage) = Stage::next_for(&item, reindex) else {
                report.stages_skipped = [Stage::Fetch, Stage::Transcribe]
                    .into_iter()
                    .filter(|s| !report.stages_run.contains(s))
                    .collect();
                if report.stages_run.is_empty() {
                    info!("Item {} is already complete", external_id);
                    return Ok(ProcessOutcome::AlreadyComplete(report));
                }
                info!("Item {} complete ({} chunks)", external_id, report.chunks_indexed);
                return Ok(ProcessOutcome::Completed(report));
            };

            let lease = self.timeouts.lease_for(stage);
            if !self
                .catalog
                .claim_stage(item_id, stage.in_flight_status(), lease)
                .await?
            {
                debug!("Stage {} of item {} is held elsewhere; waiting", stage, item_id);
                self.wait_for_release(item_id, lease).await?;
                continue;
            }

            info!("Running {} stage for {}", stage, external_id);
            match self.run_stage(stage, &item).await {
                Ok(StageOutput::Audio(key)) => {
                    self.catalog.record_audio(item_id, &key).await?;
                }
                Ok(StageOutput::Transcript(key)) => {
                    self.catalog.record_transcript(item_id, &key).await?;
                }
                Ok(StageOutput::Indexed(count)) => {
                    self.catalog.mark_complete(item_id).await?;
                    report.chunks_indexed = count;
                    reindex = false;
                }
                Err(e) => {
                    let message = e.to_string();
                    warn!("Stage {} failed for {}: {}", stage, external_id, message);
                    self.catalog.mark_error(item_id, &message).await?;
                    return Ok(ProcessOutcome::Failed(StageFailure { stage, message }));
                }
            }
            report.stages_run.push(stage);
        }
    }

    async fn load_item(&self, item_id: i64, external_id: &str) -> Result<ProcessingItem> {
        let item = self
            .catalog
            .get(item_id)
            .await?
            .ok_or_else(|| ClipdexError::NotFound(format!("Item {}", item_id)))?;
        if item.external_id != external_id {
            return Err(ClipdexError::NotFound(format!(
                "Item {} has external ID {}, not {}",
                item_id, item.external_id, external_id
            )));
        }
        Ok(item)
    }

    /// Wait until the item leaves the in-flight status it holds now, or its
    /// claim outlives `lease`.
    async fn wait_for_release(&self, item_id: i64, lease: Duration) -> Result<()> {
        let held = self
            .catalog
            .get(item_id)
            .await?
            .ok_or_else(|| ClipdexError::NotFound(format!("Item {}", item_id)))?
            .status;

        loop {
            tokio::time::sleep(self.timeouts.claim_poll).await;
            let item = self
                .catalog
                .get(item_id)
                .await?
                .ok_or_else(|| ClipdexError::NotFound(format!("Item {}", item_id)))?;
            if item.status != held || !item.status.is_in_flight() || item.claim_expired(lease, Utc::now()) {
                return Ok(());
            }
        }
    }

    async fn run_stage(&self, stage: Stage, item: &ProcessingItem) -> Result<StageOutput> {
        let limit = self.timeouts.for_stage(stage);
        let work = async {
            match stage {
                Stage::Fetch => self.fetch(item).await,
                Stage::Transcribe => self.transcribe(item).await,
                Stage::Index => self.index(item).await,
            }
        };

        match tokio::time::timeout(limit, work).await {
            Ok(result) => result,
            Err(_) => Err(ClipdexError::Timeout(format!(
                "{} stage timeout after {:?}",
                stage, limit
            ))),
        }
    }

    async fn fetch(&self, item: &ProcessingItem) -> Result<StageOutput> {
        let fetched = self.fetcher.fetch(&item.external_id).await.map_err(|e| match e {
            ClipdexError::Fetch(_) => e,
            other => ClipdexError::Fetch(other.to_string()),
        })?;
        debug!("Fetched {} bytes of audio to {}", fetched.size_bytes, fetched.key);
        Ok(StageOutput::Audio(fetched.key))
    }

    async fn transcribe(&self, item: &ProcessingItem) -> Result<StageOutput> {
        let audio_key = item.audio_key.as_deref().ok_or_else(|| {
            ClipdexError::Transcription(format!("Item {} has no audio", item.external_id))
        })?;
        let summary = self.transcriber.transcribe(audio_key, &item.external_id).await?;
        Ok(StageOutput::Transcript(summary.key))
    }

    async fn index(&self, item: &ProcessingItem) -> Result<StageOutput> {
        let transcript_key = item.transcript_key.as_deref().ok_or_else(|| {
            ClipdexError::Indexing(format!("Item {} has no transcript", item.external_id))
        })?;
        let transcript = load_transcript(self.blob_store.as_ref(), transcript_key)
            .await
            .map_err(|e| ClipdexError::Indexing(format!("Could not load transcript: {}", e)))?;
        let count = self.indexer.index_transcript(item, &transcript).await?;
        Ok(StageOutput::Indexed(count))
    }

    /// Delete an item and all of its chunks. Returns the number of chunks removed.
    #[instrument(skip(self))]
    pub async fn forget_item(&self, item_id: i64) -> Result<usize> {
        let item = self
            .catalog
            .get(item_id)
            .await?
            .ok_or_else(|| ClipdexError::NotFound(format!("Item {}", item_id)))?;

        let removed = self.indexer.delete_item(&item.external_id).await?;
        self.catalog.delete(item_id).await?;
        info!("Forgot item {} ({} chunks removed)", item.external_id, removed);
        Ok(removed)
    }

    /// Semantic search over indexed transcripts.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<SearchHit>> {
        self.indexer.search(query, limit, filter).await
    }
}
