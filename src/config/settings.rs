//! Configuration settings for clipdex.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub storage: StorageSettings,
    pub database: DatabaseSettings,
    pub media: MediaSettings,
    pub transcription: TranscriptionSettings,
    pub embedding: EmbeddingSettings,
    pub chunking: ChunkingSettings,
    pub vector_store: VectorStoreSettings,
    pub queue: QueueSettings,
    pub pipeline: PipelineSettings,
}

/// General application settings.
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Directory for storing application data.
    pub data_dir: String,
    /// Directory for temporary files.
    pub temp_dir: String,
    /// Log level used when neither `-v` nor `RUST_LOG` is given
    /// (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_dir: "~/.clipdex".to_string(),
            temp_dir: "/tmp/clipdex".to_string(),
            log_level: "warn".to_string(),
        }
    }
}

/// Blob store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Root directory of the filesystem blob store.
    pub blob_dir: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            blob_dir: "~/.clipdex/blobs".to_string(),
        }
    }
}

/// Processing item catalog settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Path to the SQLite catalog of processing items.
    pub catalog_path: String,
    /// How long a connection waits on a locked database before failing.
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            catalog_path: "~/.clipdex/catalog.db".to_string(),
            busy_timeout_ms: 5000,
        }
    }
}

/// Media acquisition settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaSettings {
    /// Container/codec extension of stored audio.
    pub audio_format: String,
    /// Fixed bitrate used when transcoding.
    pub audio_bitrate_kbps: u32,
    /// Source URL for an external content ID; `{id}` is substituted.
    pub source_url_template: String,
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            audio_format: "mp3".to_string(),
            audio_bitrate_kbps: 192,
            source_url_template: "https://www.youtube.com/watch?v={id}".to_string(),
        }
    }
}

impl MediaSettings {
    /// Build the source URL for an external content ID.
    pub fn source_url(&self, external_id: &str) -> String {
        self.source_url_template.replace("{id}", external_id)
    }
}

/// Transcription service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionSettings {
    /// Speech-to-text model.
    pub model: String,
    /// Optional language hint passed to the provider.
    pub language: Option<String>,
    /// Timeout for a single provider request in seconds.
    pub request_timeout_seconds: u64,
}

impl Default for TranscriptionSettings {
    fn default() -> Self {
        Self {
            model: "whisper-1".to_string(),
            language: None,
            request_timeout_seconds: 300,
        }
    }
}

/// Embedding generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// Embedding provider (openai).
    pub provider: String,
    /// Embedding model to use.
    pub model: String,
    /// Embedding dimensions.
    pub dimensions: u32,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
        }
    }
}

/// Transcript chunking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    /// Target chunk length in characters.
    pub chunk_size: usize,
    /// Characters of context carried into the next chunk.
    pub overlap: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            overlap: 50,
        }
    }
}

/// Vector store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorStoreSettings {
    /// Vector store provider (sqlite, memory).
    pub provider: String,
    /// Path to SQLite database (for sqlite provider).
    pub sqlite_path: String,
}

impl Default for VectorStoreSettings {
    fn default() -> Self {
        Self {
            provider: "sqlite".to_string(),
            sqlite_path: "~/.clipdex/vectors.db".to_string(),
        }
    }
}

/// Task queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Path to the SQLite task queue.
    pub sqlite_path: String,
    /// Queue that pipeline tasks are routed to.
    pub pipeline_queue: String,
    /// Queues a worker pulls from.
    pub queues: Vec<String>,
    /// Idle poll interval in milliseconds.
    pub poll_interval_ms: u64,
    /// How long a dequeued task stays invisible to other workers.
    pub lease_seconds: u64,
    /// Delivery attempts before a task is dead-lettered.
    pub max_attempts: u32,
    /// Delay added per failed attempt before redelivery.
    pub retry_backoff_seconds: u64,
    /// Concurrent workers per process.
    pub workers: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            sqlite_path: "~/.clipdex/queue.db".to_string(),
            pipeline_queue: "ingest".to_string(),
            queues: vec!["ingest".to_string()],
            poll_interval_ms: 1000,
            lease_seconds: 1800,
            max_attempts: 3,
            retry_backoff_seconds: 30,
            workers: 2,
        }
    }
}

/// Per-stage limits for the processing pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Upper bound for the audio fetch stage.
    pub fetch_timeout_seconds: u64,
    /// Upper bound for the transcription stage.
    pub transcribe_timeout_seconds: u64,
    /// Upper bound for the chunk/embed/index stage.
    pub index_timeout_seconds: u64,
    /// How often a run that lost a stage claim re-reads the item.
    pub claim_poll_interval_ms: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            fetch_timeout_seconds: 300,
            transcribe_timeout_seconds: 600,
            index_timeout_seconds: 120,
            claim_poll_interval_ms: 500,
        }
    }
}

impl PipelineSettings {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds)
    }

    pub fn transcribe_timeout(&self) -> Duration {
        Duration::from_secs(self.transcribe_timeout_seconds)
    }

    pub fn index_timeout(&self) -> Duration {
        Duration::from_secs(self.index_timeout_seconds)
    }

    pub fn claim_poll_interval(&self) -> Duration {
        Duration::from_millis(self.claim_poll_interval_ms)
    }
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> crate::error::Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    pub fn load_from(path: Option<&PathBuf>) -> crate::error::Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let settings: Settings = toml::from_str(&content)?;
            settings.validate()?;
            Ok(settings)
        } else {
            Ok(Settings::default())
        }
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::ClipdexError;

        if !LOG_LEVELS.contains(&self.general.log_level.as_str()) {
            return Err(ClipdexError::Config(format!(
                "general.log_level must be one of {}",
                LOG_LEVELS.join(", ")
            )));
        }
        if self.chunking.chunk_size == 0 {
            return Err(ClipdexError::Config("chunking.chunk_size must be positive".into()));
        }
        if self.queue.queues.is_empty() {
            return Err(ClipdexError::Config("queue.queues must name at least one queue".into()));
        }
        if self.queue.max_attempts == 0 {
            return Err(ClipdexError::Config("queue.max_attempts must be at least 1".into()));
        }
        if !self.media.source_url_template.contains("{id}") {
            return Err(ClipdexError::Config(
                "media.source_url_template must contain {id}".into(),
            ));
        }
        Ok(())
    }

    /// Save settings to the default configuration file.
    pub fn save(&self) -> crate::error::Result<()> {
        self.save_to(&Self::default_config_path())
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::ClipdexError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("clipdex")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    /// Get the expanded data directory path.
    pub fn data_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.data_dir)
    }

    /// Get the expanded temp directory path.
    pub fn temp_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.temp_dir)
    }

    /// Get the expanded blob store root.
    pub fn blob_dir(&self) -> PathBuf {
        Self::expand_path(&self.storage.blob_dir)
    }

    /// Get the expanded catalog database path.
    pub fn catalog_path(&self) -> PathBuf {
        Self::expand_path(&self.database.catalog_path)
    }

    /// Get the expanded vector store database path.
    pub fn sqlite_path(&self) -> PathBuf {
        Self::expand_path(&self.vector_store.sqlite_path)
    }

    /// Get the expanded task queue database path.
    pub fn queue_path(&self) -> PathBuf {
        Self::expand_path(&self.queue.sqlite_path)
    }

    /// Set one value by dotted key, e.g. `chunking.chunk_size`.
    ///
    /// The value is read as a TOML literal when the field is not a string,
    /// and the result must still pass [`Settings::validate`].
    pub fn set_value(&mut self, key: &str, value: &str) -> crate::error::Result<()> {
        use crate::error::ClipdexError;

        let (section, field) = key
            .split_once('.')
            .ok_or_else(|| ClipdexError::Config(format!("Expected section.field, got {:?}", key)))?;

        let mut root = toml::Value::try_from(&*self).map_err(|e| ClipdexError::Config(e.to_string()))?;
        let table = root
            .get_mut(section)
            .and_then(|v| v.as_table_mut())
            .ok_or_else(|| ClipdexError::Config(format!("Unknown config section: {}", section)))?;

        let parsed = match table.get(field) {
            Some(toml::Value::String(_)) => toml::Value::String(value.to_string()),
            _ => parse_literal(value),
        };
        table.insert(field.to_string(), parsed);

        let updated: Settings = root
            .try_into()
            .map_err(|e| ClipdexError::Config(format!("Invalid value for {}: {}", key, e)))?;
        updated.validate()?;

        let known = toml::Value::try_from(&updated)
            .ok()
            .and_then(|v| v.get(section).and_then(|s| s.get(field)).cloned())
            .is_some();
        if !known {
            return Err(ClipdexError::Config(format!("Unknown config key: {}", key)));
        }

        *self = updated;
        Ok(())
    }
}

/// Parse a CLI value as a TOML literal, falling back to a plain string.
fn parse_literal(value: &str) -> toml::Value {
    toml::from_str::<toml::Table>(&format!("v = {}", value))
        .ok()
        .and_then(|mut table| table.remove("v"))
        .unwrap_or_else(|| toml::Value::String(value.to_string()))
}
