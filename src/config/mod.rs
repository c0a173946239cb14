//! Configuration module for clipdex.
//!
//! Handles loading and managing application settings.

mod settings;

pub use settings::{
    ChunkingSettings, DatabaseSettings, EmbeddingSettings, GeneralSettings, MediaSettings,
    PipelineSettings, QueueSettings, Settings, StorageSettings, TranscriptionSettings,
    VectorStoreSettings,
};
