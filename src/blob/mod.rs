//! Blob store abstraction for clipdex.
//!
//! Stage artifacts (audio, transcripts) are stored under deterministic keys
//! derived from the external content ID, namespaced by stage.

mod fs;
mod memory;

pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;

use crate::error::{ClipdexError, Result};
use async_trait::async_trait;

/// Key prefix for fetched audio.
pub const AUDIO_PREFIX: &str = "audio/";
/// Key prefix for transcript documents.
pub const TRANSCRIPT_PREFIX: &str = "transcripts/";

/// Trait for blob storage backends.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes under a key, replacing any previous value. Returns the key.
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String>;

    /// Read the bytes stored under a key.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Delete a key. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// List keys starting with a prefix, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Check whether a key exists.
    async fn exists(&self, key: &str) -> Result<bool>;
}

/// Key of the audio artifact for an external content ID.
pub fn audio_key(external_id: &str, ext: &str) -> String {
    format!("{}{}.{}", AUDIO_PREFIX, external_id, ext)
}

/// Key of the transcript document for an external content ID.
pub fn transcript_key(external_id: &str) -> String {
    format!("{}{}.json", TRANSCRIPT_PREFIX, external_id)
}

/// Reject keys that could escape the store root or collide with metadata files.
pub(crate) fn validate_key(key: &str) -> Result<()> {
    let invalid = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.ends_with('/')
        || key.ends_with(fs::META_SUFFIX)
        || key.split('/').any(|part| part.is_empty() || part == "." || part == "..");

    if invalid {
        return Err(ClipdexError::BlobStore(format!("Invalid blob key: {:?}", key)));
    }
    Ok(())
}
