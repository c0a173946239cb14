//! In-memory blob store.
//!
//! Useful for testing and single-process runs.

use super::{validate_key, BlobStore};
use crate::error::{ClipdexError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

struct StoredBlob {
    bytes: Vec<u8>,
    content_type: String,
}

/// In-memory blob store.
pub struct MemoryBlobStore {
    blobs: RwLock<BTreeMap<String, StoredBlob>>,
    puts: AtomicUsize,
}

impl MemoryBlobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(BTreeMap::new()),
            puts: AtomicUsize::new(0),
        }
    }

    /// Number of `put` calls served so far.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Content type recorded for a key.
    pub fn content_type(&self, key: &str) -> Option<String> {
        let blobs = self.blobs.read().ok()?;
        blobs.get(key).map(|b| b.content_type.clone())
    }

    fn poisoned() -> ClipdexError {
        ClipdexError::BlobStore("Blob map lock poisoned".into())
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        validate_key(key)?;
        let mut blobs = self.blobs.write().map_err(|_| Self::poisoned())?;
        blobs.insert(
            key.to_string(),
            StoredBlob {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(key.to_string())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let blobs = self.blobs.read().map_err(|_| Self::poisoned())?;
        blobs
            .get(key)
            .map(|b| b.bytes.clone())
            .ok_or_else(|| ClipdexError::NotFound(format!("Blob {}", key)))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut blobs = self.blobs.write().map_err(|_| Self::poisoned())?;
        blobs.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let blobs = self.blobs.read().map_err(|_| Self::poisoned())?;
        Ok(blobs
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let blobs = self.blobs.read().map_err(|_| Self::poisoned())?;
        Ok(blobs.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_blob_store() {
        let store = MemoryBlobStore::new();

        store.put("audio/a.mp3", vec![1, 2, 3], "audio/mpeg").await.unwrap();
        store.put("transcripts/a.json", b"{}".to_vec(), "application/json").await.unwrap();

        assert_eq!(store.put_count(), 2);
        assert_eq!(store.get("audio/a.mp3").await.unwrap(), vec![1, 2, 3]);
        assert_eq!(store.list("audio/").await.unwrap(), vec!["audio/a.mp3"]);
        assert_eq!(store.content_type("transcripts/a.json").as_deref(), Some("application/json"));

        store.delete("audio/a.mp3").await.unwrap();
        assert!(!store.exists("audio/a.mp3").await.unwrap());
        assert!(store.get("audio/a.mp3").await.is_err());
    }
}
