//! Filesystem-backed blob store.
//!
//! Each key maps to a file under the root directory. Writes go to a temporary
//! file in the destination directory and are renamed into place, so a reader
//! sees either the previous value or the complete new one.

use super::{validate_key, BlobStore};
use crate::error::{ClipdexError, Result};
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// Suffix of the sidecar file holding a blob's content type.
pub(crate) const META_SUFFIX: &str = ".meta";

/// Blob store rooted at a local directory.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Open (and create if needed) a blob store at `root`.
    pub fn new(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.root.clone(), |path, part| path.join(part)))
    }

    fn meta_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(META_SUFFIX);
        PathBuf::from(name)
    }

    /// Content type recorded for a key, if any.
    pub fn content_type(&self, key: &str) -> Result<Option<String>> {
        let path = Self::meta_path(&self.path_for(key)?);
        match std::fs::read_to_string(path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| ClipdexError::BlobStore(format!("No parent for {:?}", path)))?;
        std::fs::create_dir_all(parent)?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path)
            .map_err(|e| ClipdexError::BlobStore(format!("Failed to persist {:?}: {}", path, e)))?;
        Ok(())
    }

    fn collect_keys(&self, dir: &Path, out: &mut Vec<String>) -> Result<()> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                self.collect_keys(&path, out)?;
                continue;
            }

            let Ok(rel) = path.strip_prefix(&self.root) else {
                continue;
            };
            let key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");

            // Skip sidecars and in-flight temp files
            if key.ends_with(META_SUFFIX) || validate_key(&key).is_err() {
                continue;
            }
            if rel.file_name().is_some_and(|n| n.to_string_lossy().starts_with(".tmp")) {
                continue;
            }
            out.push(key);
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        let path = self.path_for(key)?;
        let size = bytes.len();
        let content_type = content_type.to_string();

        // Whole audio files are written and synced off the async runtime
        tokio::task::spawn_blocking(move || {
            Self::write_atomic(&path, &bytes)?;
            Self::write_atomic(&Self::meta_path(&path), content_type.as_bytes())
        })
        .await
        .map_err(|e| ClipdexError::BlobStore(format!("Write task failed: {}", e)))??;

        debug!("Stored {} bytes at {}", size, key);
        Ok(key.to_string())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ClipdexError::NotFound(format!("Blob {}", key)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        for p in [Self::meta_path(&path), path] {
            match tokio::fs::remove_file(&p).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        self.collect_keys(&self.root, &mut keys)?;
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.path_for(key)?.is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();

        let key = store
            .put("audio/abc123.mp3", b"ID3".to_vec(), "audio/mpeg")
            .await
            .unwrap();
        assert_eq!(key, "audio/abc123.mp3");
        assert_eq!(store.get(&key).await.unwrap(), b"ID3");
        assert_eq!(store.content_type(&key).unwrap().as_deref(), Some("audio/mpeg"));
        assert!(store.exists(&key).await.unwrap());

        store.delete(&key).await.unwrap();
        assert!(!store.exists(&key).await.unwrap());
        assert!(matches!(store.get(&key).await, Err(ClipdexError::NotFound(_))));

        // Deleting again is fine
        store.delete(&key).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();

        store.put("audio/b.mp3", vec![1], "audio/mpeg").await.unwrap();
        store.put("audio/a.mp3", vec![2], "audio/mpeg").await.unwrap();
        store.put("transcripts/a.json", b"{}".to_vec(), "application/json").await.unwrap();

        assert_eq!(
            store.list("audio/").await.unwrap(),
            vec!["audio/a.mp3", "audio/b.mp3"]
        );
        assert_eq!(store.list("").await.unwrap().len(), 3);
        assert!(store.list("video/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_overwrite_replaces_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();

        store.put("transcripts/x.json", b"old".to_vec(), "application/json").await.unwrap();
        store.put("transcripts/x.json", b"new".to_vec(), "application/json").await.unwrap();
        assert_eq!(store.get("transcripts/x.json").await.unwrap(), b"new");
        assert_eq!(store.list("transcripts/").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();
        assert!(store.put("../outside", vec![0], "text/plain").await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_large_puts() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(FsBlobStore::new(dir.path()).unwrap());

        let mut handles = Vec::new();
        for i in 0..4u8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let key = format!("audio/part{}.mp3", i);
                store.put(&key, vec![i; 4 * 1024 * 1024], "audio/mpeg").await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.list("audio/").await.unwrap().len(), 4);
        let bytes = store.get("audio/part3.mp3").await.unwrap();
        assert_eq!(bytes.len(), 4 * 1024 * 1024);
        assert!(bytes.iter().all(|b| *b == 3));
    }
}
