//! In-memory vector index implementation.
//!
//! Useful for testing and small datasets.

use super::{rank, ChunkRecord, IndexStats, MetadataFilter, QueryHit, VectorIndex};
use crate::error::{ClipdexError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;

/// In-memory vector index.
pub struct MemoryVectorIndex {
    records: RwLock<BTreeMap<String, ChunkRecord>>,
}

impl MemoryVectorIndex {
    /// Create a new in-memory vector index.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
        }
    }

    fn poisoned() -> ClipdexError {
        ClipdexError::VectorStore("Index lock poisoned".into())
    }
}

impl Default for MemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert(&self, records: &[ChunkRecord]) -> Result<usize> {
        let mut store = self.records.write().map_err(|_| Self::poisoned())?;
        for record in records {
            store.insert(record.id.clone(), record.clone());
        }
        Ok(records.len())
    }

    async fn query(
        &self,
        embedding: &[f32],
        limit: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<QueryHit>> {
        let store = self.records.read().map_err(|_| Self::poisoned())?;
        let candidates = store
            .values()
            .filter(|r| filter.matches(&r.metadata))
            .cloned();
        Ok(rank(embedding, candidates, limit))
    }

    async fn get(&self, filter: &MetadataFilter, limit: Option<usize>) -> Result<Vec<ChunkRecord>> {
        let store = self.records.read().map_err(|_| Self::poisoned())?;
        let mut result: Vec<ChunkRecord> = store
            .values()
            .filter(|r| filter.matches(&r.metadata))
            .cloned()
            .collect();
        result.sort_by(|a, b| {
            a.metadata
                .external_id
                .cmp(&b.metadata.external_id)
                .then(a.metadata.chunk_index.cmp(&b.metadata.chunk_index))
        });
        if let Some(limit) = limit {
            result.truncate(limit);
        }
        Ok(result)
    }

    async fn delete(&self, filter: &MetadataFilter) -> Result<usize> {
        let mut store = self.records.write().map_err(|_| Self::poisoned())?;
        let initial_len = store.len();
        store.retain(|_, r| !filter.matches(&r.metadata));
        Ok(initial_len - store.len())
    }

    async fn stats(&self) -> Result<IndexStats> {
        let store = self.records.read().map_err(|_| Self::poisoned())?;
        let items: HashSet<&str> = store
            .values()
            .map(|r| r.metadata.external_id.as_str())
            .collect();
        Ok(IndexStats {
            total_chunks: store.len(),
            total_items: items.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::test_record;

    #[tokio::test]
    async fn test_memory_vector_index() {
        let index = MemoryVectorIndex::new();

        index
            .upsert(&[
                test_record("video1", 0, 2, vec![1.0, 0.0, 0.0]),
                test_record("video1", 1, 2, vec![0.0, 1.0, 0.0]),
                test_record("video2", 0, 1, vec![0.9, 0.1, 0.0]),
            ])
            .await
            .unwrap();

        let stats = index.stats().await.unwrap();
        assert_eq!(stats.total_chunks, 3);
        assert_eq!(stats.total_items, 2);

        let hits = index.query(&[1.0, 0.0, 0.0], 10, &MetadataFilter::new()).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].record.id, "video1_chunk_0");
        assert!(hits[0].distance < hits[1].distance);

        let filtered = index
            .query(&[1.0, 0.0, 0.0], 10, &MetadataFilter::external_id("video2"))
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);

        let chunks = index.get(&MetadataFilter::external_id("video1"), None).await.unwrap();
        assert_eq!(chunks.iter().map(|c| c.metadata.chunk_index).collect::<Vec<_>>(), vec![0, 1]);

        assert_eq!(index.count(&MetadataFilter::external_id("video1")).await.unwrap(), 2);
        assert_eq!(index.delete(&MetadataFilter::external_id("video1")).await.unwrap(), 2);
        assert_eq!(index.stats().await.unwrap().total_chunks, 1);
    }

    #[tokio::test]
    async fn test_upsert_replaces_same_id() {
        let index = MemoryVectorIndex::new();
        let mut record = test_record("v", 0, 1, vec![1.0]);
        index.upsert(&[record.clone()]).await.unwrap();

        record.document = "replaced".into();
        index.upsert(&[record]).await.unwrap();

        let all = index.get(&MetadataFilter::new(), None).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].document, "replaced");
    }
}
