//! Vector index abstraction for clipdex.
//!
//! Stores transcript chunks as `(id, embedding, document, metadata)` records
//! and supports nearest-neighbor queries plus metadata-filtered get/delete.

mod memory;
mod sqlite;

pub use memory::MemoryVectorIndex;
pub use sqlite::SqliteVectorIndex;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata attached to every chunk record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Internal ID of the owning item.
    pub item_id: i64,
    /// External content ID of the owning item.
    pub external_id: String,
    /// Position of the chunk within the item.
    pub chunk_index: u32,
    /// Number of chunks the item was split into.
    pub total_chunks: u32,
    /// Detected transcript language.
    pub language: String,
    /// Item view count when indexed.
    pub views: u64,
    /// Item like count when indexed.
    pub likes: u64,
    /// Item title when indexed.
    pub title: String,
    /// Item duration in seconds.
    pub duration: f64,
}

/// A record stored in the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Stable chunk ID: `{external_id}_chunk_{index}`.
    pub id: String,
    /// Embedding vector.
    pub embedding: Vec<f32>,
    /// Chunk text.
    pub document: String,
    /// Chunk metadata.
    pub metadata: ChunkMetadata,
}

impl ChunkRecord {
    /// The stable ID of chunk `index` of an item.
    pub fn chunk_id(external_id: &str, index: usize) -> String {
        format!("{}_chunk_{}", external_id, index)
    }
}

/// A query match.
#[derive(Debug, Clone)]
pub struct QueryHit {
    /// The matched record.
    pub record: ChunkRecord,
    /// Cosine distance to the query (lower is more similar).
    pub distance: f32,
}

/// Conjunction of equality conditions over chunk metadata fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter {
    conditions: BTreeMap<String, serde_json::Value>,
}

impl MetadataFilter {
    /// A filter that matches every record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `field == value`.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.conditions.insert(field.into(), value.into());
        self
    }

    /// Filter on an item's external content ID.
    pub fn external_id(external_id: &str) -> Self {
        Self::new().eq("external_id", external_id)
    }

    /// The external ID condition, if present.
    pub fn external_id_condition(&self) -> Option<&str> {
        self.conditions.get("external_id").and_then(|v| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Whether the metadata satisfies every condition.
    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        if self.conditions.is_empty() {
            return true;
        }
        let Ok(serde_json::Value::Object(fields)) = serde_json::to_value(metadata) else {
            return false;
        };
        self.conditions
            .iter()
            .all(|(field, expected)| fields.get(field).is_some_and(|actual| values_equal(actual, expected)))
    }
}

/// JSON equality that treats integers and floats with the same value as equal.
fn values_equal(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) if a.is_number() && b.is_number() => x == y,
        _ => a == b,
    }
}

/// Collection statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    /// Number of stored chunks.
    pub total_chunks: usize,
    /// Number of distinct items with at least one chunk.
    pub total_items: usize,
}

/// Trait for vector index implementations.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace records by ID. Returns the number written.
    async fn upsert(&self, records: &[ChunkRecord]) -> Result<usize>;

    /// Nearest neighbors of `embedding` among records matching `filter`,
    /// ordered by increasing distance.
    async fn query(
        &self,
        embedding: &[f32],
        limit: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<QueryHit>>;

    /// Records matching `filter`, ordered by external ID then chunk index.
    async fn get(&self, filter: &MetadataFilter, limit: Option<usize>) -> Result<Vec<ChunkRecord>>;

    /// Delete records matching `filter`. Returns the number deleted.
    async fn delete(&self, filter: &MetadataFilter) -> Result<usize>;

    /// Number of records matching `filter`.
    async fn count(&self, filter: &MetadataFilter) -> Result<usize> {
        Ok(self.get(filter, None).await?.len())
    }

    /// Collection statistics.
    async fn stats(&self) -> Result<IndexStats>;
}

/// Compute cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// Cosine distance in `[0, 2]`.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

/// Rank candidate records against a query embedding.
pub(crate) fn rank(
    embedding: &[f32],
    candidates: impl Iterator<Item = ChunkRecord>,
    limit: usize,
) -> Vec<QueryHit> {
    let mut hits: Vec<QueryHit> = candidates
        .map(|record| QueryHit {
            distance: cosine_distance(embedding, &record.embedding),
            record,
        })
        .collect();

    hits.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.record.id.cmp(&b.record.id))
    });
    hits.truncate(limit);
    hits
}

#[cfg(test)]
pub(crate) fn test_record(external_id: &str, index: u32, total: u32, embedding: Vec<f32>) -> ChunkRecord {
    ChunkRecord {
        id: ChunkRecord::chunk_id(external_id, index as usize),
        embedding,
        document: format!("{} chunk {}", external_id, index),
        metadata: ChunkMetadata {
            item_id: 1,
            external_id: external_id.to_string(),
            chunk_index: index,
            total_chunks: total,
            language: "en".to_string(),
            views: 100,
            likes: 10,
            title: format!("Title of {}", external_id),
            duration: 60.0,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!((cosine_similarity(&a, &c)).abs() < 0.001);

        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) + 1.0).abs() < 0.001);
        assert!((cosine_distance(&a, &d) - 2.0).abs() < 0.001);
    }

    #[test]
    fn test_chunk_id() {
        assert_eq!(ChunkRecord::chunk_id("abc123", 2), "abc123_chunk_2");
    }

    #[test]
    fn test_metadata_filter() {
        let record = test_record("abc123", 0, 3, vec![1.0]);

        assert!(MetadataFilter::new().matches(&record.metadata));
        assert!(MetadataFilter::external_id("abc123").matches(&record.metadata));
        assert!(!MetadataFilter::external_id("other").matches(&record.metadata));
        assert!(MetadataFilter::new()
            .eq("language", "en")
            .eq("chunk_index", 0)
            .matches(&record.metadata));
        assert!(MetadataFilter::new().eq("duration", 60).matches(&record.metadata));
        assert!(!MetadataFilter::new().eq("no_such_field", 1).matches(&record.metadata));
        assert_eq!(
            MetadataFilter::external_id("abc123").external_id_condition(),
            Some("abc123")
        );
    }

    #[test]
    fn test_rank_orders_by_distance() {
        let records = vec![
            test_record("a", 0, 1, vec![0.0, 1.0]),
            test_record("b", 0, 1, vec![1.0, 0.0]),
            test_record("c", 0, 1, vec![0.7, 0.7]),
        ];
        let hits = rank(&[1.0, 0.0], records.into_iter(), 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].record.metadata.external_id, "b");
        assert_eq!(hits[1].record.metadata.external_id, "c");
        assert!(hits[0].distance <= hits[1].distance);
    }
}
