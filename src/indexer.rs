//! Transcript indexing and semantic search.
//!
//! Turns a transcript into chunk records (chunk, embed, upsert) and answers
//! free-text queries against the vector index.

use crate::catalog::ProcessingItem;
use crate::chunking::{ChunkingConfig, TextChunker};
use crate::embedding::Embedder;
use crate::error::{ClipdexError, Result};
use crate::transcription::TranscriptDocument;
use crate::vector_store::{ChunkMetadata, ChunkRecord, IndexStats, MetadataFilter, VectorIndex};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Chunks returned by [`TranscriptIndexer::item_context`] when no limit is given.
pub const DEFAULT_CONTEXT_CHUNKS: usize = 10;

/// A search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// Chunk ID.
    pub id: String,
    /// Chunk text.
    pub text: String,
    /// Chunk metadata.
    pub metadata: ChunkMetadata,
    /// Cosine distance to the query (lower is more similar).
    pub distance: f32,
}

/// Chunks, embeds and indexes transcripts.
pub struct TranscriptIndexer {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    chunker: TextChunker,
}

impl TranscriptIndexer {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>, config: ChunkingConfig) -> Self {
        Self {
            embedder,
            index,
            chunker: TextChunker::new(config),
        }
    }

    /// Index an item's transcript, replacing any chunks from earlier runs.
    ///
    /// Returns the number of chunks written.
    #[instrument(skip(self, item, transcript), fields(external_id = %item.external_id))]
    pub async fn index_transcript(
        &self,
        item: &ProcessingItem,
        transcript: &TranscriptDocument,
    ) -> Result<usize> {
        if !transcript.has_text() {
            return Err(ClipdexError::Indexing(format!(
                "Transcript for {} has no text",
                item.external_id
            )));
        }

        let chunks = self.chunker.chunk(&transcript.text);
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        debug!("Split transcript into {} chunks", texts.len());

        let embeddings = self.embedder.embed_batch(&texts).await.map_err(as_indexing)?;
        if embeddings.len() != texts.len() {
            return Err(ClipdexError::Indexing(format!(
                "Embedder returned {} vectors for {} chunks",
                embeddings.len(),
                texts.len()
            )));
        }

        let total_chunks = chunks.len() as u32;
        let duration = item.duration_seconds.unwrap_or(transcript.duration);
        let records: Vec<ChunkRecord> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| ChunkRecord {
                id: ChunkRecord::chunk_id(&item.external_id, chunk.index),
                embedding,
                document: chunk.text,
                metadata: ChunkMetadata {
                    item_id: item.id,
                    external_id: item.external_id.clone(),
                    chunk_index: chunk.index as u32,
                    total_chunks,
                    language: transcript.language.clone(),
                    views: item.views,
                    likes: item.likes,
                    title: item.title.clone(),
                    duration,
                },
            })
            .collect();

        let removed = self
            .index
            .delete(&MetadataFilter::external_id(&item.external_id))
            .await
            .map_err(as_indexing)?;
        if removed > 0 {
            debug!("Removed {} chunks from a previous run", removed);
        }

        let written = self.index.upsert(&records).await.map_err(as_indexing)?;
        info!("Indexed {} chunks for {}", written, item.external_id);
        Ok(written)
    }

    /// Semantic search over all indexed chunks.
    #[instrument(skip(self, filter))]
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() {
            return Err(ClipdexError::InvalidInput("Search query is empty".into()));
        }

        let embedding = self.embedder.embed(query).await?;
        let hits = self.index.query(&embedding, limit, filter).await?;

        Ok(hits
            .into_iter()
            .map(|hit| SearchHit {
                id: hit.record.id,
                text: hit.record.document,
                metadata: hit.record.metadata,
                distance: hit.distance,
            })
            .collect())
    }

    /// An item's chunks joined in order, as retrieval context.
    pub async fn item_context(&self, external_id: &str, max_chunks: Option<usize>) -> Result<String> {
        let limit = max_chunks.unwrap_or(DEFAULT_CONTEXT_CHUNKS);
        let records = self
            .index
            .get(&MetadataFilter::external_id(external_id), Some(limit))
            .await?;

        Ok(records
            .into_iter()
            .map(|r| r.document)
            .collect::<Vec<_>>()
            .join(" "))
    }

    /// Remove every chunk of an item. Returns the number removed.
    pub async fn delete_item(&self, external_id: &str) -> Result<usize> {
        self.index.delete(&MetadataFilter::external_id(external_id)).await
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        self.index.stats().await
    }
}

fn as_indexing(e: ClipdexError) -> ClipdexError {
    match e {
        ClipdexError::Indexing(_) => e,
        other => ClipdexError::Indexing(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ItemStatus;
    use crate::testing::{numbered_words, HashEmbedder};
    use crate::transcription::TranscriptSegment;
    use crate::vector_store::{MemoryVectorIndex, SqliteVectorIndex};
    use chrono::Utc;

    fn item(external_id: &str) -> ProcessingItem {
        let now = Utc::now();
        ProcessingItem {
            id: 7,
            external_id: external_id.to_string(),
            title: "How to index".to_string(),
            views: 1200,
            likes: 80,
            duration_seconds: Some(95.0),
            audio_key: Some(format!("audio/{}.mp3", external_id)),
            transcript_key: Some(format!("transcripts/{}.json", external_id)),
            status: ItemStatus::Indexing,
            error: None,
            indexed_at: None,
            claimed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn transcript(text: &str) -> TranscriptDocument {
        TranscriptDocument::from_segments("en", vec![TranscriptSegment::new(0.0, 95.0, text)])
    }

    fn indexer(index: Arc<dyn VectorIndex>) -> (Arc<HashEmbedder>, TranscriptIndexer) {
        let embedder = Arc::new(HashEmbedder::default());
        let indexer = TranscriptIndexer::new(embedder.clone(), index, ChunkingConfig::default());
        (embedder, indexer)
    }

    #[tokio::test]
    async fn test_index_1200_character_transcript() {
        let index = Arc::new(MemoryVectorIndex::new());
        let (embedder, indexer) = indexer(index.clone());

        let text = numbered_words(240);
        let written = indexer.index_transcript(&item("abc123"), &transcript(&text)).await.unwrap();
        assert_eq!(written, 3);
        // One batch call for all chunks
        assert_eq!(embedder.calls(), 1);

        let records = index.get(&MetadataFilter::external_id("abc123"), None).await.unwrap();
        assert_eq!(
            records.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec!["abc123_chunk_0", "abc123_chunk_1", "abc123_chunk_2"]
        );
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.metadata.chunk_index, i as u32);
            assert_eq!(record.metadata.total_chunks, 3);
            assert_eq!(record.metadata.language, "en");
            assert_eq!(record.metadata.views, 1200);
            assert_eq!(record.metadata.title, "How to index");
            assert_eq!(record.metadata.duration, 95.0);
            assert_eq!(record.embedding.len(), 64);
        }
    }

    #[tokio::test]
    async fn test_reindex_replaces_previous_chunks() {
        let index = Arc::new(SqliteVectorIndex::in_memory().unwrap());
        let (_embedder, indexer) = indexer(index.clone());
        let item = item("abc123");

        let first = indexer
            .index_transcript(&item, &transcript(&numbered_words(500)))
            .await
            .unwrap();
        let second = indexer
            .index_transcript(&item, &transcript(&numbered_words(120)))
            .await
            .unwrap();
        assert!(first > second);

        let filter = MetadataFilter::external_id("abc123");
        assert_eq!(index.count(&filter).await.unwrap(), second);
        let records = index.get(&filter, None).await.unwrap();
        assert!(records.iter().all(|r| r.metadata.total_chunks as usize == second));
    }

    #[tokio::test]
    async fn test_reindex_leaves_other_items_alone() {
        let index = Arc::new(MemoryVectorIndex::new());
        let (_embedder, indexer) = indexer(index.clone());

        indexer.index_transcript(&item("one"), &transcript("first video words")).await.unwrap();
        indexer.index_transcript(&item("two"), &transcript("second video words")).await.unwrap();
        indexer.index_transcript(&item("one"), &transcript("first video again")).await.unwrap();

        let stats = indexer.stats().await.unwrap();
        assert_eq!(stats.total_items, 2);
        assert_eq!(stats.total_chunks, 2);
    }

    #[tokio::test]
    async fn test_empty_transcript_is_an_indexing_error() {
        let index = Arc::new(MemoryVectorIndex::new());
        let (embedder, indexer) = indexer(index);

        let err = indexer.index_transcript(&item("abc123"), &transcript("  ")).await.unwrap_err();
        assert!(matches!(err, ClipdexError::Indexing(_)));
        assert_eq!(embedder.calls(), 0);
    }

    #[tokio::test]
    async fn test_embedding_failure_keeps_previous_chunks() {
        let index = Arc::new(MemoryVectorIndex::new());
        let (embedder, indexer) = indexer(index.clone());
        let item = item("abc123");

        indexer.index_transcript(&item, &transcript("hello world")).await.unwrap();
        embedder.set_failing(true);

        let err = indexer.index_transcript(&item, &transcript("new words")).await.unwrap_err();
        assert!(matches!(err, ClipdexError::Indexing(_)));
        assert!(err.to_string().contains("embedding service unavailable"));
        assert_eq!(index.count(&MetadataFilter::external_id("abc123")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_search_orders_by_distance() {
        let index = Arc::new(MemoryVectorIndex::new());
        let (_embedder, indexer) = indexer(index);

        indexer
            .index_transcript(&item("cooking"), &transcript("pasta sauce tomato garlic basil"))
            .await
            .unwrap();
        indexer
            .index_transcript(&item("rust"), &transcript("borrow checker lifetimes traits"))
            .await
            .unwrap();

        let hits = indexer
            .search("tomato pasta", 5, &MetadataFilter::new())
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].metadata.external_id, "cooking");
        assert!(hits[0].distance <= hits[1].distance);

        let filtered = indexer
            .search("tomato pasta", 5, &MetadataFilter::external_id("rust"))
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "rust_chunk_0");

        assert!(indexer.search("  ", 5, &MetadataFilter::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_item_context_and_delete() {
        let index = Arc::new(MemoryVectorIndex::new());
        let (_embedder, indexer) = indexer(index);

        let text = numbered_words(240);
        indexer.index_transcript(&item("abc123"), &transcript(&text)).await.unwrap();

        let context = indexer.item_context("abc123", Some(2)).await.unwrap();
        assert!(context.starts_with("w000 "));
        assert!(context.contains("w194"));
        assert!(!context.contains("w195"));

        assert_eq!(indexer.delete_item("abc123").await.unwrap(), 3);
        assert_eq!(indexer.item_context("abc123", None).await.unwrap(), "");
    }
}
