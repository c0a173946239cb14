//! SQLite-based vector index implementation.
//!
//! Embeddings are stored as little-endian `f32` blobs and distances are
//! computed in Rust. Metadata is kept as JSON, with the external ID copied into
//! its own indexed column so per-item lookups and deletes stay cheap.

use super::{rank, ChunkRecord, IndexStats, MetadataFilter, QueryHit, VectorIndex};
use crate::error::{ClipdexError, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, instrument};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS chunks (
        id TEXT PRIMARY KEY,
        external_id TEXT NOT NULL,
        chunk_index INTEGER NOT NULL,
        document TEXT NOT NULL,
        embedding BLOB NOT NULL,
        metadata TEXT NOT NULL,
        indexed_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_chunks_external_id ON chunks(external_id);
"#;

/// SQLite-based vector index.
pub struct SqliteVectorIndex {
    conn: Mutex<Connection>,
}

impl SqliteVectorIndex {
    /// Open (or create) a vector index at `path`.
    #[instrument(skip_all)]
    pub fn new(path: &Path, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch(SCHEMA)?;

        info!("Initialized SQLite vector index at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory index (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| ClipdexError::VectorStore(format!("Failed to acquire lock: {}", e)))
    }

    /// Serialize embedding to bytes.
    fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    /// Deserialize embedding from bytes.
    fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| {
                let arr: [u8; 4] = chunk.try_into().unwrap_or_default();
                f32::from_le_bytes(arr)
            })
            .collect()
    }

    /// Load every record matching `filter`, pushing the external ID
    /// condition down into SQL.
    fn load(conn: &Connection, filter: &MetadataFilter) -> Result<Vec<ChunkRecord>> {
        let mut sql = String::from("SELECT id, document, embedding, metadata FROM chunks");
        let external_id = filter.external_id_condition();
        if external_id.is_some() {
            sql.push_str(" WHERE external_id = ?1");
        }
        sql.push_str(" ORDER BY external_id, chunk_index");

        let mut stmt = conn.prepare(&sql)?;
        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<(String, String, Vec<u8>, String)> {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
                row.get::<_, String>(3)?,
            ))
        };
        let rows = match external_id {
            Some(id) => stmt.query_map(params![id], map_row)?.collect::<Vec<_>>(),
            None => stmt.query_map([], map_row)?.collect::<Vec<_>>(),
        };

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let (id, document, embedding, metadata) = row?;
            let record = ChunkRecord {
                id,
                document,
                embedding: Self::bytes_to_embedding(&embedding),
                metadata: serde_json::from_str(&metadata)?,
            };
            if filter.matches(&record.metadata) {
                records.push(record);
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    #[instrument(skip(self, records), fields(count = records.len()))]
    async fn upsert(&self, records: &[ChunkRecord]) -> Result<usize> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let indexed_at = Utc::now().to_rfc3339();

        for record in records {
            tx.execute(
                r#"
                INSERT OR REPLACE INTO chunks
                (id, external_id, chunk_index, document, embedding, metadata, indexed_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    record.id,
                    record.metadata.external_id,
                    record.metadata.chunk_index,
                    record.document,
                    Self::embedding_to_bytes(&record.embedding),
                    serde_json::to_string(&record.metadata)?,
                    indexed_at,
                ],
            )?;
        }

        tx.commit()?;
        debug!("Upserted {} chunks", records.len());
        Ok(records.len())
    }

    #[instrument(skip(self, embedding, filter))]
    async fn query(
        &self,
        embedding: &[f32],
        limit: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<QueryHit>> {
        let conn = self.lock()?;
        let candidates = Self::load(&conn, filter)?;
        let hits = rank(embedding, candidates.into_iter(), limit);
        debug!("Query returned {} hits", hits.len());
        Ok(hits)
    }

    async fn get(&self, filter: &MetadataFilter, limit: Option<usize>) -> Result<Vec<ChunkRecord>> {
        let conn = self.lock()?;
        let mut records = Self::load(&conn, filter)?;
        if let Some(limit) = limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    #[instrument(skip(self))]
    async fn delete(&self, filter: &MetadataFilter) -> Result<usize> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;

        let deleted = match (filter.external_id_condition(), filter.is_empty()) {
            (_, true) => tx.execute("DELETE FROM chunks", [])?,
            // Only the external ID condition: delete directly
            (Some(external_id), false) if filter == &MetadataFilter::external_id(external_id) => {
                tx.execute("DELETE FROM chunks WHERE external_id = ?1", params![external_id])?
            }
            _ => {
                let ids: Vec<String> = Self::load(&tx, filter)?.into_iter().map(|r| r.id).collect();
                for id in &ids {
                    tx.execute("DELETE FROM chunks WHERE id = ?1", params![id])?;
                }
                ids.len()
            }
        };

        tx.commit()?;
        debug!("Deleted {} chunks", deleted);
        Ok(deleted)
    }

    async fn stats(&self) -> Result<IndexStats> {
        let conn = self.lock()?;
        let (total_chunks, total_items): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COUNT(DISTINCT external_id) FROM chunks",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(IndexStats {
            total_chunks: total_chunks as usize,
            total_items: total_items as usize,
        })
    }
}
