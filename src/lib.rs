//! clipdex - video transcript indexing pipeline
//!
//! Takes registered videos through three stages: fetch the audio, transcribe
//! it, then chunk, embed and index the transcript for semantic search. Each
//! item's progress is persisted, so a re-run resumes from the last completed
//! stage.
//!
//! # Architecture
//!
//! - `config` - Configuration management
//! - `blob` - Artifact storage (audio, transcripts)
//! - `media` - Audio fetching with yt-dlp and ffmpeg
//! - `transcription` - Speech-to-text
//! - `chunking` - Transcript chunking
//! - `embedding` - Embedding generation
//! - `vector_store` - Vector index abstraction
//! - `indexer` - Chunk, embed and index; semantic search
//! - `catalog` - Processing item state machine and persistence
//! - `orchestrator` - Pipeline coordination
//! - `queue` - Durable task queue and workers
//! - `sync` - Batch registration and enqueueing
//!
//! # Example
//!
//! ```rust,no_run
//! use clipdex::catalog::{ItemStore, NewItem};
//! use clipdex::config::Settings;
//! use clipdex::orchestrator::{Orchestrator, ProcessOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let orchestrator = Orchestrator::new(&settings)?;
//!
//!     let item = orchestrator.catalog().register(&NewItem::new("dQw4w9WgXcQ")).await?;
//!     let outcome = orchestrator
//!         .process_item(item.id, &item.external_id, ProcessOptions::default())
//!         .await?;
//!     println!("{:?}", outcome);
//!
//!     Ok(())
//! }
//! ```

pub mod blob;
pub mod catalog;
pub mod chunking;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod indexer;
pub mod media;
pub mod openai;
pub mod orchestrator;
pub mod queue;
pub mod sync;
pub mod transcription;
pub mod vector_store;

#[cfg(test)]
mod testing;

pub use error::{ClipdexError, Result};
