//! Error types for clipdex.

use thiserror::Error;

/// Library-level error type for clipdex operations.
#[derive(Error, Debug)]
pub enum ClipdexError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Media fetch failed: {0}")]
    Fetch(String),

    #[error("Transcription failed: {0}")]
    Transcription(String),

    #[error("Indexing failed: {0}")]
    Indexing(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Embedding generation failed: {0}")]
    Embedding(String),

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("Blob store error: {0}")]
    BlobStore(String),

    #[error("Task queue error: {0}")]
    Queue(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("OpenAI API error: {0}")]
    OpenAI(String),

    #[error("External tool not found: {0}. Please install it and ensure it's in your PATH.")]
    ToolNotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl ClipdexError {
    /// Whether this error belongs to an item's pipeline rather than to shared
    /// infrastructure (catalog, queue).
    pub fn is_item_scoped(&self) -> bool {
        !matches!(
            self,
            ClipdexError::Catalog(_) | ClipdexError::Queue(_) | ClipdexError::Database(_)
        )
    }
}

/// Result type alias for clipdex operations.
pub type Result<T> = std::result::Result<T, ClipdexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_scope() {
        assert!(ClipdexError::Fetch("gone".into()).is_item_scoped());
        assert!(ClipdexError::Timeout("fetch".into()).is_item_scoped());
        assert!(!ClipdexError::Catalog("locked".into()).is_item_scoped());
        assert!(!ClipdexError::Database(rusqlite::Error::InvalidQuery).is_item_scoped());
    }

    #[test]
    fn test_messages_keep_cause() {
        let err = ClipdexError::Transcription("provider timeout after 600s".into());
        assert_eq!(err.to_string(), "Transcription failed: provider timeout after 600s");
    }
}
