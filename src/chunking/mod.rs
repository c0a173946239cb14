//! Transcript chunking.
//!
//! Splits transcript text into overlapping windows of roughly `chunk_size`
//! characters. Tokens are whitespace-separated words; a chunk is flushed as
//! soon as its cumulative length (each token plus one separator) reaches
//! `chunk_size`, and the next chunk starts with the last `overlap / 10`
//! tokens of the previous one.
//!
//! The same text and configuration always produce the same chunks.

use serde::{Deserialize, Serialize};

/// Configuration for chunking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Target chunk length in characters.
    pub chunk_size: usize,
    /// Characters of context carried over between chunks.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            overlap: 50,
        }
    }
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self { chunk_size, overlap }
    }

    /// Number of trailing tokens carried into the next chunk.
    pub fn overlap_tokens(&self) -> usize {
        self.overlap / 10
    }
}

impl From<&crate::config::ChunkingSettings> for ChunkingConfig {
    fn from(settings: &crate::config::ChunkingSettings) -> Self {
        Self::new(settings.chunk_size, settings.overlap)
    }
}

/// A window of transcript text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    /// Position of this chunk, starting at 0.
    pub index: usize,
    /// Chunk text (tokens joined by single spaces).
    pub text: String,
    /// Leading tokens repeated from the previous chunk.
    pub carried_tokens: usize,
}

impl TextChunk {
    /// Tokens that first appear in this chunk.
    pub fn fresh_tokens(&self) -> impl Iterator<Item = &str> {
        self.text.split(' ').skip(self.carried_tokens)
    }
}

/// Greedy word-window chunker.
#[derive(Debug, Clone, Default)]
pub struct TextChunker {
    config: ChunkingConfig,
}

impl TextChunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Split text into chunks.
    pub fn chunk(&self, text: &str) -> Vec<TextChunk> {
        let keep = self.config.overlap_tokens();
        let mut chunks = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut current_len = 0usize;
        let mut carried = 0usize;

        for word in text.split_whitespace() {
            current.push(word);
            current_len += word.len() + 1;

            if current_len >= self.config.chunk_size {
                chunks.push(TextChunk {
                    index: chunks.len(),
                    text: current.join(" "),
                    carried_tokens: carried,
                });

                let tail_start = current.len().saturating_sub(keep);
                current = if keep > 0 { current.split_off(tail_start) } else { Vec::new() };
                current_len = current.iter().map(|w| w.len() + 1).sum();
                carried = current.len();
            }
        }

        if !current.is_empty() {
            chunks.push(TextChunk {
                index: chunks.len(),
                text: current.join(" "),
                carried_tokens: carried,
            });
        }

        chunks
    }
}

/// Split text into chunk strings with the given configuration.
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Vec<String> {
    TextChunker::new(*config)
        .chunk(text)
        .into_iter()
        .map(|c| c.text)
        .collect()
}

/// Rebuild the original token sequence from chunks by dropping carried tokens.
pub fn unique_tokens(chunks: &[TextChunk]) -> Vec<&str> {
    chunks.iter().flat_map(|c| c.fresh_tokens()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::numbered_words;

    #[test]
    fn test_1200_characters_make_three_chunks() {
        let text = numbered_words(240);
        assert_eq!(text.len(), 1199);

        let chunks = TextChunker::new(ChunkingConfig::default()).chunk(&text);
        assert_eq!(chunks.len(), 3);
        assert_eq!(
            chunks.iter().map(|c| c.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );

        // Two full windows, then the remainder with five carried words
        assert_eq!(chunks[0].text.split(' ').count(), 100);
        assert_eq!(chunks[1].text.split(' ').count(), 100);
        assert_eq!(chunks[2].text.split(' ').count(), 50);
        assert!(chunks[1].text.starts_with("w095 w096 w097 w098 w099 w100"));
        assert_eq!(chunks[2].carried_tokens, 5);
        assert!(chunks[0].text.len() >= 499);
    }

    #[test]
    fn test_chunking_is_deterministic() {
        let text = "the quick brown fox jumps over the lazy dog ".repeat(80);
        let config = ChunkingConfig::new(120, 30);

        let first = chunk_text(&text, &config);
        let second = chunk_text(&text, &config);
        assert_eq!(first, second);
        assert!(first.len() > 1);
    }

    #[test]
    fn test_no_tokens_dropped() {
        let text = numbered_words(1037);
        for config in [
            ChunkingConfig::default(),
            ChunkingConfig::new(64, 0),
            ChunkingConfig::new(200, 90),
            ChunkingConfig::new(1, 50),
        ] {
            let chunks = TextChunker::new(config).chunk(&text);
            let rebuilt = unique_tokens(&chunks);
            let original: Vec<&str> = text.split_whitespace().collect();
            assert_eq!(rebuilt, original, "config {:?}", config);
        }
    }

    #[test]
    fn test_overlap_carries_tail_tokens() {
        let text = numbered_words(60);
        let chunks = TextChunker::new(ChunkingConfig::new(100, 30)).chunk(&text);

        for pair in chunks.windows(2) {
            let prev: Vec<&str> = pair[0].text.split(' ').collect();
            let next: Vec<&str> = pair[1].text.split(' ').collect();
            assert_eq!(pair[1].carried_tokens, 3);
            assert_eq!(&prev[prev.len() - 3..], &next[..3]);
        }
    }

    #[test]
    fn test_zero_overlap_has_no_repeats() {
        let text = numbered_words(300);
        let chunks = TextChunker::new(ChunkingConfig::new(100, 5)).chunk(&text);
        assert!(chunks.iter().all(|c| c.carried_tokens == 0));

        let total: usize = chunks.iter().map(|c| c.text.split(' ').count()).sum();
        assert_eq!(total, 300);
    }

    #[test]
    fn test_exact_fill_flushes_carried_tail() {
        // 100 words of 4 chars fill exactly one 500-char window
        let text = numbered_words(100);
        let chunks = TextChunker::new(ChunkingConfig::default()).chunk(&text);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].text, "w095 w096 w097 w098 w099");
        assert_eq!(chunks[1].carried_tokens, 5);
        assert_eq!(chunks[1].fresh_tokens().count(), 0);

        let original: Vec<&str> = text.split_whitespace().collect();
        assert_eq!(unique_tokens(&chunks), original);
    }

    #[test]
    fn test_short_and_empty_text() {
        let chunker = TextChunker::default();
        assert!(chunker.chunk("").is_empty());
        assert!(chunker.chunk("   \n\t ").is_empty());

        let chunks = chunker.chunk("just a few words");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "just a few words");
    }

    #[test]
    fn test_whitespace_is_normalized() {
        let chunks = chunk_text("hello\n\n  world\tagain", &ChunkingConfig::default());
        assert_eq!(chunks, vec!["hello world again"]);
    }
}
