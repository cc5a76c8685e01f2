//! Splitting documents into overlapping token-bounded passages.
//!
//! The chunker slides a window of `max_tokens` tokens across the document.
//! Each following window starts `overlap` tokens before the previous one
//! ended, and the loop stops as soon as a window reaches the end of the text,
//! so the final window is emitted exactly once.

use std::ops::Range;

use serde::Deserialize;

use crate::{
    chunk_id::ChunkId,
    error::{Error, Result},
    tokenizer::Tokenizer,
};

/// Default window size in tokens.
pub const DEFAULT_MAX_TOKENS: usize = 400;

/// Default number of tokens shared by consecutive windows.
pub const DEFAULT_OVERLAP: usize = 80;

/// Window settings for the chunker.
///
/// # Examples
///
/// ```
/// use docrag::chunking::ChunkingConfig;
///
/// let config = ChunkingConfig::default();
/// assert_eq!((config.max_tokens, config.overlap), (400, 80));
/// assert!(ChunkingConfig { max_tokens: 10, overlap: 10 }.validate().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            overlap: DEFAULT_OVERLAP,
        }
    }
}

impl ChunkingConfig {
    /// Reject window settings that could not make progress.
    pub fn validate(&self) -> Result<()> {
        if self.max_tokens == 0 {
            return Err(Error::Config(
                "max_tokens must be at least 1".to_string(),
            ));
        }
        if self.overlap >= self.max_tokens {
            return Err(Error::Config(format!(
                "overlap ({}) must be smaller than max_tokens ({})",
                self.overlap, self.max_tokens
            )));
        }
        Ok(())
    }
}

/// One window of a tokenized text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Zero-based window index within the text.
    pub index: usize,
    /// Token positions `[start, end)` covered by this window.
    pub token_span: Range<usize>,
    /// Byte offset of the window start in the original text.
    pub start_offset: usize,
    pub text: String,
}

/// Split `text` into overlapping windows of at most `config.max_tokens`
/// tokens.
///
/// Empty text yields no chunks; text shorter than the window yields exactly
/// one.
///
/// # Examples
///
/// ```
/// use docrag::chunking::{chunk_text, ChunkingConfig};
/// use docrag::tokenizer::Cl100kTokenizer;
///
/// let tok = Cl100kTokenizer::new();
/// let config = ChunkingConfig { max_tokens: 4, overlap: 1 };
/// let chunks = chunk_text("one two six ten red big cat", &tok, config).unwrap();
/// assert_eq!(chunks.len(), 2);
/// assert_eq!(chunks[0].text, "one two six ten");
/// assert_eq!(chunks[1].text, " ten red big cat");
/// ```
pub fn chunk_text(
    text: &str,
    tokenizer: &dyn Tokenizer,
    config: ChunkingConfig,
) -> Result<Vec<TextChunk>> {
    config.validate()?;

    let spans = tokenizer.encode(text)?;
    let total = spans.len();
    let mut chunks = Vec::new();
    if total == 0 {
        return Ok(chunks);
    }

    let mut start = 0;
    loop {
        let end = (start + config.max_tokens).min(total);
        let window = &spans[start..end];
        let piece = tokenizer.decode(text, window);
        // A window holding only the leading tokens of a split character
        // carries no text.
        if !piece.is_empty() {
            chunks.push(TextChunk {
                index: chunks.len(),
                token_span: start..end,
                start_offset: window[0].start,
                text: piece,
            });
        }

        if end == total {
            break;
        }
        start = end.saturating_sub(config.overlap);
    }

    Ok(chunks)
}

/// A raw document as read from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub path: String,
    pub text: String,
}

impl Document {
    pub fn new(path: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            text: text.into(),
        }
    }
}

/// A retrievable passage of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: ChunkId,
    pub source_path: String,
    pub chunk_index: usize,
    pub text: String,
    pub token_span: Range<usize>,
}

/// Chunk a document and assign content-derived ids to its passages.
pub fn chunk_document(
    document: &Document,
    tokenizer: &dyn Tokenizer,
    config: ChunkingConfig,
) -> Result<Vec<Chunk>> {
    let chunks = chunk_text(&document.text, tokenizer, config)?;
    Ok(chunks
        .into_iter()
        .map(|c| Chunk {
            id: ChunkId::new(&document.path, c.index, &c.text),
            source_path: document.path.clone(),
            chunk_index: c.index,
            text: c.text,
            token_span: c.token_span,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::tokenizer::{Cl100kTokenizer, HeuristicTokenizer};

    /// One token per whitespace-separated word, for easy counting.
    struct WordTokenizer;

    impl Tokenizer for WordTokenizer {
        fn encode(&self, text: &str) -> Result<Vec<crate::tokenizer::TokenSpan>> {
            let mut spans = Vec::new();
            let mut start = 0;
            for (i, c) in text.char_indices() {
                if c == ' ' && i > start {
                    spans.push(start..i);
                    start = i;
                }
            }
            if start < text.len() {
                spans.push(start..text.len());
            }
            Ok(spans)
        }
    }

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn empty_text_no_chunks() {
        let chunks =
            chunk_text("", &WordTokenizer, ChunkingConfig::default()).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn short_text_single_chunk() {
        let text = "Hello, world!";
        let chunks =
            chunk_text(text, &HeuristicTokenizer::default(), Default::default())
                .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].start_offset, 0);
    }

    #[test]
    fn windows_follow_overlap_rule() {
        let config = ChunkingConfig {
            max_tokens: 4,
            overlap: 2,
        };
        let chunks = chunk_text(&words(10), &WordTokenizer, config).unwrap();
        let spans: Vec<_> = chunks.iter().map(|c| c.token_span.clone()).collect();
        assert_eq!(spans, vec![0..4, 2..6, 4..8, 6..10]);
    }

    #[test]
    fn last_window_emitted_once() {
        let config = ChunkingConfig {
            max_tokens: 5,
            overlap: 1,
        };
        let chunks = chunk_text(&words(5), &WordTokenizer, config).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].token_span, 0..5);
    }

    #[test]
    fn overlap_equal_to_window_rejected() {
        let config = ChunkingConfig {
            max_tokens: 3,
            overlap: 3,
        };
        let err = chunk_text("a b c d", &WordTokenizer, config).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn zero_window_rejected() {
        let config = ChunkingConfig {
            max_tokens: 0,
            overlap: 0,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn chunk_document_assigns_ids_and_indices() {
        let doc = Document::new("notes/a.md", words(9));
        let config = ChunkingConfig {
            max_tokens: 4,
            overlap: 1,
        };
        let chunks = chunk_document(&doc, &WordTokenizer, config).unwrap();
        assert_eq!(chunks.len(), 3);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i);
            assert_eq!(chunk.source_path, "notes/a.md");
            assert_eq!(chunk.id, ChunkId::new("notes/a.md", i, &chunk.text));
        }
        let unique: std::collections::HashSet<_> =
            chunks.iter().map(|c| c.id.clone()).collect();
        assert_eq!(unique.len(), chunks.len());
    }

    #[test]
    fn handles_multibyte_text() {
        let text = "café ☕ naïve 日本語 🎉 ".repeat(50);
        let config = ChunkingConfig {
            max_tokens: 20,
            overlap: 5,
        };
        let chunks =
            chunk_text(&text, &HeuristicTokenizer::default(), config).unwrap();
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(!chunk.text.is_empty());
            assert!(text[chunk.start_offset..].starts_with(&chunk.text));
        }
    }

    #[test]
    fn cjk_windows_respect_bpe_token_budget() {
        let tok = Cl100kTokenizer::new();
        let text = "日本語のテキストを分割します。".repeat(40);
        let config = ChunkingConfig {
            max_tokens: 32,
            overlap: 8,
        };
        let chunks = chunk_text(&text, &tok, config).unwrap();
        let total = tok.count(&text).unwrap();

        assert!(chunks.len() > 1);
        assert_eq!(chunks.last().unwrap().token_span.end, total);
        for chunk in &chunks {
            assert!(chunk.token_span.len() <= config.max_tokens);
            assert!(!chunk.text.is_empty());
            assert!(text[chunk.start_offset..].starts_with(&chunk.text));
        }
    }

    proptest! {
        #[test]
        fn chunking_terminates_and_covers(
            n in 0usize..300,
            max_tokens in 1usize..40,
            overlap_seed in 0usize..40,
        ) {
            let overlap = overlap_seed % max_tokens;
            let config = ChunkingConfig { max_tokens, overlap };
            let text = words(n);
            let chunks = chunk_text(&text, &WordTokenizer, config).unwrap();
            let total = WordTokenizer.count(&text).unwrap();

            if total == 0 {
                prop_assert!(chunks.is_empty());
            } else {
                let step = max_tokens - overlap;
                let bound = total.saturating_sub(overlap).div_ceil(step).max(1);
                prop_assert!(chunks.len() <= bound);

                prop_assert_eq!(chunks[0].token_span.start, 0);
                let ends_at_total =
                    chunks.iter().filter(|c| c.token_span.end == total).count();
                prop_assert_eq!(ends_at_total, 1);
                prop_assert_eq!(chunks.last().unwrap().token_span.end, total);

                for chunk in &chunks {
                    prop_assert!(chunk.token_span.len() <= max_tokens);
                }
                for pair in chunks.windows(2) {
                    // No gaps: the next window starts at or before the end of
                    // the previous one.
                    prop_assert!(pair[1].token_span.start <= pair[0].token_span.end);
                    prop_assert!(pair[1].token_span.start > pair[0].token_span.start);
                }
            }
        }

        #[test]
        fn chunking_is_deterministic(n in 0usize..200) {
            let text = words(n);
            let config = ChunkingConfig { max_tokens: 7, overlap: 3 };
            let a = chunk_text(&text, &WordTokenizer, config).unwrap();
            let b = chunk_text(&text, &WordTokenizer, config).unwrap();
            prop_assert_eq!(a, b);
        }
    }
}
