//! Token counting for the chunker.
//!
//! A [`Tokenizer`] turns text into contiguous byte spans. Chunk boundaries are
//! expressed in token positions, and chunk text is recovered by slicing the
//! original text between the first and last span of a window.

use std::{ops::Range, sync::OnceLock};

use tiktoken_rs::CoreBPE;

use crate::error::{Error, Result};

/// Byte range of one token within the source text.
pub type TokenSpan = Range<usize>;

/// Injectable tokenizer capability.
///
/// Implementations must return spans that are contiguous (each span starts
/// where the previous one ended), start at 0 and end at `text.len()`, and
/// fall on character boundaries, so that decoding every span reproduces the
/// input exactly.
pub trait Tokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<TokenSpan>>;

    fn decode(&self, text: &str, spans: &[TokenSpan]) -> String {
        match (spans.first(), spans.last()) {
            (Some(first), Some(last)) => text[first.start..last.end].to_string(),
            _ => String::new(),
        }
    }

    fn count(&self, text: &str) -> Result<usize> {
        Ok(self.encode(text)?.len())
    }
}

/// The `cl100k_base` byte-pair encoding.
///
/// The vocabulary is built on first use. Byte-level BPE may split one
/// character over several tokens; such a character belongs to the token that
/// completes it and the tokens before it get empty spans, so every span
/// boundary is a character boundary.
///
/// # Examples
///
/// ```
/// use docrag::tokenizer::{Cl100kTokenizer, Tokenizer};
///
/// let tok = Cl100kTokenizer::new();
/// let spans = tok.encode("hello world").unwrap();
/// assert_eq!(spans, vec![0..5, 5..11]);
/// assert_eq!(tok.decode("hello world", &spans[1..]), " world");
/// ```
#[derive(Default)]
pub struct Cl100kTokenizer {
    bpe: OnceLock<CoreBPE>,
}

impl Cl100kTokenizer {
    pub fn new() -> Self {
        Self::default()
    }

    fn bpe(&self) -> Result<&CoreBPE> {
        if let Some(bpe) = self.bpe.get() {
            return Ok(bpe);
        }
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| Error::capability("tokenizer", e))?;
        Ok(self.bpe.get_or_init(|| bpe))
    }
}

impl std::fmt::Debug for Cl100kTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cl100kTokenizer")
            .field("loaded", &self.bpe.get().is_some())
            .finish()
    }
}

impl Tokenizer for Cl100kTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<TokenSpan>> {
        let bpe = self.bpe()?;
        let tokens = bpe.encode_ordinary(text);

        let mut spans = Vec::with_capacity(tokens.len());
        let mut offset = 0;
        // Start of the run of tokens whose bytes do not yet form whole
        // characters.
        let mut pending = 0;
        for i in 0..tokens.len() {
            let Ok(piece) = bpe.decode(tokens[pending..=i].to_vec()) else {
                continue;
            };
            spans.extend((pending..i).map(|_| offset..offset));
            spans.push(offset..offset + piece.len());
            offset += piece.len();
            pending = i + 1;
        }

        if pending != tokens.len() || offset != text.len() {
            return Err(Error::capability(
                "tokenizer",
                "cl100k_base tokens do not cover the input text",
            ));
        }
        Ok(spans)
    }

    fn count(&self, text: &str) -> Result<usize> {
        Ok(self.bpe()?.encode_ordinary(text).len())
    }
}

#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CharClass {
    Space,
    Word,
    Punct,
}

#[cfg(test)]
fn classify(c: char) -> CharClass {
    if c.is_whitespace() {
        CharClass::Space
    } else if c.is_alphanumeric() || c == '_' {
        CharClass::Word
    } else {
        CharClass::Punct
    }
}

/// Word pieces of at most `max_piece_chars` characters with leading
/// whitespace attached; every punctuation character is a token of its own.
/// A cheap vocabulary-free stand-in for chunker tests.
#[cfg(test)]
#[derive(Debug, Clone, Copy)]
pub(crate) struct HeuristicTokenizer {
    pub(crate) max_piece_chars: usize,
}

#[cfg(test)]
impl Default for HeuristicTokenizer {
    fn default() -> Self {
        Self { max_piece_chars: 4 }
    }
}

#[cfg(test)]
impl Tokenizer for HeuristicTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<TokenSpan>> {
        let max_piece = self.max_piece_chars.max(1);
        let mut spans = Vec::new();
        let mut start = 0;
        let mut piece_chars = 0;
        let mut prev: Option<CharClass> = None;

        for (i, c) in text.char_indices() {
            let class = classify(c);
            let boundary = match (prev, class) {
                (None, _) => false,
                (Some(CharClass::Space), _) => false,
                (Some(CharClass::Word), CharClass::Word) => {
                    piece_chars >= max_piece
                }
                (Some(CharClass::Word), _) => true,
                (Some(CharClass::Punct), _) => true,
            };

            if boundary {
                spans.push(start..i);
                start = i;
                piece_chars = 0;
            }
            if class != CharClass::Space {
                piece_chars += 1;
            }
            prev = Some(class);
        }

        if start < text.len() {
            spans.push(start..text.len());
        }

        Ok(spans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pieces<'a>(text: &'a str, spans: &[TokenSpan]) -> Vec<&'a str> {
        spans.iter().map(|s| &text[s.clone()]).collect()
    }

    #[test]
    fn empty_text_has_no_tokens() {
        let tok = HeuristicTokenizer::default();
        assert!(tok.encode("").unwrap().is_empty());
        assert_eq!(tok.count("").unwrap(), 0);
        assert_eq!(tok.decode("", &[]), "");
    }

    #[test]
    fn whitespace_attaches_to_next_word() {
        let tok = HeuristicTokenizer::default();
        let text = "a  big cat";
        let spans = tok.encode(text).unwrap();
        assert_eq!(pieces(text, &spans), vec!["a", "  big", " cat"]);
    }

    #[test]
    fn long_words_split_into_pieces() {
        let tok = HeuristicTokenizer { max_piece_chars: 3 };
        let text = "abcdefg";
        let spans = tok.encode(text).unwrap();
        assert_eq!(pieces(text, &spans), vec!["abc", "def", "g"]);
    }

    #[test]
    fn spans_are_contiguous_and_lossless() {
        let tok = HeuristicTokenizer::default();
        let text = "  café ☕ naïve 日本語!! end\n\nnext\t";
        let spans = tok.encode(text).unwrap();

        assert_eq!(spans.first().unwrap().start, 0);
        assert_eq!(spans.last().unwrap().end, text.len());
        for pair in spans.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert_eq!(tok.decode(text, &spans), text);
    }

    #[test]
    fn whitespace_only_text_is_one_token() {
        let tok = HeuristicTokenizer::default();
        assert_eq!(tok.encode("   \n").unwrap(), vec![0..4]);
    }

    #[test]
    fn cl100k_spans_cover_multibyte_text() {
        let tok = Cl100kTokenizer::new();
        let text = "日本語のテキストを分割します。 café 🎉 naïve";
        let spans = tok.encode(text).unwrap();

        assert_eq!(spans.len(), tok.count(text).unwrap());
        assert_eq!(spans.first().unwrap().start, 0);
        assert_eq!(spans.last().unwrap().end, text.len());
        for pair in spans.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        for span in &spans {
            assert!(text.is_char_boundary(span.start));
            assert!(text.is_char_boundary(span.end));
        }
        assert_eq!(tok.decode(text, &spans), text);
    }

    #[test]
    fn cl100k_counts_more_tokens_than_pieces_for_cjk() {
        let text = "日本語のテキストを分割します。";
        let bpe = Cl100kTokenizer::new().count(text).unwrap();
        let heuristic = HeuristicTokenizer::default().count(text).unwrap();
        assert!(bpe > heuristic);
    }

    #[test]
    fn cl100k_empty_text() {
        let tok = Cl100kTokenizer::new();
        assert!(tok.encode("").unwrap().is_empty());
        assert_eq!(tok.count("").unwrap(), 0);
    }
}
