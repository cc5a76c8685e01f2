//! Turns ranked hits into citable prompt context.

use serde::Serialize;

use crate::{chunk_id::ChunkId, corpus_index::RetrievalHit};

const SYSTEM_PROMPT: &str = "You answer questions using only the numbered \
context passages provided. Cite passages by their number in square brackets, \
for example [1]. If the context does not contain the answer, say so.";

/// One passage, numbered by rank starting at 1.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextPassage {
    pub citation_index: usize,
    pub source: String,
    pub chunk_index: usize,
    pub chunk_id: ChunkId,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptMessage {
    pub role: &'static str,
    pub content: String,
}

/// The passages for one query, in final rank order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssembledContext {
    pub query: String,
    pub passages: Vec<ContextPassage>,
}

/// Number `hits` in order. Ranking is left untouched.
///
/// # Examples
///
/// ```
/// use docrag::context::assemble;
///
/// let context = assemble("what?", &[]);
/// assert!(context.is_empty());
/// assert_eq!(context.context_block(), "");
/// ```
pub fn assemble(query: &str, hits: &[RetrievalHit]) -> AssembledContext {
    let passages = hits
        .iter()
        .enumerate()
        .map(|(i, hit)| ContextPassage {
            citation_index: i + 1,
            source: hit.metadata.source_path.clone(),
            chunk_index: hit.metadata.chunk_index,
            chunk_id: hit.chunk_id.clone(),
            text: hit.text.clone(),
        })
        .collect();

    AssembledContext {
        query: query.to_string(),
        passages,
    }
}

impl AssembledContext {
    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    /// Passages rendered as `[i] SOURCE: path (chunk n)` headers followed by
    /// their text, separated by blank lines.
    pub fn context_block(&self) -> String {
        self.passages
            .iter()
            .map(|p| {
                format!(
                    "[{}] SOURCE: {} (chunk {})\n{}",
                    p.citation_index, p.source, p.chunk_index, p.text
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// One line per passage: `[i] path (chunk n, short id)`.
    pub fn source_list(&self) -> String {
        self.passages
            .iter()
            .map(|p| {
                format!(
                    "[{}] {} (chunk {}, {})",
                    p.citation_index,
                    p.source,
                    p.chunk_index,
                    p.chunk_id.short()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// A system and a user message for a chat-style generator.
    pub fn prompt_messages(&self) -> Vec<PromptMessage> {
        let user = format!(
            "Question: {}\n\nContext:\n{}\n\nAnswer with citations.",
            self.query,
            self.context_block()
        );
        vec![
            PromptMessage {
                role: "system",
                content: SYSTEM_PROMPT.to_string(),
            },
            PromptMessage {
                role: "user",
                content: user,
            },
        ]
    }
}
