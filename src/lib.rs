//! docrag - document retrieval for retrieval-augmented generation.
//!
//! docrag splits documents into overlapping token windows, embeds them into a
//! corpus index, and answers questions with a ranked list of passages. The
//! ranking pipeline fetches nearest neighbors, then optionally re-selects for
//! diversity (MMR), mixes in lexical BM25 scores, and reranks with a pairwise
//! scorer such as [ColBERT](https://github.com/stanford-futuredata/ColBERT).
//! The final passages are numbered for citation.
//!
//! # Quick start
//!
//! ```
//! use std::sync::Arc;
//!
//! use docrag::{RetrievalConfig, Retriever};
//! use docrag::chunking::Document;
//! use docrag::corpus_index::MemoryIndex;
//! use docrag::embedding::HashingEmbedder;
//! use docrag::ingestion::Ingestor;
//!
//! let embedder = Arc::new(HashingEmbedder::default());
//! let index = Arc::new(MemoryIndex::new());
//!
//! Ingestor::new(embedder.clone(), index.clone())
//!     .ingest(&[
//!         Document::new("rust.md", "Ownership keeps memory safe."),
//!         Document::new("bread.md", "Sourdough needs a starter."),
//!     ])
//!     .unwrap();
//!
//! let retriever = Retriever::new(embedder, index);
//! let config = RetrievalConfig { k: 1, ..Default::default() };
//! let context = retriever.retrieve_context("ownership memory", &config).unwrap();
//!
//! assert_eq!(context.passages[0].source, "rust.md");
//! println!("{}", context.context_block());
//! ```

pub mod backend;
pub mod chunk_id;
pub mod chunking;
pub mod config_db;
pub mod context;
pub mod corpus_index;
pub mod data_dir;
pub mod diversity;
pub mod embedding;
pub mod error;
pub mod fusion;
pub mod incremental;
pub mod ingestion;
pub mod mcp;
pub mod model_manager;
pub mod reranker;
pub mod retrieval;
pub mod scoring;
pub mod tokenizer;
pub mod vector_db;
pub mod walker;

pub use chunk_id::ChunkId;
pub use config_db::ConfigDb;
pub use context::AssembledContext;
pub use data_dir::DataDir;
pub use error::{Error, Result};
pub use model_manager::ColbertModel;
pub use retrieval::{RetrievalConfig, Retriever};
pub use vector_db::VectorDb;
