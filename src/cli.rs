use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use docrag::{
    backend::Backend,
    chunking::{DEFAULT_MAX_TOKENS, DEFAULT_OVERLAP},
    diversity::DEFAULT_LAMBDA,
    fusion::DEFAULT_ALPHA,
    ingestion::DEFAULT_BATCH_SIZE,
    retrieval::DEFAULT_TOP_K,
};

#[derive(Debug, Parser)]
#[command(
    name = "docrag",
    about = "Index documents and retrieve ranked, citable passages"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true, env = "DOCRAG_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Embedder backend (colbert or hashing)
    #[arg(long, global = true, env = "DOCRAG_EMBEDDER")]
    pub embedder: Option<Backend>,

    /// Override the ColBERT model ID or local model path
    #[arg(long, global = true, env = "DOCRAG_MODEL")]
    pub model: Option<String>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Chunk, embed and index the documents under a directory
    Ingest(IngestArgs),
    /// Retrieve ranked passages for a question
    Query(QueryArgs),
    /// Show system status and statistics
    Status(StatusArgs),
    /// Start MCP server for AI agent integration
    Mcp(McpArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Ingest --

#[derive(Debug, Parser)]
pub struct IngestArgs {
    /// Directory to ingest
    pub dir: PathBuf,

    /// Glob pattern for files to include (repeatable; default **/*.md and **/*.txt)
    #[arg(long = "glob")]
    pub globs: Vec<String>,

    /// Maximum tokens per chunk
    #[arg(long, default_value_t = DEFAULT_MAX_TOKENS)]
    pub max_tokens: usize,

    /// Tokens shared by consecutive chunks
    #[arg(long, default_value_t = DEFAULT_OVERLAP)]
    pub overlap: usize,

    /// Chunks per embedding call
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Re-ingest every file, even if unchanged
    #[arg(long)]
    pub full: bool,

    /// Remove indexed sources that no longer exist on disk
    #[arg(long)]
    pub prune: bool,
}

// -- Retrieval options shared by query and mcp --

#[derive(Debug, Clone, clap::Args)]
pub struct RetrievalArgs {
    /// Number of passages to return
    #[arg(short, long, env = "DOCRAG_TOP_K", default_value_t = DEFAULT_TOP_K)]
    pub k: usize,

    /// Re-select candidates with maximal marginal relevance
    #[arg(long, env = "DOCRAG_MMR")]
    pub mmr: bool,

    /// MMR relevance weight in [0, 1]
    #[arg(long, default_value_t = DEFAULT_LAMBDA)]
    pub lambda: f32,

    /// Mix BM25 scores into the vector ranking
    #[arg(long)]
    pub lexical: bool,

    /// BM25 weight in [0, 1]
    #[arg(long, default_value_t = DEFAULT_ALPHA)]
    pub alpha: f32,

    /// Rerank passages with the pairwise scorer
    #[arg(long, env = "DOCRAG_RERANK")]
    pub rerank: bool,
}

// -- Query --

#[derive(Debug, Parser)]
pub struct QueryArgs {
    /// The question
    pub query: String,

    #[command(flatten)]
    pub retrieval: RetrievalArgs,

    /// Output the assembled context as JSON
    #[arg(long, conflicts_with = "prompt")]
    pub json: bool,

    /// Output chat messages ready for a generator
    #[arg(long)]
    pub prompt: bool,
}

// -- MCP --

#[derive(Debug, Parser)]
pub struct McpArgs {
    #[command(flatten)]
    pub retrieval: RetrievalArgs,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "docrag",
            &mut std::io::stdout(),
        );
    }
}
