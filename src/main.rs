use std::{io::IsTerminal, sync::Arc};

use clap::Parser;
use docrag::{
    ConfigDb,
    DataDir,
    RetrievalConfig,
    Retriever,
    VectorDb,
    backend::{self, BackendChoice, Capabilities},
    chunking::ChunkingConfig,
    corpus_index::CorpusIndex,
    error,
    incremental,
    ingestion::{Ingestor, SyncOptions, sync_directory},
    mcp,
};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Command, IngestArgs, QueryArgs, RetrievalArgs};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DOCRAG_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> error::Result<()> {
    let cli = Cli::parse();

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    init_tracing(cli.verbose, cli.quiet);

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config_db = ConfigDb::open(&data_dir.config_db())?;
    let choice = backend::resolve(&config_db, cli.embedder, cli.model.as_deref())?;

    match cli.command {
        Command::Ingest(args) => {
            cmd_ingest(&config_db, &data_dir, &choice, &args)?;
        }
        Command::Query(args) => {
            cmd_query(&data_dir, &choice, &args)?;
        }
        Command::Status(args) => {
            cmd_status(&config_db, &data_dir, &choice, args.json)?;
        }
        Command::Mcp(args) => {
            let retriever = open_retriever(&data_dir, &choice)?;
            mcp::run_mcp(retriever, retrieval_config(&args.retrieval))?;
        }
        Command::Completions(_) => {}
    }

    Ok(())
}

fn retrieval_config(args: &RetrievalArgs) -> RetrievalConfig {
    RetrievalConfig {
        k: args.k,
        use_diversity: args.mmr,
        diversity_lambda: args.lambda,
        use_lexical_fusion: args.lexical,
        fusion_alpha: args.alpha,
        use_rerank: args.rerank,
    }
}

fn open_retriever(data_dir: &DataDir, choice: &BackendChoice) -> error::Result<Retriever> {
    let index = Arc::new(VectorDb::open(&data_dir.index_db())?);
    let caps = Capabilities::load(choice);
    Ok(Retriever::new(caps.embedder, index).with_scorer(caps.scorer))
}

fn cmd_ingest(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    choice: &BackendChoice,
    args: &IngestArgs,
) -> error::Result<()> {
    if !args.dir.is_dir() {
        return Err(error::Error::NotFound {
            kind: "directory",
            name: args.dir.display().to_string(),
        });
    }

    let index = Arc::new(VectorDb::open(&data_dir.index_db())?);
    let caps = Capabilities::load(choice);
    let ingestor = Ingestor::new(caps.embedder, index)
        .with_chunking(ChunkingConfig {
            max_tokens: args.max_tokens,
            overlap: args.overlap,
        })
        .with_batch_size(args.batch_size)
        .with_progress(std::io::stderr().is_terminal());

    let report = sync_directory(
        &ingestor,
        config_db,
        &args.dir,
        &args.globs,
        SyncOptions {
            full: args.full,
            prune: args.prune,
        },
    )?;
    backend::store(config_db, choice)?;

    info!(
        documents = report.documents,
        chunks = report.chunks,
        skipped = report.skipped,
        removed = report.removed,
        "ingest complete"
    );
    println!(
        "Ingested {} documents ({} chunks), skipped {}, removed {} stale chunks",
        report.documents, report.chunks, report.skipped, report.removed
    );
    Ok(())
}

fn cmd_query(
    data_dir: &DataDir,
    choice: &BackendChoice,
    args: &QueryArgs,
) -> error::Result<()> {
    let retriever = open_retriever(data_dir, choice)?;
    let config = retrieval_config(&args.retrieval);
    let context = retriever.retrieve_context(&args.query, &config)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&context)?);
    } else if args.prompt {
        println!("{}", serde_json::to_string_pretty(&context.prompt_messages())?);
    } else if context.is_empty() {
        println!("No passages found.");
    } else {
        println!("{}", context.context_block());
        println!();
        println!("Sources:");
        println!("{}", context.source_list());
    }
    Ok(())
}

fn cmd_status(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    choice: &BackendChoice,
    json: bool,
) -> error::Result<()> {
    let index = VectorDb::open(&data_dir.index_db())?;
    let chunks = index.len()?;
    let sources = incremental::load_records(config_db)?.len();

    if json {
        let status = json!({
            "data_dir": data_dir.root().display().to_string(),
            "embedder": choice.backend.as_str(),
            "model": choice.model_id,
            "sources": sources,
            "chunks": chunks,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("Data directory: {}", data_dir.root().display());
        println!("Embedder: {}", choice.backend);
        println!("Model: {}", choice.model_id);
        println!("Sources: {sources}");
        println!("Chunks: {chunks}");
    }
    Ok(())
}
