use std::{collections::HashSet, path::Path, sync::Arc};

use kdam::{BarExt, tqdm};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    chunk_id::ChunkId,
    chunking::{Chunk, ChunkingConfig, Document, chunk_document},
    config_db::ConfigDb,
    corpus_index::{ChunkMetadata, CorpusIndex, IndexEntry},
    embedding::{Embedder, embed_checked},
    error::{Error, Result, Stage},
    incremental::{self, SourceRecord},
    tokenizer::{Cl100kTokenizer, Tokenizer},
    walker::{self, DiscoveredFile},
};

/// Default number of chunks embedded per call.
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Chunk ids written for one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestedSource {
    pub source_path: String,
    pub chunk_ids: Vec<ChunkId>,
}

/// Counts from one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Documents chunked and written.
    pub documents: usize,
    /// Index entries written.
    pub chunks: usize,
    /// Documents not written: blank, or unchanged since the last run.
    pub skipped: usize,
    /// Stale index entries deleted.
    pub removed: usize,
    #[serde(skip)]
    pub sources: Vec<IngestedSource>,
}

/// Chunks documents, embeds the chunks and upserts them into an index.
pub struct Ingestor {
    tokenizer: Arc<dyn Tokenizer>,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn CorpusIndex>,
    chunking: ChunkingConfig,
    batch_size: usize,
    show_progress: bool,
}

impl Ingestor {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn CorpusIndex>) -> Self {
        Self {
            tokenizer: Arc::new(Cl100kTokenizer::new()),
            embedder,
            index,
            chunking: ChunkingConfig::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            show_progress: false,
        }
    }

    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Draw a progress bar on stderr while embedding.
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        if self.batch_size == 0 {
            return Err(Error::Config("batch size must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Split documents into chunks, in document order.
    pub fn chunk_documents(&self, documents: &[Document]) -> Result<Vec<Chunk>> {
        self.chunking.validate()?;
        let per_document = documents
            .par_iter()
            .map(|doc| chunk_document(doc, self.tokenizer.as_ref(), self.chunking))
            .collect::<Result<Vec<_>>>()?;
        Ok(per_document.into_iter().flatten().collect())
    }

    /// Chunk, embed and upsert `documents`.
    ///
    /// Blank documents are skipped. Configuration is checked before any
    /// embedding call; capability failures are reported as the ingest stage.
    pub fn ingest(&self, documents: &[Document]) -> Result<IngestReport> {
        self.validate()?;

        let mut report = IngestReport::default();
        let mut kept = Vec::with_capacity(documents.len());
        for doc in documents {
            if doc.text.trim().is_empty() {
                debug!(path = %doc.path, "skipping blank document");
                report.skipped += 1;
                report.sources.push(IngestedSource {
                    source_path: doc.path.clone(),
                    chunk_ids: Vec::new(),
                });
            } else {
                kept.push(doc.clone());
            }
        }

        let chunks = self.chunk_documents(&kept)?;
        info!(
            documents = kept.len(),
            chunks = chunks.len(),
            "chunked documents"
        );

        self.embed_and_upsert(&chunks)
            .map_err(|e| e.at_stage(Stage::Ingest))?;

        for doc in &kept {
            report.sources.push(IngestedSource {
                source_path: doc.path.clone(),
                chunk_ids: Vec::new(),
            });
        }
        let offset = report.sources.len() - kept.len();
        for chunk in &chunks {
            if let Some(source) = report.sources[offset..]
                .iter_mut()
                .find(|s| s.source_path == chunk.source_path)
            {
                source.chunk_ids.push(chunk.id.clone());
            }
        }

        report.documents = kept.len();
        report.chunks = chunks.len();
        Ok(report)
    }

    fn embed_and_upsert(&self, chunks: &[Chunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        let mut pb = self.show_progress.then(|| {
            tqdm!(total = chunks.len(), desc = "Embedding", unit = " chunks")
        });

        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = embed_checked(self.embedder.as_ref(), &texts)?;

            let entries: Vec<IndexEntry> = batch
                .iter()
                .zip(vectors)
                .map(|(chunk, embedding)| IndexEntry {
                    chunk_id: chunk.id.clone(),
                    embedding,
                    metadata: ChunkMetadata {
                        source_path: chunk.source_path.clone(),
                        chunk_index: chunk.chunk_index,
                    },
                    text: chunk.text.clone(),
                })
                .collect();
            self.index.upsert(&entries)?;
            debug!(batch = entries.len(), "upserted batch");

            if let Some(pb) = pb.as_mut() {
                pb.update(entries.len())?;
            }
        }

        if let Some(pb) = pb.as_mut() {
            pb.refresh()?;
            eprintln!();
        }
        Ok(())
    }

    /// Remove entries from the index, reported as the ingest stage on failure.
    pub fn remove(&self, ids: &[ChunkId]) -> Result<usize> {
        self.index
            .remove(ids)
            .map_err(|e| e.at_stage(Stage::Ingest))
    }
}

/// Options for [`sync_directory`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Re-ingest every file regardless of mtime.
    pub full: bool,
    /// Delete entries for sources no longer present on disk.
    pub prune: bool,
}

/// Ingest the files under `root` matching `patterns`, skipping files whose
/// mtime matches the source registry.
///
/// New entries are written first. Previous entries of re-ingested files that
/// were not rewritten are removed afterwards, and the registry is updated
/// last, so a failed run leaves the index and registry as they were.
pub fn sync_directory(
    ingestor: &Ingestor,
    config_db: &ConfigDb,
    root: &Path,
    patterns: &[String],
    options: SyncOptions,
) -> Result<IngestReport> {
    ingestor.validate()?;
    let globs = walker::build_patterns(patterns)?;
    let discovered = walker::discover_files(root, &globs)?;
    let diff = incremental::diff_sources(config_db, &discovered)?;
    info!(
        discovered = discovered.len(),
        new = diff.new_files.len(),
        changed = diff.changed_files.len(),
        unchanged = diff.unchanged,
        "scanned {}",
        root.display()
    );

    let to_ingest: Vec<&DiscoveredFile> = if options.full {
        discovered.iter().collect()
    } else {
        diff.new_files.iter().chain(&diff.changed_files).collect()
    };

    let mut stale = Vec::new();
    for file in &to_ingest {
        stale.extend(incremental::previous_chunk_ids(config_db, &file.relative_path)?);
    }

    let mut documents = Vec::with_capacity(to_ingest.len());
    let mut blank = Vec::new();
    for file in &to_ingest {
        match walker::load_document(file)? {
            Some(doc) => documents.push(doc),
            None => blank.push(Document::new(file.relative_path.clone(), "")),
        }
    }
    documents.extend(blank);

    let mut report = ingestor.ingest(&documents)?;

    let written: HashSet<&ChunkId> = report
        .sources
        .iter()
        .flat_map(|s| &s.chunk_ids)
        .collect();
    stale.retain(|id| !written.contains(id));
    let mut removed = ingestor.remove(&stale)?;

    let records: Vec<SourceRecord> = to_ingest
        .iter()
        .map(|file| SourceRecord {
            source_path: file.relative_path.clone(),
            mtime: file.mtime,
            chunk_ids: report
                .sources
                .iter()
                .find(|s| s.source_path == file.relative_path)
                .map(|s| s.chunk_ids.clone())
                .unwrap_or_default(),
        })
        .collect();
    incremental::batch_store_records(config_db, &records)?;

    if options.prune {
        let ids: Vec<ChunkId> = diff
            .removed
            .iter()
            .flat_map(|r| r.chunk_ids.iter().cloned())
            .collect();
        removed += ingestor.remove(&ids)?;
        let paths: Vec<String> =
            diff.removed.iter().map(|r| r.source_path.clone()).collect();
        config_db.batch_remove_sources(&paths)?;
        info!(sources = paths.len(), "pruned missing sources");
    } else if !diff.removed.is_empty() {
        warn!(
            sources = diff.removed.len(),
            "sources missing on disk are still indexed; run with --prune to remove them"
        );
    }

    if !options.full {
        report.skipped += diff.unchanged;
    }
    report.removed = removed;
    Ok(report)
}
