use std::path::Path;
use std::sync::{Arc, OnceLock};

use serde_json::json;
use tracing::{info, instrument, warn};

use common::backend::LanguageBackend;
use common::cache::EmbeddingCache;
use common::config::{IngestionMode, RagConfig};
use common::error::RagError;
use common::hooks::{dispatch, PipelineHooks};
use common::ids::chunk_document_id;
use common::loader::DocumentLoader;
use common::store::{Filter, VectorStore};
use common::types::{
    Chunk, ChunkMetadata, DocumentRecord, IngestionFailure, IngestionSummary, Metadata,
};
use common::utils::retry::with_backoff;
use common::utils::vector::l2_normalize;

use crate::enricher::ChunkEnricher;
use crate::fingerprint::{fingerprint_file, FileFingerprint};
use crate::processor::metadata::compute_metadata;
use crate::processor::{build_chunks, DocumentProcessor};

/// Coordinates a whole file ingestion: fingerprint, dedup check, chunking,
/// cached batch embedding, enrichment and the content-addressed write.
pub struct IngestionPipeline {
    backend: Arc<dyn LanguageBackend>,
    store: Arc<dyn VectorStore>,
    loader: Arc<dyn DocumentLoader>,
    hooks: Arc<dyn PipelineHooks>,
    config: Arc<RagConfig>,
    cache: EmbeddingCache,
    /// Expected embedding dimension; seeded from configuration or learned
    /// from the first batch, enforced on every batch thereafter.
    dimension: OnceLock<usize>,
}

impl IngestionPipeline {
    pub fn new(
        config: Arc<RagConfig>,
        backend: Arc<dyn LanguageBackend>,
        store: Arc<dyn VectorStore>,
        loader: Arc<dyn DocumentLoader>,
        hooks: Arc<dyn PipelineHooks>,
    ) -> Self {
        let dimension = OnceLock::new();
        if let Some(dims) = config.embedding.dimensions {
            let _ = dimension.set(dims);
        }
        Self {
            backend,
            store,
            loader,
            hooks,
            config,
            cache: EmbeddingCache::new(),
            dimension,
        }
    }

    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    /// Ingests every regular file directly under `dir`, sequentially, with
    /// per-file failure isolation. Hidden files, temp markers and nested
    /// directories are skipped silently.
    #[instrument(skip(self))]
    pub async fn ingest_directory(&self, dir: &Path) -> Result<IngestionSummary, RagError> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if !file_type.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if should_skip_entry(&name) {
                continue;
            }
            paths.push(entry.path());
        }
        paths.sort();

        let mut summary = IngestionSummary::default();
        for path in paths {
            summary.processed += 1;
            match self.ingest_file(&path).await {
                Ok(_) => summary.succeeded += 1,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "file ingestion failed");
                    dispatch(|| self.hooks.on_error(&err));
                    summary.failed += 1;
                    summary.errors.push(IngestionFailure {
                        path,
                        error: err.to_string(),
                    });
                }
            }
        }

        info!(
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "directory ingestion finished"
        );
        dispatch(|| self.hooks.on_ingest_summary(&summary));
        Ok(summary)
    }

    /// Ingests a single file, returning the number of stored chunks.
    /// Returns 0 when skip mode finds the file already present.
    #[instrument(skip(self))]
    pub async fn ingest_file(&self, path: &Path) -> Result<usize, RagError> {
        dispatch(|| self.hooks.on_ingest_start(path));

        let fingerprint = fingerprint_file(path).await?;
        if self.skip_existing(&fingerprint).await? {
            info!(path = %path.display(), "file already ingested; skipping");
            dispatch(|| self.hooks.on_ingest_skipped(path));
            return Ok(0);
        }

        let loaded = self.loader.load(path).await?;
        dispatch(|| self.hooks.on_chunking_start(path));
        let processor = DocumentProcessor::new(&self.config.chunking, self.backend.as_ref());
        let contents = processor.chunk(&loaded.text).await?;
        let chunks = build_chunks(&loaded.text, contents);
        if chunks.is_empty() {
            info!(path = %path.display(), "document produced no chunks");
            dispatch(|| self.hooks.on_ingest_end(path, 0));
            return Ok(0);
        }

        let mut metadatas =
            compute_metadata(&chunks, &loaded.text, loaded.pages.as_deref(), path);

        self.embed_uncached(&chunks).await?;

        if self.config.metadata.enrichment {
            let enricher = ChunkEnricher::new(self.backend.as_ref());
            for (chunk, metadata) in chunks.iter().zip(metadatas.iter_mut()) {
                metadata.enrichment = Some(enricher.enrich(&chunk.content).await);
            }
        }

        if let Err(err) = self.store.ensure_indexes().await {
            warn!(error = %err, "index creation failed; continuing without");
        }

        // Another writer may have finished this file while we embedded.
        if self.skip_existing(&fingerprint).await? {
            dispatch(|| self.hooks.on_ingest_skipped(path));
            return Ok(0);
        }

        let absolute_path = tokio::fs::canonicalize(path)
            .await
            .unwrap_or_else(|_| path.to_path_buf());
        let records =
            self.build_records(path, &absolute_path, &fingerprint, &chunks, &metadatas)?;
        self.write_records(&records, &absolute_path.to_string_lossy())
            .await?;

        info!(path = %path.display(), chunks = records.len(), "file ingested");
        dispatch(|| self.hooks.on_ingest_end(path, records.len()));
        Ok(records.len())
    }

    async fn skip_existing(&self, fingerprint: &FileFingerprint) -> Result<bool, RagError> {
        if self.config.ingestion.mode != IngestionMode::Skip {
            return Ok(false);
        }
        self.store
            .file_exists(&fingerprint.sha256, fingerprint.size, fingerprint.modified)
            .await
    }

    /// Embeds every cache-missing chunk in sequential batches; batch size is
    /// the concurrency limit when rate limiting is on, otherwise everything
    /// goes out in one call.
    async fn embed_uncached(&self, chunks: &[Chunk]) -> Result<(), RagError> {
        let mut pending: Vec<&Chunk> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for chunk in chunks {
            if !self.cache.contains(&chunk.sha256) && seen.insert(chunk.sha256.as_str()) {
                pending.push(chunk);
            }
        }
        if pending.is_empty() {
            return Ok(());
        }
        dispatch(|| self.hooks.on_embedding_start(pending.len()));

        let limit = if self.config.ingestion.rate_limit_enabled {
            self.config.ingestion.concurrency_limit
        } else {
            pending.len()
        };

        for batch in pending.chunks(limit.max(1)) {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let vectors =
                with_backoff("embedding batch", || self.backend.embed_documents(&texts)).await?;
            if vectors.len() != texts.len() {
                return Err(RagError::provider_fatal(format!(
                    "backend returned {} embeddings for {} inputs",
                    vectors.len(),
                    texts.len()
                )));
            }
            for (chunk, mut vector) in batch.iter().zip(vectors) {
                self.check_dimension(vector.len())?;
                l2_normalize(&mut vector);
                self.cache.insert(chunk.sha256.clone(), vector);
            }
        }
        Ok(())
    }

    fn check_dimension(&self, actual: usize) -> Result<(), RagError> {
        let expected = *self.dimension.get_or_init(|| actual);
        if expected == actual {
            Ok(())
        } else {
            Err(RagError::DimensionMismatch { expected, actual })
        }
    }

    fn build_records(
        &self,
        path: &Path,
        absolute_path: &Path,
        fingerprint: &FileFingerprint,
        chunks: &[Chunk],
        metadatas: &[ChunkMetadata],
    ) -> Result<Vec<DocumentRecord>, RagError> {
        let source = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        chunks
            .iter()
            .zip(metadatas.iter())
            .map(|(chunk, metadata)| {
                let embedding = self.cache.get(&chunk.sha256).ok_or_else(|| {
                    RagError::Internal(format!(
                        "embedding missing from cache for chunk {}",
                        chunk.chunk_index
                    ))
                })?;
                Ok(DocumentRecord {
                    id: chunk_document_id(&fingerprint.sha256, chunk.chunk_index).to_string(),
                    content: chunk.content.clone(),
                    embedding,
                    metadata: record_metadata(
                        &source,
                        absolute_path,
                        fingerprint,
                        chunk,
                        metadata,
                    ),
                })
            })
            .collect()
    }

    /// Mode dispatch: `replace` deletes the file's previous rows and
    /// upserts; `append`/`skip` add. The write is retried with backoff.
    async fn write_records(
        &self,
        records: &[DocumentRecord],
        absolute_path: &str,
    ) -> Result<(), RagError> {
        match self.config.ingestion.mode {
            IngestionMode::Replace => {
                let mut filter = Filter::new();
                filter.insert("absolute_path".into(), json!(absolute_path));
                self.store.delete_documents(None, Some(&filter)).await?;
                with_backoff("document upsert", || self.store.upsert_documents(records)).await
            }
            IngestionMode::Append | IngestionMode::Skip => {
                with_backoff("document write", || self.store.add_documents(records)).await
            }
        }
    }
}

/// Hidden files and editor/browser temp markers are never ingested.
fn should_skip_entry(name: &str) -> bool {
    if name.starts_with('.') || name.starts_with("~$") {
        return true;
    }
    let lower = name.to_lowercase();
    [".tmp", ".temp", ".crdownload", ".part"]
        .iter()
        .any(|suffix| lower.ends_with(suffix))
}

/// Flattens file identity and chunk metadata into the stored map.
fn record_metadata(
    source: &str,
    absolute_path: &Path,
    fingerprint: &FileFingerprint,
    chunk: &Chunk,
    metadata: &ChunkMetadata,
) -> Metadata {
    let mut map = Metadata::new();
    map.insert("source".into(), json!(source));
    map.insert(
        "absolute_path".into(),
        json!(absolute_path.to_string_lossy()),
    );
    map.insert("file_md5".into(), json!(fingerprint.md5));
    map.insert("file_sha256".into(), json!(fingerprint.sha256));
    map.insert("file_size".into(), json!(fingerprint.size));
    if let Some(modified) = fingerprint.modified {
        map.insert("last_modified".into(), json!(modified.to_rfc3339()));
    }
    map.insert("chunk_index".into(), json!(chunk.chunk_index));
    map.insert("chunk_sha256".into(), json!(chunk.sha256));
    if let Some(file_type) = &metadata.file_type {
        map.insert("file_type".into(), json!(file_type));
    }
    map.insert("doc_title".into(), json!(metadata.doc_title));
    if let Some(page_from) = metadata.page_from {
        map.insert("page_from".into(), json!(page_from));
    }
    if let Some(page_to) = metadata.page_to {
        map.insert("page_to".into(), json!(page_to));
    }
    if let Some(section) = &metadata.section {
        map.insert("section".into(), json!(section));
    }
    if let Some(enrichment) = &metadata.enrichment {
        map.insert("summary".into(), json!(enrichment.summary));
        map.insert("keywords".into(), json!(enrichment.keywords));
        map.insert(
            "hypothetical_questions".into(),
            json!(enrichment.hypothetical_questions),
        );
    }
    map
}
