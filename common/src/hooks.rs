use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;

use tracing::warn;

use crate::error::RagError;
use crate::types::IngestionSummary;

/// Fire-and-forget lifecycle notifications emitted by the pipelines.
///
/// Every method has a no-op default, so observers implement only what they
/// care about. Call sites go through [`dispatch`], which isolates handler
/// panics from the pipeline.
pub trait PipelineHooks: Send + Sync {
    fn on_ingest_start(&self, _path: &Path) {}
    fn on_ingest_end(&self, _path: &Path, _chunks: usize) {}
    fn on_ingest_skipped(&self, _path: &Path) {}
    fn on_ingest_summary(&self, _summary: &IngestionSummary) {}
    fn on_chunking_start(&self, _path: &Path) {}
    fn on_embedding_start(&self, _pending: usize) {}
    fn on_retrieval_start(&self, _query: &str) {}
    fn on_retrieval_end(&self, _results: usize) {}
    fn on_reranking_start(&self, _candidates: usize) {}
    fn on_reranking_end(&self, _kept: usize) {}
    fn on_generation_start(&self) {}
    fn on_generation_end(&self, _answer: &str) {}
    fn on_error(&self, _error: &RagError) {}
}

/// The default observer: silence.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl PipelineHooks for NoopHooks {}

/// Runs one hook invocation, swallowing panics so a misbehaving handler can
/// never take the pipeline down with it.
pub fn dispatch<F: FnOnce()>(hook: F) {
    if catch_unwind(AssertUnwindSafe(hook)).is_err() {
        warn!("pipeline hook panicked; continuing");
    }
}
