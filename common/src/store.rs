use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::RagError;
use crate::types::{DocumentRecord, RetrievedDoc};

/// Conjunctive equality filter over metadata keys.
pub type Filter = BTreeMap<String, Value>;

/// Whether a metadata map satisfies every clause of a filter. Shared by
/// in-memory backends; SQL-backed stores translate the filter instead.
pub fn matches_filter(metadata: &crate::types::Metadata, filter: &Filter) -> bool {
    filter
        .iter()
        .all(|(key, expected)| metadata.get(key) == Some(expected))
}

/// The storage plug-in point.
///
/// Only `add_documents` and `similarity_search` are required; the optional
/// operations default to graceful degradation (hybrid search falls back to
/// pure similarity, `file_exists` reports unknown, index creation is a
/// no-op) so thin backends stay usable.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn add_documents(&self, docs: &[DocumentRecord]) -> Result<(), RagError>;

    async fn similarity_search(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<RetrievedDoc>, RagError>;

    async fn upsert_documents(&self, docs: &[DocumentRecord]) -> Result<(), RagError> {
        self.add_documents(docs).await
    }

    async fn hybrid_search(
        &self,
        _query: &str,
        vector: &[f32],
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<RetrievedDoc>, RagError> {
        self.similarity_search(vector, k, filter).await
    }

    async fn ensure_indexes(&self) -> Result<(), RagError> {
        Ok(())
    }

    async fn file_exists(
        &self,
        _sha256: &str,
        _size: u64,
        _modified: Option<DateTime<Utc>>,
    ) -> Result<bool, RagError> {
        Ok(false)
    }

    async fn list_documents(
        &self,
        _filter: Option<&Filter>,
        _limit: usize,
        _offset: usize,
    ) -> Result<Vec<DocumentRecord>, RagError> {
        Ok(Vec::new())
    }

    async fn delete_documents(
        &self,
        _ids: Option<&[String]>,
        _filter: Option<&Filter>,
    ) -> Result<(), RagError> {
        Ok(())
    }
}
