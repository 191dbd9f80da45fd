//! Deterministic in-process doubles for the capability traits, shared by
//! the pipeline crates' test suites via the `test-utils` feature.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::backend::{EventStream, LanguageBackend};
use crate::error::RagError;
use crate::store::{matches_filter, Filter, VectorStore};
use crate::types::{DocumentRecord, RetrievedDoc, StreamEvent};
use crate::utils::vector::{dot, l2_normalize};

/// Deterministic bag-of-words embedding: every whitespace token is hashed
/// into one of `dim` buckets, so texts sharing vocabulary land close to
/// each other. Good enough to drive ranking assertions without a network.
pub fn embedding_for(text: &str, dim: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dim.max(1)];
    for token in text.split_whitespace() {
        let mut hash = 0xcbf2_9ce4_8422_2325u64;
        for byte in token.to_lowercase().bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        let bucket = (hash % v.len() as u64) as usize;
        v[bucket] += 1.0;
    }
    l2_normalize(&mut v);
    v
}

/// Scripted language backend with call counters and failure injection.
pub struct MockBackend {
    pub dim: usize,
    embed_document_calls: AtomicUsize,
    embed_query_calls: AtomicUsize,
    generate_calls: AtomicUsize,
    /// The next N `embed_documents` calls fail with a retryable error.
    embed_failures: AtomicUsize,
    /// The next N `generate` calls fail with a retryable error.
    generate_failures: AtomicUsize,
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl MockBackend {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            embed_document_calls: AtomicUsize::new(0),
            embed_query_calls: AtomicUsize::new(0),
            generate_calls: AtomicUsize::new(0),
            embed_failures: AtomicUsize::new(0),
            generate_failures: AtomicUsize::new(0),
            responses: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Queues a canned reply; `generate` falls back to `"ok"` once drained.
    pub fn push_response(&self, response: impl Into<String>) {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(response.into());
        }
    }

    pub fn fail_next_embeds(&self, n: usize) {
        self.embed_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_generates(&self, n: usize) {
        self.generate_failures.store(n, Ordering::SeqCst);
    }

    pub fn embed_document_calls(&self) -> usize {
        self.embed_document_calls.load(Ordering::SeqCst)
    }

    pub fn embed_query_calls(&self) -> usize {
        self.embed_query_calls.load(Ordering::SeqCst)
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    /// Prompts seen by `generate`, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    fn next_response(&self) -> String {
        self.responses
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front())
            .unwrap_or_else(|| "ok".to_owned())
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new(8)
    }
}

#[async_trait]
impl LanguageBackend for MockBackend {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        self.embed_document_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.embed_failures) {
            return Err(RagError::provider_retryable("injected embed failure"));
        }
        Ok(texts.iter().map(|t| embedding_for(t, self.dim)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, RagError> {
        self.embed_query_calls.fetch_add(1, Ordering::SeqCst);
        Ok(embedding_for(text, self.dim))
    }

    async fn generate(&self, prompt: &str, _system: Option<&str>) -> Result<String, RagError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_owned());
        }
        if Self::take_failure(&self.generate_failures) {
            return Err(RagError::provider_retryable("injected generate failure"));
        }
        Ok(self.next_response())
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        system: Option<&str>,
    ) -> Result<EventStream, RagError> {
        let full = self.generate(prompt, system).await?;
        let words: Vec<String> = full
            .split_inclusive(' ')
            .map(ToOwned::to_owned)
            .collect();
        let last = words.len().saturating_sub(1);
        let events: Vec<Result<StreamEvent, RagError>> = words
            .into_iter()
            .enumerate()
            .map(|(i, delta)| {
                Ok(StreamEvent {
                    delta,
                    finish_reason: (i == last).then(|| "stop".to_owned()),
                    usage: None,
                })
            })
            .collect();
        Ok(Box::pin(futures::stream::iter(events)))
    }
}

/// Vector store over a `Vec`, with cosine ranking, filter support and the
/// dimension invariant enforced on write.
#[derive(Default)]
pub struct MemoryVectorStore {
    docs: Mutex<Vec<DocumentRecord>>,
    ensure_indexes_calls: AtomicUsize,
    /// The next N write calls fail with a store error (which is retryable).
    write_failures: AtomicUsize,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.docs.lock().map(|docs| docs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ensure_indexes_calls(&self) -> usize {
        self.ensure_indexes_calls.load(Ordering::SeqCst)
    }

    pub fn fail_next_writes(&self, n: usize) {
        self.write_failures.store(n, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> Vec<DocumentRecord> {
        self.docs.lock().map(|docs| docs.clone()).unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<DocumentRecord>>, RagError> {
        self.docs
            .lock()
            .map_err(|_| RagError::Store("memory store lock poisoned".into()))
    }

    fn check_write_failure(&self) -> Result<(), RagError> {
        let injected = self
            .write_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            Err(RagError::Store("injected write failure".into()))
        } else {
            Ok(())
        }
    }

    fn check_dimension(existing: &[DocumentRecord], incoming: &[DocumentRecord]) -> Result<(), RagError> {
        let expected = existing
            .first()
            .or_else(|| incoming.first())
            .map(|doc| doc.embedding.len());
        if let Some(expected) = expected {
            for doc in incoming {
                if doc.embedding.len() != expected {
                    return Err(RagError::DimensionMismatch {
                        expected,
                        actual: doc.embedding.len(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn add_documents(&self, docs: &[DocumentRecord]) -> Result<(), RagError> {
        self.check_write_failure()?;
        let mut store = self.lock()?;
        Self::check_dimension(&store, docs)?;
        store.extend(docs.iter().cloned());
        Ok(())
    }

    async fn upsert_documents(&self, docs: &[DocumentRecord]) -> Result<(), RagError> {
        self.check_write_failure()?;
        let mut store = self.lock()?;
        Self::check_dimension(&store, docs)?;
        for doc in docs {
            match store.iter_mut().find(|existing| existing.id == doc.id) {
                Some(existing) => *existing = doc.clone(),
                None => store.push(doc.clone()),
            }
        }
        Ok(())
    }

    async fn similarity_search(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<RetrievedDoc>, RagError> {
        let store = self.lock()?;
        let mut hits: Vec<RetrievedDoc> = store
            .iter()
            .filter(|doc| filter.map_or(true, |f| matches_filter(&doc.metadata, f)))
            .map(|doc| RetrievedDoc {
                content: doc.content.clone(),
                metadata: doc.metadata.clone(),
                score: Some(dot(&doc.embedding, vector)),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn ensure_indexes(&self) -> Result<(), RagError> {
        self.ensure_indexes_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn file_exists(
        &self,
        sha256: &str,
        size: u64,
        _modified: Option<DateTime<Utc>>,
    ) -> Result<bool, RagError> {
        let store = self.lock()?;
        Ok(store.iter().any(|doc| {
            doc.metadata.get("file_sha256").and_then(Value::as_str) == Some(sha256)
                && doc.metadata.get("file_size").and_then(Value::as_u64) == Some(size)
        }))
    }

    async fn list_documents(
        &self,
        filter: Option<&Filter>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DocumentRecord>, RagError> {
        let store = self.lock()?;
        Ok(store
            .iter()
            .filter(|doc| filter.map_or(true, |f| matches_filter(&doc.metadata, f)))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn delete_documents(
        &self,
        ids: Option<&[String]>,
        filter: Option<&Filter>,
    ) -> Result<(), RagError> {
        let mut store = self.lock()?;
        store.retain(|doc| {
            let id_match = ids.is_some_and(|ids| ids.contains(&doc.id));
            let filter_match = filter.is_some_and(|f| matches_filter(&doc.metadata, f));
            !(id_match || filter_match)
        });
        Ok(())
    }
}
