use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Flattened metadata map persisted next to each stored document and used
/// for conjunctive-equality filtering.
pub type Metadata = serde_json::Map<String, Value>;

/// A stored, embedded chunk as it lives in the vector store.
///
/// `id` is a UUIDv5 over `(file_sha256, chunk_index)` so re-ingesting the
/// same file always addresses the same rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub content: String,
    /// L2-normalized vector of the store's fixed dimension.
    pub embedding: Vec<f32>,
    pub metadata: Metadata,
}

/// A search hit as returned by a retrieval strategy.
///
/// Score semantics are strategy-local, monotone "higher is better" before
/// fusion; backends that do not report one leave it absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDoc {
    pub content: String,
    pub metadata: Metadata,
    pub score: Option<f32>,
}

impl RetrievedDoc {
    /// String-typed metadata lookup; absent or non-string values yield `None`.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

/// One assembled piece of generation context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextPart {
    pub header: String,
    pub body: String,
}
