use serde::{Deserialize, Serialize};

/// An immutable text segment cut from a single source document.
///
/// `start`/`end` are byte offsets into the source text; a chunk whose
/// content could not be located again maps to `(0, 0)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    pub start: usize,
    pub end: usize,
    pub chunk_index: usize,
    /// Hex SHA-256 digest of `content`; the embedding-cache key.
    pub sha256: String,
}

/// Per-chunk metadata computed during ingestion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub file_type: Option<String>,
    pub doc_title: String,
    /// 1-based, present only for paged source formats.
    pub page_from: Option<usize>,
    pub page_to: Option<usize>,
    /// Most recent preceding markdown heading, when the format has them.
    pub section: Option<String>,
    pub enrichment: Option<Enrichment>,
}

/// Optional LLM-derived enrichment attached to a chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Enrichment {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub hypothetical_questions: Vec<String>,
}
