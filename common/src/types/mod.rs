pub mod chunk;
pub mod document;
pub mod message;

pub use chunk::{Chunk, ChunkMetadata, Enrichment};
pub use document::{ContextPart, DocumentRecord, Metadata, RetrievedDoc};
pub use message::{format_history, ChatMessage, ChatRole};

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One element of a streamed generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamEvent {
    pub delta: String,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Result of a non-streaming query.
#[derive(Debug, Clone, Serialize)]
pub struct RagResponse {
    /// The generated answer; a JSON value when `generation.output_format`
    /// is `json` and the reply parses, otherwise a plain string.
    pub answer: serde_json::Value,
    pub sources: Vec<Metadata>,
}

/// Outcome of ingesting a directory; per-file failures are collected here
/// instead of aborting the traversal.
#[derive(Debug, Default, Clone, Serialize)]
pub struct IngestionSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<IngestionFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestionFailure {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvalCase {
    pub question: String,
    pub expected_ground_truth: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvalReport {
    pub question: String,
    pub expected_ground_truth: String,
    pub faithfulness: f32,
    pub relevance: f32,
}
