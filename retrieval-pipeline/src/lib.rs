#![allow(clippy::result_large_err)]

pub mod fusion;
pub mod grounding;
pub mod mmr;
pub mod pipeline;
pub mod planner;
pub mod reranker;
pub mod rewriter;

pub use pipeline::{run_query_pipeline, RetrievalOutput, StageKind, StageTimings};
