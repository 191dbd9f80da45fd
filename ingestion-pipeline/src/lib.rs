#![allow(clippy::result_large_err)]

pub mod enricher;
pub mod fingerprint;
pub mod pipeline;
pub mod processor;

pub use pipeline::IngestionPipeline;
pub use processor::DocumentProcessor;
