use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::RagError;
use crate::types::StreamEvent;

/// A pull-based lazy sequence of generation events; dropping it cancels the
/// underlying producer and releases its connection.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, RagError>> + Send>>;

/// The provider plug-in point: everything the engine needs from a language
/// model vendor.
///
/// Contracts: embedding dimension is consistent across calls; streams yield
/// in production order; failures carry a `retryable` classification through
/// [`RagError::Provider`]. Concrete adapters live outside this workspace.
#[async_trait]
pub trait LanguageBackend: Send + Sync {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, RagError>;

    async fn generate(&self, prompt: &str, system: Option<&str>) -> Result<String, RagError>;

    async fn generate_stream(
        &self,
        prompt: &str,
        system: Option<&str>,
    ) -> Result<EventStream, RagError>;
}
