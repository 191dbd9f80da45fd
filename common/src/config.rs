use std::collections::BTreeMap;
use std::fmt;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::RagError;

/// Provider families the engine knows how to validate against.
///
/// Concrete adapters live outside this workspace; the enum exists so that a
/// missing capability (embeddings on an Anthropic-style API, for instance)
/// is rejected when the configuration is built rather than at first call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    OpenaiLike,
    GeminiLike,
    AnthropicLike,
    OpenrouterLike,
    HuggingfaceLike,
    OllamaLike,
}

impl ProviderKind {
    pub const fn supports_embeddings(self) -> bool {
        !matches!(self, Self::AnthropicLike | Self::OpenrouterLike)
    }

    pub const fn supports_generation(self) -> bool {
        true
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::OpenaiLike => "openai-like",
            Self::GeminiLike => "gemini-like",
            Self::AnthropicLike => "anthropic-like",
            Self::OpenrouterLike => "openrouter-like",
            Self::HuggingfaceLike => "huggingface-like",
            Self::OllamaLike => "ollama-like",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub provider: ProviderKind,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub dimensions: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: ProviderKind,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub default_headers: Option<BTreeMap<String, String>>,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1024
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChunkingStrategy {
    #[default]
    Recursive,
    Agentic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default)]
    pub strategy: ChunkingStrategy,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_separators")]
    pub separators: Vec<String>,
    #[serde(default)]
    pub agentic_llm: Option<LlmConfig>,
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    150
}

fn default_separators() -> Vec<String> {
    vec!["\n\n".to_owned()]
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            strategy: ChunkingStrategy::default(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            separators: default_separators(),
            agentic_llm: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RetrievalStrategy {
    #[default]
    Naive,
    Hyde,
    MultiQuery,
    Hybrid,
    Mmr,
}

impl fmt::Display for RetrievalStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Naive => "naive",
            Self::Hyde => "hyde",
            Self::MultiQuery => "multi-query",
            Self::Hybrid => "hybrid",
            Self::Mmr => "mmr",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default)]
    pub strategy: RetrievalStrategy,
    #[serde(default)]
    pub llm_config: Option<LlmConfig>,
    #[serde(default = "default_mmr_lambda")]
    pub mmr_lambda: f32,
    #[serde(default = "default_mmr_fetch_k")]
    pub mmr_fetch_k: usize,
}

fn default_mmr_lambda() -> f32 {
    0.5
}

fn default_mmr_fetch_k() -> usize {
    20
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            strategy: RetrievalStrategy::default(),
            llm_config: None,
            mmr_lambda: default_mmr_lambda(),
            mmr_fetch_k: default_mmr_fetch_k(),
        }
    }
}

/// Initial retrieval depth when reranking is disabled.
pub const DEFAULT_TOP_K: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_rerank_top_n")]
    pub top_n: usize,
    #[serde(default = "default_rerank_window")]
    pub window_size: usize,
    #[serde(default)]
    pub llm_config: Option<LlmConfig>,
}

fn default_rerank_top_n() -> usize {
    5
}

fn default_rerank_window() -> usize {
    10
}

impl Default for RerankingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            top_n: default_rerank_top_n(),
            window_size: default_rerank_window(),
            llm_config: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MetadataConfig {
    #[serde(default)]
    pub enrichment: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryPlanningConfig {
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
    #[serde(default = "default_prefer_summaries_below")]
    pub prefer_summaries_below: usize,
    #[serde(default = "default_include_citations")]
    pub include_citations: bool,
}

fn default_token_budget() -> usize {
    4096
}

fn default_prefer_summaries_below() -> usize {
    200
}

fn default_include_citations() -> bool {
    true
}

impl Default for QueryPlanningConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            prefer_summaries_below: default_prefer_summaries_below(),
            include_citations: default_include_citations(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub strict: bool,
    #[serde(default = "default_max_snippets")]
    pub max_snippets: usize,
}

fn default_max_snippets() -> usize {
    3
}

impl Default for GroundingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            strict: false,
            max_snippets: default_max_snippets(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GenerationConfig {
    #[serde(default)]
    pub output_format: OutputFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PromptsConfig {
    /// Optional query template; `{{context}}` and `{{question}}` are
    /// substituted on every occurrence.
    #[serde(default)]
    pub query: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IngestionMode {
    #[default]
    Skip,
    Append,
    Replace,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    #[serde(default)]
    pub mode: IngestionMode,
    #[serde(default = "default_rate_limit_enabled")]
    pub rate_limit_enabled: bool,
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
}

fn default_rate_limit_enabled() -> bool {
    true
}

fn default_concurrency_limit() -> usize {
    5
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            mode: IngestionMode::default(),
            rate_limit_enabled: default_rate_limit_enabled(),
            concurrency_limit: default_concurrency_limit(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MemoryKind {
    #[default]
    InMemory,
    Kv,
    Relational,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub kind: MemoryKind,
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
}

fn default_max_messages() -> usize {
    20
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            kind: MemoryKind::default(),
            max_messages: default_max_messages(),
        }
    }
}

/// Column naming contract for vector-store backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMap {
    #[serde(default = "default_id_column")]
    pub id: String,
    #[serde(default = "default_content_column")]
    pub content: String,
    #[serde(default = "default_embedding_column")]
    pub embedding: String,
    #[serde(default = "default_metadata_column")]
    pub metadata: String,
}

fn default_id_column() -> String {
    "id".to_owned()
}

fn default_content_column() -> String {
    "content".to_owned()
}

fn default_embedding_column() -> String {
    "embedding".to_owned()
}

fn default_metadata_column() -> String {
    "metadata".to_owned()
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self {
            id: default_id_column(),
            content: default_content_column(),
            embedding: default_embedding_column(),
            metadata: default_metadata_column(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_table_name")]
    pub table_name: String,
    #[serde(default)]
    pub column_map: ColumnMap,
}

fn default_table_name() -> String {
    "documents".to_owned()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            table_name: default_table_name(),
            column_map: ColumnMap::default(),
        }
    }
}

/// The full validated configuration tree the engine is assembled from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub reranking: RerankingConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub query_planning: QueryPlanningConfig,
    #[serde(default)]
    pub grounding: GroundingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl RagConfig {
    /// Validates the whole tree, returning the first violation as
    /// [`RagError::InvalidConfig`] with the offending path.
    pub fn validate(&self) -> Result<(), RagError> {
        if self.embedding.model.trim().is_empty() {
            return Err(RagError::invalid_config(
                "embedding.model",
                "model name must not be empty",
            ));
        }
        if !self.embedding.provider.supports_embeddings() {
            return Err(RagError::invalid_config(
                "embedding.provider",
                format!(
                    "provider `{}` does not expose an embeddings capability",
                    self.embedding.provider
                ),
            ));
        }
        if self.llm.model.trim().is_empty() {
            return Err(RagError::invalid_config(
                "llm.model",
                "model name must not be empty",
            ));
        }
        if !self.llm.provider.supports_generation() {
            return Err(RagError::invalid_config(
                "llm.provider",
                format!(
                    "provider `{}` does not expose a generation capability",
                    self.llm.provider
                ),
            ));
        }
        if let Some(dimensions) = self.embedding.dimensions {
            if dimensions == 0 {
                return Err(RagError::invalid_config(
                    "embedding.dimensions",
                    "dimension must be positive",
                ));
            }
        }

        if self.chunking.chunk_size == 0 {
            return Err(RagError::invalid_config(
                "chunking.chunk_size",
                "chunk size must be positive",
            ));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(RagError::invalid_config(
                "chunking.chunk_overlap",
                "overlap must be smaller than the chunk size",
            ));
        }
        match self.chunking.strategy {
            ChunkingStrategy::Agentic if self.chunking.agentic_llm.is_none() => {
                return Err(RagError::invalid_config(
                    "chunking.agentic_llm",
                    "agentic chunking requires an llm configuration",
                ));
            }
            _ => {}
        }

        if !(0.0..=1.0).contains(&self.retrieval.mmr_lambda) {
            return Err(RagError::invalid_config(
                "retrieval.mmr_lambda",
                "lambda must lie in [0, 1]",
            ));
        }
        if matches!(
            self.retrieval.strategy,
            RetrievalStrategy::Hyde | RetrievalStrategy::MultiQuery
        ) && self.retrieval.llm_config.is_none()
        {
            return Err(RagError::invalid_config(
                "retrieval.llm_config",
                format!(
                    "strategy `{}` requires an llm configuration for query rewriting",
                    self.retrieval.strategy
                ),
            ));
        }

        if self.reranking.enabled {
            if self.reranking.top_n == 0 {
                return Err(RagError::invalid_config(
                    "reranking.top_n",
                    "top_n must be positive",
                ));
            }
            if self.reranking.window_size < self.reranking.top_n {
                return Err(RagError::invalid_config(
                    "reranking.window_size",
                    "window must be at least as large as top_n",
                ));
            }
        }

        if self.ingestion.concurrency_limit == 0 {
            return Err(RagError::invalid_config(
                "ingestion.concurrency_limit",
                "concurrency limit must be positive",
            ));
        }

        if self.memory.enabled && self.memory.max_messages == 0 {
            return Err(RagError::invalid_config(
                "memory.max_messages",
                "session window must hold at least one message",
            ));
        }

        validate_identifier("database.table_name", &self.database.table_name)?;
        let columns = &self.database.column_map;
        validate_identifier("database.column_map.id", &columns.id)?;
        validate_identifier("database.column_map.content", &columns.content)?;
        validate_identifier("database.column_map.embedding", &columns.embedding)?;
        validate_identifier("database.column_map.metadata", &columns.metadata)?;

        Ok(())
    }
}

/// SQL identifiers must match `^[A-Za-z_][A-Za-z0-9_]*$`; anything else is
/// rejected at construction so user-supplied names can never reach a query
/// string unvalidated.
fn validate_identifier(path: &str, identifier: &str) -> Result<(), RagError> {
    let mut chars = identifier.chars();
    let valid_head = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_tail = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid_head && valid_tail {
        Ok(())
    } else {
        Err(RagError::invalid_config(
            path,
            format!("`{identifier}` is not a valid SQL identifier"),
        ))
    }
}

/// Loads the configuration from an optional file layered with environment
/// variables, then validates it.
pub fn load(file: Option<&str>) -> Result<RagConfig, RagError> {
    let mut builder = Config::builder();
    builder = match file {
        Some(path) => builder.add_source(File::with_name(path)),
        None => builder.add_source(File::with_name("config").required(false)),
    };
    let settings = builder
        .add_source(Environment::default().separator("__"))
        .build()
        .map_err(|e| RagError::invalid_config("<root>", e.to_string()))?;

    let config: RagConfig = settings
        .try_deserialize()
        .map_err(|e| RagError::invalid_config("<root>", e.to_string()))?;
    config.validate()?;
    Ok(config)
}
