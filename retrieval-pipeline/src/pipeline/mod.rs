use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::{debug, info, instrument};

use common::backend::LanguageBackend;
use common::config::{RagConfig, RetrievalStrategy, DEFAULT_TOP_K};
use common::error::RagError;
use common::hooks::{dispatch, PipelineHooks};
use common::store::{Filter, VectorStore};
use common::types::{ContextPart, RetrievedDoc};
use common::utils::retry::with_backoff;

use crate::fusion::{keyword_boost, rrf_fuse, MULTI_QUERY_RRF_C};
use crate::grounding::ground_context;
use crate::mmr::mmr_select;
use crate::planner::plan_context;
use crate::reranker::rerank;
use crate::rewriter::QueryRewriter;

/// Stage identity, used for timing attribution and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Rewrite,
    Search,
    Rerank,
    Plan,
    Ground,
}

/// Wall-clock per-stage timings for one pipeline run.
#[derive(Debug, Default, Clone)]
pub struct StageTimings {
    timings: Vec<(StageKind, Duration)>,
}

impl StageTimings {
    pub fn record(&mut self, kind: StageKind, duration: Duration) {
        self.timings.push((kind, duration));
    }

    pub fn get(&self, kind: StageKind) -> Option<Duration> {
        self.timings
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, d)| *d)
    }

    pub fn into_vec(self) -> Vec<(StageKind, Duration)> {
        self.timings
    }
}

/// Mutable state threaded through the stages of one query.
pub struct QueryContext<'a> {
    pub backend: &'a dyn LanguageBackend,
    pub store: &'a dyn VectorStore,
    pub config: &'a RagConfig,
    pub hooks: &'a dyn PipelineHooks,
    pub query: String,
    pub filter: Option<Filter>,
    /// Rewritten queries for multi-query search; the original is last.
    pub rewrites: Vec<String>,
    /// Speculative answer passage for HyDE search.
    pub hyde_passage: Option<String>,
    pub candidates: Vec<RetrievedDoc>,
    pub context_parts: Vec<ContextPart>,
    timings: StageTimings,
}

impl<'a> QueryContext<'a> {
    pub fn new(
        backend: &'a dyn LanguageBackend,
        store: &'a dyn VectorStore,
        config: &'a RagConfig,
        hooks: &'a dyn PipelineHooks,
        query: String,
        filter: Option<Filter>,
    ) -> Self {
        Self {
            backend,
            store,
            config,
            hooks,
            query,
            filter,
            rewrites: Vec::new(),
            hyde_passage: None,
            candidates: Vec::new(),
            context_parts: Vec::new(),
            timings: StageTimings::default(),
        }
    }

    /// Retrieval depth: the rerank window when reranking is on, else the
    /// fixed default.
    fn effective_k(&self) -> usize {
        if self.config.reranking.enabled {
            self.config.reranking.window_size
        } else {
            DEFAULT_TOP_K
        }
    }

    fn record_stage_duration(&mut self, kind: StageKind, duration: Duration) {
        self.timings.record(kind, duration);
    }

    fn take_timings(&mut self) -> StageTimings {
        std::mem::take(&mut self.timings)
    }
}

#[async_trait]
pub trait PipelineStage: Send + Sync {
    fn kind(&self) -> StageKind;
    async fn execute(&self, ctx: &mut QueryContext<'_>) -> Result<(), RagError>;
}

pub type BoxedStage = Box<dyn PipelineStage>;

/// What a pipeline run hands back to the generation driver.
#[derive(Debug, Clone)]
pub struct RetrievalOutput {
    pub docs: Vec<RetrievedDoc>,
    pub context: Vec<ContextPart>,
    pub timings: StageTimings,
}

/// Runs the strategy-selected stage list for one query:
/// `Rewrite? → Search → Rerank? → Plan → Ground?`.
#[instrument(skip_all, fields(strategy = %config.retrieval.strategy))]
pub async fn run_query_pipeline(
    backend: &dyn LanguageBackend,
    store: &dyn VectorStore,
    config: &RagConfig,
    hooks: &dyn PipelineHooks,
    query: &str,
    filter: Option<Filter>,
) -> Result<RetrievalOutput, RagError> {
    info!(
        strategy = %config.retrieval.strategy,
        query_chars = query.chars().count(),
        "starting retrieval pipeline"
    );

    let mut ctx = QueryContext::new(backend, store, config, hooks, query.to_owned(), filter);
    for stage in stages_for(config) {
        let start = Instant::now();
        stage.execute(&mut ctx).await?;
        ctx.record_stage_duration(stage.kind(), start.elapsed());
    }

    let timings = ctx.take_timings();
    Ok(RetrievalOutput {
        docs: ctx.candidates,
        context: ctx.context_parts,
        timings,
    })
}

fn stages_for(config: &RagConfig) -> Vec<BoxedStage> {
    let mut stages: Vec<BoxedStage> = Vec::new();
    if matches!(
        config.retrieval.strategy,
        RetrievalStrategy::Hyde | RetrievalStrategy::MultiQuery
    ) {
        stages.push(Box::new(RewriteStage));
    }
    stages.push(Box::new(SearchStage));
    if config.reranking.enabled {
        stages.push(Box::new(RerankStage));
    }
    stages.push(Box::new(PlanStage));
    if config.grounding.enabled {
        stages.push(Box::new(GroundStage));
    }
    stages
}

#[derive(Debug, Clone, Copy)]
struct RewriteStage;

#[async_trait]
impl PipelineStage for RewriteStage {
    fn kind(&self) -> StageKind {
        StageKind::Rewrite
    }

    async fn execute(&self, ctx: &mut QueryContext<'_>) -> Result<(), RagError> {
        let rewriter = QueryRewriter::new(ctx.backend);
        match ctx.config.retrieval.strategy {
            RetrievalStrategy::Hyde => {
                let passage = rewriter.hyde_passage(&ctx.query).await?;
                debug!(passage_chars = passage.chars().count(), "hyde passage generated");
                ctx.hyde_passage = Some(passage);
            }
            RetrievalStrategy::MultiQuery => {
                let rewrites = rewriter.multi_query(&ctx.query).await?;
                debug!(count = rewrites.len(), "multi-query rewrites generated");
                ctx.rewrites = rewrites;
            }
            _ => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct SearchStage;

#[async_trait]
impl PipelineStage for SearchStage {
    fn kind(&self) -> StageKind {
        StageKind::Search
    }

    async fn execute(&self, ctx: &mut QueryContext<'_>) -> Result<(), RagError> {
        dispatch(|| ctx.hooks.on_retrieval_start(&ctx.query));
        let k = ctx.effective_k();

        let mut candidates = match ctx.config.retrieval.strategy {
            RetrievalStrategy::Naive => {
                let vector = embed_query(ctx.backend, &ctx.query).await?;
                ctx.store
                    .similarity_search(&vector, k, ctx.filter.as_ref())
                    .await?
            }
            RetrievalStrategy::Hyde => {
                let text = ctx.hyde_passage.as_deref().unwrap_or(&ctx.query);
                let vector = embed_query(ctx.backend, text).await?;
                ctx.store
                    .similarity_search(&vector, k, ctx.filter.as_ref())
                    .await?
            }
            RetrievalStrategy::MultiQuery => {
                let mut queries = ctx.rewrites.clone();
                if queries.is_empty() {
                    queries.push(ctx.query.clone());
                }
                let backend = ctx.backend;
                let store = ctx.store;
                let filter = ctx.filter.as_ref();
                // Searches run in parallel; `try_join_all` keeps the input
                // order, so RRF discovery order stays deterministic.
                let lists = try_join_all(queries.iter().map(|q| async move {
                    let vector = embed_query(backend, q).await?;
                    store.similarity_search(&vector, k, filter).await
                }))
                .await?;
                rrf_fuse(lists, MULTI_QUERY_RRF_C)
            }
            RetrievalStrategy::Hybrid => {
                let vector = embed_query(ctx.backend, &ctx.query).await?;
                ctx.store
                    .hybrid_search(&ctx.query, &vector, k, ctx.filter.as_ref())
                    .await?
            }
            RetrievalStrategy::Mmr => {
                let fetch = ctx.config.retrieval.mmr_fetch_k.max(k);
                let vector = embed_query(ctx.backend, &ctx.query).await?;
                let pool = ctx
                    .store
                    .similarity_search(&vector, fetch, ctx.filter.as_ref())
                    .await?;
                mmr_select(pool, k, ctx.config.retrieval.mmr_lambda)
            }
        };

        keyword_boost(&ctx.query, &mut candidates);
        debug!(candidates = candidates.len(), "retrieval candidates collected");
        dispatch(|| ctx.hooks.on_retrieval_end(candidates.len()));
        ctx.candidates = candidates;
        Ok(())
    }
}

async fn embed_query(backend: &dyn LanguageBackend, text: &str) -> Result<Vec<f32>, RagError> {
    with_backoff("query embedding", || backend.embed_query(text)).await
}

#[derive(Debug, Clone, Copy)]
struct RerankStage;

#[async_trait]
impl PipelineStage for RerankStage {
    fn kind(&self) -> StageKind {
        StageKind::Rerank
    }

    async fn execute(&self, ctx: &mut QueryContext<'_>) -> Result<(), RagError> {
        dispatch(|| ctx.hooks.on_reranking_start(ctx.candidates.len()));
        let docs = std::mem::take(&mut ctx.candidates);
        ctx.candidates = rerank(
            ctx.backend,
            &ctx.query,
            docs,
            ctx.config.reranking.window_size,
            ctx.config.reranking.top_n,
        )
        .await;
        dispatch(|| ctx.hooks.on_reranking_end(ctx.candidates.len()));
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct PlanStage;

#[async_trait]
impl PipelineStage for PlanStage {
    fn kind(&self) -> StageKind {
        StageKind::Plan
    }

    async fn execute(&self, ctx: &mut QueryContext<'_>) -> Result<(), RagError> {
        ctx.context_parts = plan_context(&ctx.candidates, &ctx.config.query_planning);
        debug!(parts = ctx.context_parts.len(), "context planned");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct GroundStage;

#[async_trait]
impl PipelineStage for GroundStage {
    fn kind(&self) -> StageKind {
        StageKind::Ground
    }

    async fn execute(&self, ctx: &mut QueryContext<'_>) -> Result<(), RagError> {
        let planned = std::mem::take(&mut ctx.context_parts);
        ctx.context_parts =
            ground_context(&ctx.query, &ctx.candidates, planned, &ctx.config.grounding);
        debug!(parts = ctx.context_parts.len(), "grounding applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use common::config::{
        EmbeddingConfig, LlmConfig, ProviderKind, RagConfig, RetrievalStrategy,
    };
    use common::hooks::NoopHooks;
    use common::test_utils::{embedding_for, MemoryVectorStore, MockBackend};
    use common::types::{DocumentRecord, Metadata};
    use serde_json::json;

    fn test_config(strategy: RetrievalStrategy) -> RagConfig {
        let llm = LlmConfig {
            provider: ProviderKind::OpenaiLike,
            model: "test-llm".into(),
            api_key: None,
            temperature: 0.0,
            max_tokens: 256,
            base_url: None,
            default_headers: None,
        };
        let mut config = RagConfig {
            embedding: EmbeddingConfig {
                provider: ProviderKind::OpenaiLike,
                model: "test-embedding".into(),
                api_key: None,
                dimensions: Some(8),
            },
            llm: llm.clone(),
            chunking: Default::default(),
            retrieval: Default::default(),
            reranking: Default::default(),
            metadata: Default::default(),
            query_planning: Default::default(),
            grounding: Default::default(),
            generation: Default::default(),
            prompts: Default::default(),
            ingestion: Default::default(),
            memory: Default::default(),
            database: Default::default(),
        };
        config.retrieval.strategy = strategy;
        if matches!(
            strategy,
            RetrievalStrategy::Hyde | RetrievalStrategy::MultiQuery
        ) {
            config.retrieval.llm_config = Some(llm);
        }
        config
    }

    fn record(id: &str, content: &str) -> DocumentRecord {
        let mut metadata = Metadata::new();
        metadata.insert("doc_title".into(), json!(format!("{id}.txt")));
        DocumentRecord {
            id: id.into(),
            content: content.into(),
            embedding: embedding_for(content, 8),
            metadata,
        }
    }

    async fn seeded_store() -> Arc<MemoryVectorStore> {
        let store = Arc::new(MemoryVectorStore::new());
        store
            .add_documents(&[
                record("1", "tokio runtime schedules asynchronous tasks"),
                record("2", "the borrow checker enforces aliasing rules"),
                record("3", "cargo builds and tests rust projects"),
            ])
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn naive_strategy_retrieves_and_plans_context() {
        let backend = MockBackend::default();
        let store = seeded_store().await;
        let config = test_config(RetrievalStrategy::Naive);

        let output = run_query_pipeline(
            &backend,
            store.as_ref(),
            &config,
            &NoopHooks,
            "tokio asynchronous tasks",
            None,
        )
        .await
        .unwrap();

        assert!(!output.docs.is_empty());
        assert_eq!(
            output.docs[0].content,
            "tokio runtime schedules asynchronous tasks"
        );
        assert_eq!(output.docs.len(), output.context.len());
        assert!(output.timings.get(StageKind::Search).is_some());
        assert!(output.timings.get(StageKind::Plan).is_some());
        assert!(output.timings.get(StageKind::Rewrite).is_none());
    }

    #[tokio::test]
    async fn empty_store_yields_empty_context() {
        let backend = MockBackend::default();
        let store = MemoryVectorStore::new();
        let config = test_config(RetrievalStrategy::Naive);

        let output = run_query_pipeline(
            &backend,
            &store,
            &config,
            &NoopHooks,
            "anything at all",
            None,
        )
        .await
        .unwrap();

        assert!(output.docs.is_empty());
        assert!(output.context.is_empty());
    }

    #[tokio::test]
    async fn hyde_searches_with_the_passage_embedding() {
        let backend = MockBackend::default();
        backend.push_response("tokio runtime schedules asynchronous tasks");
        let store = seeded_store().await;
        let config = test_config(RetrievalStrategy::Hyde);

        let output = run_query_pipeline(
            &backend,
            store.as_ref(),
            &config,
            &NoopHooks,
            "how are futures polled?",
            None,
        )
        .await
        .unwrap();

        assert_eq!(
            output.docs[0].content,
            "tokio runtime schedules asynchronous tasks"
        );
        assert!(output.timings.get(StageKind::Rewrite).is_some());
    }

    #[tokio::test]
    async fn multi_query_fuses_lists_with_rrf() {
        let backend = MockBackend::default();
        backend.push_response("borrow checker aliasing\ncargo build tests");
        backend.push_response("[]");
        let store = seeded_store().await;
        let config = test_config(RetrievalStrategy::MultiQuery);

        let output = run_query_pipeline(
            &backend,
            store.as_ref(),
            &config,
            &NoopHooks,
            "rust rules",
            None,
        )
        .await
        .unwrap();

        // Three searches ran (two rewrites + original); all seeded docs
        // surface with fused scores attached.
        assert_eq!(backend.embed_query_calls(), 3);
        assert_eq!(output.docs.len(), 3);
        assert!(output.docs.iter().all(|d| d.score.is_some()));
    }

    #[tokio::test]
    async fn mmr_strategy_caps_selection_at_k() {
        let backend = MockBackend::default();
        let store = seeded_store().await;
        let mut config = test_config(RetrievalStrategy::Mmr);
        config.retrieval.mmr_fetch_k = 3;

        let output = run_query_pipeline(
            &backend,
            store.as_ref(),
            &config,
            &NoopHooks,
            "rust tooling",
            None,
        )
        .await
        .unwrap();

        assert!(output.docs.len() <= DEFAULT_TOP_K);
        assert!(!output.docs.is_empty());
    }

    #[tokio::test]
    async fn hybrid_falls_back_to_similarity_search() {
        let backend = MockBackend::default();
        let store = seeded_store().await;
        let config = test_config(RetrievalStrategy::Hybrid);

        let output = run_query_pipeline(
            &backend,
            store.as_ref(),
            &config,
            &NoopHooks,
            "cargo builds projects",
            None,
        )
        .await
        .unwrap();

        assert_eq!(output.docs[0].content, "cargo builds and tests rust projects");
    }

    #[tokio::test]
    async fn reranking_trims_to_top_n() {
        let backend = MockBackend::default();
        // Judge scores for the three candidates, in retrieval order.
        backend.push_response("2");
        backend.push_response("9");
        backend.push_response("5");
        let store = seeded_store().await;
        let mut config = test_config(RetrievalStrategy::Naive);
        config.reranking.enabled = true;
        config.reranking.window_size = 3;
        config.reranking.top_n = 2;

        let output = run_query_pipeline(
            &backend,
            store.as_ref(),
            &config,
            &NoopHooks,
            "rust",
            None,
        )
        .await
        .unwrap();

        assert_eq!(output.docs.len(), 2);
        assert_eq!(output.docs[0].score, Some(9.0));
        assert!(output.timings.get(StageKind::Rerank).is_some());
    }

    #[tokio::test]
    async fn strict_grounding_replaces_planned_context() {
        let backend = MockBackend::default();
        let store = Arc::new(MemoryVectorStore::new());
        store
            .add_documents(&[record(
                "1",
                "Employees may work remotely. Vacations accrue monthly.",
            )])
            .await
            .unwrap();
        let mut config = test_config(RetrievalStrategy::Naive);
        config.grounding.enabled = true;
        config.grounding.strict = true;
        config.grounding.max_snippets = 2;

        let output = run_query_pipeline(
            &backend,
            store.as_ref(),
            &config,
            &NoopHooks,
            "remote work policy",
            None,
        )
        .await
        .unwrap();

        assert_eq!(output.context.len(), 1);
        assert_eq!(output.context[0].body, "Employees may work remotely.");
        assert!(output.timings.get(StageKind::Ground).is_some());
    }

    #[tokio::test]
    async fn filter_restricts_the_candidate_pool() {
        let backend = MockBackend::default();
        let store = seeded_store().await;
        let config = test_config(RetrievalStrategy::Naive);

        let mut filter = Filter::new();
        filter.insert("doc_title".into(), json!("2.txt"));
        let output = run_query_pipeline(
            &backend,
            store.as_ref(),
            &config,
            &NoopHooks,
            "rust",
            Some(filter),
        )
        .await
        .unwrap();

        assert_eq!(output.docs.len(), 1);
        assert_eq!(
            output.docs[0].content,
            "the borrow checker enforces aliasing rules"
        );
    }
}
