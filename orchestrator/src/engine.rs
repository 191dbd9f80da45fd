use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, instrument};

use common::backend::{EventStream, LanguageBackend};
use common::config::{OutputFormat, RagConfig, RetrievalStrategy};
use common::error::RagError;
use common::history::{HistoryStore, InMemoryHistory};
use common::hooks::{dispatch, NoopHooks, PipelineHooks};
use common::loader::{DocumentLoader, PlainTextLoader};
use common::store::{Filter, VectorStore};
use common::types::{ChatMessage, ChatRole, EvalCase, EvalReport, IngestionSummary, RagResponse};
use common::utils::retry::with_backoff;
use ingestion_pipeline::IngestionPipeline;
use retrieval_pipeline::{run_query_pipeline, RetrievalOutput};

use crate::evaluator;
use crate::prompt::{build_prompt, render_context, SYSTEM_INSTRUCTION};
use crate::state::{advance, QueryPhase};
use crate::streaming::monitor_stream;

/// The long-lived orchestrator. Owns its subcomponents; collaborators come
/// in through the capability traits and are shared via `Arc`.
pub struct RagEngine {
    config: Arc<RagConfig>,
    backend: Arc<dyn LanguageBackend>,
    store: Arc<dyn VectorStore>,
    history: Arc<dyn HistoryStore>,
    hooks: Arc<dyn PipelineHooks>,
    ingestion: IngestionPipeline,
}

impl RagEngine {
    /// Builds an engine with the default loader (plain text), history
    /// store (bounded in-memory) and hooks (none). Fails fast on an
    /// invalid configuration.
    pub fn new(
        config: RagConfig,
        backend: Arc<dyn LanguageBackend>,
        store: Arc<dyn VectorStore>,
    ) -> Result<Self, RagError> {
        let history = Arc::new(InMemoryHistory::new(config.memory.max_messages));
        Self::with_parts(
            config,
            backend,
            store,
            Arc::new(PlainTextLoader),
            history,
            Arc::new(NoopHooks),
        )
    }

    /// Builds an engine from explicit collaborators.
    pub fn with_parts(
        config: RagConfig,
        backend: Arc<dyn LanguageBackend>,
        store: Arc<dyn VectorStore>,
        loader: Arc<dyn DocumentLoader>,
        history: Arc<dyn HistoryStore>,
        hooks: Arc<dyn PipelineHooks>,
    ) -> Result<Self, RagError> {
        config.validate()?;
        let config = Arc::new(config);
        let ingestion = IngestionPipeline::new(
            Arc::clone(&config),
            Arc::clone(&backend),
            Arc::clone(&store),
            loader,
            Arc::clone(&hooks),
        );
        Ok(Self {
            config,
            backend,
            store,
            history,
            hooks,
            ingestion,
        })
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub(crate) fn backend(&self) -> &dyn LanguageBackend {
        self.backend.as_ref()
    }

    /// Ingests one file; returns the number of stored chunks (0 when skip
    /// mode found the file already present).
    pub async fn ingest_file(&self, path: &Path) -> Result<usize, RagError> {
        self.ingestion.ingest_file(path).await
    }

    /// Ingests every regular file directly under `dir` with per-file
    /// failure isolation.
    pub async fn ingest_directory(&self, dir: &Path) -> Result<IngestionSummary, RagError> {
        self.ingestion.ingest_directory(dir).await
    }

    /// Answers a question over the ingested corpus.
    #[instrument(skip_all, fields(session_id))]
    pub async fn query(
        &self,
        question: &str,
        session_id: Option<&str>,
    ) -> Result<RagResponse, RagError> {
        self.query_filtered(question, session_id, None).await
    }

    /// Like [`RagEngine::query`] with a metadata filter on retrieval.
    pub async fn query_filtered(
        &self,
        question: &str,
        session_id: Option<&str>,
        filter: Option<Filter>,
    ) -> Result<RagResponse, RagError> {
        let mut phase = QueryPhase::Pending;

        let (prompt, output) = match self.prepare(question, session_id, filter, &mut phase).await {
            Ok(prepared) => prepared,
            Err(err) => return Err(self.fail(&mut phase, err)),
        };

        advance(&mut phase, QueryPhase::Generating);
        dispatch(|| self.hooks.on_generation_start());
        let answer = match with_backoff("generation", || {
            self.backend.generate(&prompt, Some(SYSTEM_INSTRUCTION))
        })
        .await
        {
            Ok(answer) => answer,
            Err(err) => return Err(self.fail(&mut phase, err)),
        };
        dispatch(|| self.hooks.on_generation_end(&answer));

        if let Some(session_id) = session_id.filter(|_| self.config.memory.enabled) {
            self.history
                .add_message(session_id, ChatRole::User, question)
                .await?;
            self.history
                .add_message(session_id, ChatRole::Assistant, &answer)
                .await?;
        }

        advance(&mut phase, QueryPhase::Done);
        info!(sources = output.docs.len(), "query answered");

        Ok(RagResponse {
            answer: self.parse_answer(answer),
            sources: output.docs.into_iter().map(|doc| doc.metadata).collect(),
        })
    }

    /// Streaming variant: deltas flow through as the backend produces
    /// them. Dropping the stream cancels generation; the history store is
    /// never written on this path.
    #[instrument(skip_all, fields(session_id))]
    pub async fn query_stream(
        &self,
        question: &str,
        session_id: Option<&str>,
    ) -> Result<EventStream, RagError> {
        let mut phase = QueryPhase::Pending;

        let (prompt, _output) = match self.prepare(question, session_id, None, &mut phase).await {
            Ok(prepared) => prepared,
            Err(err) => return Err(self.fail(&mut phase, err)),
        };

        advance(&mut phase, QueryPhase::Generating);
        dispatch(|| self.hooks.on_generation_start());
        let stream = match self
            .backend
            .generate_stream(&prompt, Some(SYSTEM_INSTRUCTION))
            .await
        {
            Ok(stream) => stream,
            Err(err) => return Err(self.fail(&mut phase, err)),
        };

        Ok(monitor_stream(stream, Arc::clone(&self.hooks)))
    }

    /// Scores question/ground-truth pairs through the full query pipeline;
    /// per-case failures degrade to zero scores instead of aborting.
    pub async fn evaluate(&self, cases: &[EvalCase]) -> Vec<EvalReport> {
        evaluator::evaluate_cases(self, cases).await
    }

    /// Shared front half of both query paths: retrieval pipeline, history
    /// window and prompt assembly.
    async fn prepare(
        &self,
        question: &str,
        session_id: Option<&str>,
        filter: Option<Filter>,
        phase: &mut QueryPhase,
    ) -> Result<(String, RetrievalOutput), RagError> {
        if matches!(
            self.config.retrieval.strategy,
            RetrievalStrategy::Hyde | RetrievalStrategy::MultiQuery
        ) {
            advance(phase, QueryPhase::Rewriting);
        }
        advance(phase, QueryPhase::Retrieving);

        let output = run_query_pipeline(
            self.backend.as_ref(),
            self.store.as_ref(),
            &self.config,
            self.hooks.as_ref(),
            question,
            filter,
        )
        .await?;
        for (kind, duration) in output.timings.clone().into_vec() {
            debug!(stage = ?kind, ms = duration.as_millis() as u64, "retrieval stage finished");
        }

        let history = self.history_window(session_id).await?;
        let context = render_context(&output.context);
        let prompt = build_prompt(
            self.config.prompts.query.as_deref(),
            &context,
            question,
            &history,
        );
        Ok((prompt, output))
    }

    async fn history_window(
        &self,
        session_id: Option<&str>,
    ) -> Result<Vec<ChatMessage>, RagError> {
        match session_id.filter(|_| self.config.memory.enabled) {
            Some(session_id) => {
                self.history
                    .get_recent(session_id, self.config.memory.max_messages)
                    .await
            }
            None => Ok(Vec::new()),
        }
    }

    fn parse_answer(&self, answer: String) -> Value {
        match self.config.generation.output_format {
            OutputFormat::Text => Value::String(answer),
            OutputFormat::Json => match serde_json::from_str(&answer) {
                Ok(value) => value,
                Err(err) => {
                    debug!(error = %err, "answer is not valid JSON; returning raw text");
                    Value::String(answer)
                }
            },
        }
    }

    fn fail(&self, phase: &mut QueryPhase, err: RagError) -> RagError {
        advance(phase, QueryPhase::Failed);
        dispatch(|| self.hooks.on_error(&err));
        err
    }
}
