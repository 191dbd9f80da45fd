use tracing::warn;

use common::backend::LanguageBackend;
use common::error::RagError;
use common::utils::retry::with_backoff;

/// Alternate queries taken from the multi-query generation.
const MAX_ALTERNATES: usize = 3;
/// Hypothetical questions appended after the alternates.
const MAX_HYPOTHETICAL: usize = 3;

const HYDE_PROMPT: &str = "Write a short, plausible passage that directly answers the \
following question. Do not mention that it is hypothetical.\n\nQuestion: ";

const MULTI_QUERY_PROMPT: &str = "Rewrite the following question as three alternative search \
queries that could surface relevant documents. Return one query per line with no numbering.\n\n\
Question: ";

const HYPOTHETICAL_PROMPT: &str = "List up to three hypothetical questions a reader might ask \
that the following question relates to. Respond with a JSON array of strings only.\n\n\
Question: ";

/// Derives alternative query formulations through the language backend.
pub struct QueryRewriter<'a> {
    backend: &'a dyn LanguageBackend,
}

impl<'a> QueryRewriter<'a> {
    pub fn new(backend: &'a dyn LanguageBackend) -> Self {
        Self { backend }
    }

    /// HyDE: a speculative passage answering the query, to be embedded in
    /// place of the query itself.
    pub async fn hyde_passage(&self, query: &str) -> Result<String, RagError> {
        let prompt = format!("{HYDE_PROMPT}{query}");
        let passage =
            with_backoff("hyde passage", || self.backend.generate(&prompt, None)).await?;
        let passage = passage.trim();
        if passage.is_empty() {
            return Err(RagError::Parse("hyde generation returned no text".into()));
        }
        Ok(passage.to_owned())
    }

    /// Multi-query expansion: up to three generated alternates, up to three
    /// fail-soft hypothetical questions, and always the original query last.
    pub async fn multi_query(&self, query: &str) -> Result<Vec<String>, RagError> {
        let prompt = format!("{MULTI_QUERY_PROMPT}{query}");
        let reply =
            with_backoff("multi-query rewrite", || self.backend.generate(&prompt, None)).await?;

        let mut queries: Vec<String> = reply
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .take(MAX_ALTERNATES)
            .map(ToOwned::to_owned)
            .collect();

        queries.extend(self.hypothetical_questions(query).await);

        queries.retain(|candidate| candidate != query);
        queries.push(query.to_owned());
        Ok(queries)
    }

    /// Fail-soft: any backend or parse failure yields an empty list.
    async fn hypothetical_questions(&self, query: &str) -> Vec<String> {
        let prompt = format!("{HYPOTHETICAL_PROMPT}{query}");
        let reply = match self.backend.generate(&prompt, None).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(error = %err, "hypothetical question generation failed; skipping");
                return Vec::new();
            }
        };

        parse_questions(&reply).unwrap_or_default()
    }
}

fn parse_questions(reply: &str) -> Option<Vec<String>> {
    let start = reply.find('[')?;
    let end = reply.rfind(']')?;
    let parsed: Vec<String> = serde_json::from_str(reply.get(start..=end)?).ok()?;
    Some(
        parsed
            .into_iter()
            .map(|q| q.trim().to_owned())
            .filter(|q| !q.is_empty())
            .take(MAX_HYPOTHETICAL)
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::MockBackend;

    #[tokio::test]
    async fn hyde_returns_the_generated_passage() {
        let backend = MockBackend::default();
        backend.push_response("  Remote work is allowed two days per week.  ");
        let rewriter = QueryRewriter::new(&backend);

        let passage = rewriter.hyde_passage("What is the remote policy?").await.unwrap();
        assert_eq!(passage, "Remote work is allowed two days per week.");
    }

    #[tokio::test]
    async fn multi_query_caps_alternates_and_appends_original() {
        let backend = MockBackend::default();
        backend.push_response("alt one\nalt two\n\nalt three\nalt four");
        backend.push_response(r#"["hypothetical one", "hypothetical two"]"#);
        let rewriter = QueryRewriter::new(&backend);

        let queries = rewriter.multi_query("original question").await.unwrap();
        assert_eq!(
            queries,
            vec![
                "alt one",
                "alt two",
                "alt three",
                "hypothetical one",
                "hypothetical two",
                "original question"
            ]
        );
    }

    #[tokio::test]
    async fn hypothetical_failure_is_soft() {
        let backend = MockBackend::default();
        backend.push_response("alt one");
        backend.push_response("not json at all");
        let rewriter = QueryRewriter::new(&backend);

        let queries = rewriter.multi_query("the question").await.unwrap();
        assert_eq!(queries, vec!["alt one", "the question"]);
    }

    #[tokio::test]
    async fn original_query_is_never_duplicated() {
        let backend = MockBackend::default();
        backend.push_response("the question\nanother angle");
        backend.push_response("[]");
        let rewriter = QueryRewriter::new(&backend);

        let queries = rewriter.multi_query("the question").await.unwrap();
        assert_eq!(queries, vec!["another angle", "the question"]);
    }
}
