use futures::future::join_all;
use tracing::{debug, warn};

use common::backend::LanguageBackend;
use common::types::RetrievedDoc;
use common::utils::retry::with_backoff;
use common::utils::text::first_integer;

/// Re-scores the leading candidates with an LLM judge and keeps the best.
///
/// Each candidate is scored independently; a candidate whose score cannot
/// be obtained (backend failure after retries, or unparseable output)
/// scores 0 rather than failing the query. The sort is stable, so equal
/// scores keep their retrieval order.
pub async fn rerank(
    backend: &dyn LanguageBackend,
    query: &str,
    mut docs: Vec<RetrievedDoc>,
    window_size: usize,
    top_n: usize,
) -> Vec<RetrievedDoc> {
    docs.truncate(window_size);
    if docs.is_empty() {
        return docs;
    }

    let scores = join_all(docs.iter().map(|doc| score_document(backend, query, doc))).await;

    let mut scored: Vec<(RetrievedDoc, u32)> = docs.into_iter().zip(scores).collect();
    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored.truncate(top_n);
    scored
        .into_iter()
        .map(|(mut doc, score)| {
            doc.score = Some(score as f32);
            doc
        })
        .collect()
}

async fn score_document(backend: &dyn LanguageBackend, query: &str, doc: &RetrievedDoc) -> u32 {
    let prompt = format!(
        "Analyze the relevance of the document to the query on a scale of 0-10. \
         Return ONLY the integer.\n\nQuery: {query}\n\nDocument:\n{content}",
        content = doc.content
    );

    let reply = match with_backoff("rerank score", || backend.generate(&prompt, None)).await {
        Ok(reply) => reply,
        Err(err) => {
            warn!(error = %err, "rerank scoring failed; defaulting to 0");
            return 0;
        }
    };

    match first_integer(&reply) {
        Some(score) => score.min(10),
        None => {
            debug!(reply = %reply, "rerank reply held no integer; defaulting to 0");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::Metadata;
    use common::test_utils::MockBackend;

    fn doc(content: &str) -> RetrievedDoc {
        RetrievedDoc {
            content: content.into(),
            metadata: Metadata::new(),
            score: Some(0.1),
        }
    }

    #[tokio::test]
    async fn keeps_top_n_by_judge_score() {
        let backend = MockBackend::default();
        backend.push_response("3");
        backend.push_response("The score is 9 out of 10.");
        backend.push_response("7");
        let docs = vec![doc("low"), doc("high"), doc("mid")];

        let reranked = rerank(&backend, "query", docs, 3, 2).await;
        let order: Vec<&str> = reranked.iter().map(|d| d.content.as_str()).collect();
        assert_eq!(order, vec!["high", "mid"]);
        assert_eq!(reranked[0].score, Some(9.0));
    }

    #[tokio::test]
    async fn unparseable_scores_default_to_zero() {
        let backend = MockBackend::default();
        backend.push_response("no digits");
        backend.push_response("5");
        let docs = vec![doc("first"), doc("second")];

        let reranked = rerank(&backend, "query", docs, 2, 2).await;
        let order: Vec<&str> = reranked.iter().map(|d| d.content.as_str()).collect();
        assert_eq!(order, vec!["second", "first"]);
        assert_eq!(reranked[1].score, Some(0.0));
    }

    #[tokio::test]
    async fn window_limits_how_many_candidates_are_scored() {
        let backend = MockBackend::default();
        backend.push_response("2");
        backend.push_response("8");
        let docs = vec![doc("a"), doc("b"), doc("never scored")];

        let reranked = rerank(&backend, "query", docs, 2, 2).await;
        assert_eq!(backend.generate_calls(), 2);
        let order: Vec<&str> = reranked.iter().map(|d| d.content.as_str()).collect();
        assert_eq!(order, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn equal_scores_keep_retrieval_order() {
        let backend = MockBackend::default();
        backend.push_response("5");
        backend.push_response("5");
        let docs = vec![doc("earlier"), doc("later")];

        let reranked = rerank(&backend, "query", docs, 2, 2).await;
        let order: Vec<&str> = reranked.iter().map(|d| d.content.as_str()).collect();
        assert_eq!(order, vec!["earlier", "later"]);
    }
}
