use serde_json::Value;

use common::config::QueryPlanningConfig;
use common::types::{ContextPart, Metadata, RetrievedDoc};
use common::utils::text::{estimate_tokens, truncate_chars};

/// Content prefix used when a document has no usable summary.
const CONTENT_PREFIX_CHARS: usize = 1200;

/// Token-budgeted context assembly.
///
/// Documents are visited in retrieval order. Each contributes its
/// enrichment summary when that summary is cheap enough, otherwise a fixed
/// content prefix. Selection stops at the first part that would overflow
/// the budget; nothing later is backfilled, so the emitted order always
/// mirrors the retrieval order.
pub fn plan_context(docs: &[RetrievedDoc], config: &QueryPlanningConfig) -> Vec<ContextPart> {
    let mut parts = Vec::new();
    let mut spent = 0usize;

    for doc in docs {
        let body = body_for(doc, config.prefer_summaries_below);
        let cost = estimate_tokens(&body);
        if spent + cost > config.token_budget {
            break;
        }
        spent += cost;
        parts.push(ContextPart {
            header: if config.include_citations {
                doc_header(&doc.metadata)
            } else {
                String::new()
            },
            body,
        });
    }

    parts
}

fn body_for(doc: &RetrievedDoc, prefer_summaries_below: usize) -> String {
    if let Some(summary) = doc.meta_str("summary") {
        if !summary.is_empty() && estimate_tokens(summary) <= prefer_summaries_below {
            return summary.to_owned();
        }
    }
    truncate_chars(&doc.content, CONTENT_PREFIX_CHARS).to_owned()
}

/// Citation line for a document: title, section and page span when known.
pub fn doc_header(metadata: &Metadata) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(title) = metadata.get("doc_title").and_then(Value::as_str) {
        if !title.is_empty() {
            parts.push(title.to_owned());
        }
    }
    if let Some(section) = metadata.get("section").and_then(Value::as_str) {
        if !section.is_empty() {
            parts.push(section.to_owned());
        }
    }
    let page_from = metadata.get("page_from").and_then(Value::as_u64);
    let page_to = metadata.get("page_to").and_then(Value::as_u64);
    if let (Some(from), Some(to)) = (page_from, page_to) {
        parts.push(format!("[pages {from}-{to}]"));
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc_with_body(content: &str) -> RetrievedDoc {
        RetrievedDoc {
            content: content.into(),
            metadata: Metadata::new(),
            score: Some(0.5),
        }
    }

    fn doc_with_summary(content: &str, summary: &str) -> RetrievedDoc {
        let mut doc = doc_with_body(content);
        doc.metadata.insert("summary".into(), json!(summary));
        doc
    }

    fn planning(token_budget: usize, prefer_summaries_below: usize) -> QueryPlanningConfig {
        QueryPlanningConfig {
            token_budget,
            prefer_summaries_below,
            include_citations: true,
        }
    }

    #[test]
    fn selection_stops_at_first_overflow_without_backfill() {
        // Bodies of 16, 20 and 28 chars cost 4, 5 and 7 tokens.
        let docs = vec![
            doc_with_body(&"a".repeat(16)),
            doc_with_body(&"b".repeat(20)),
            doc_with_body(&"c".repeat(28)),
        ];
        let parts = plan_context(&docs, &planning(10, 0));

        assert_eq!(parts.len(), 2);
        let spent: usize = parts.iter().map(|p| estimate_tokens(&p.body)).sum();
        assert_eq!(spent, 9);
        assert!(spent <= 10);
    }

    #[test]
    fn budget_holds_even_when_a_later_part_would_fit() {
        // 4 + 7 overflows at the second doc; the 2-token third doc would
        // fit but must not be backfilled.
        let docs = vec![
            doc_with_body(&"a".repeat(16)),
            doc_with_body(&"b".repeat(28)),
            doc_with_body(&"c".repeat(8)),
        ];
        let parts = plan_context(&docs, &planning(10, 0));
        assert_eq!(parts.len(), 1);
    }

    #[test]
    fn cheap_summaries_are_preferred_over_content() {
        let doc = doc_with_summary(&"x".repeat(2000), "Short summary.");
        let parts = plan_context(&[doc], &planning(1000, 50));
        assert_eq!(parts[0].body, "Short summary.");
    }

    #[test]
    fn expensive_summaries_fall_back_to_the_content_prefix() {
        let doc = doc_with_summary(&"y".repeat(2000), &"s".repeat(400));
        let parts = plan_context(&[doc], &planning(1000, 50));
        assert_eq!(parts[0].body.chars().count(), CONTENT_PREFIX_CHARS);
        assert!(parts[0].body.starts_with('y'));
    }

    #[test]
    fn zero_docs_yield_empty_context() {
        assert!(plan_context(&[], &planning(100, 10)).is_empty());
    }

    #[test]
    fn headers_carry_title_section_and_pages() {
        let mut metadata = Metadata::new();
        metadata.insert("doc_title".into(), json!("handbook.pdf"));
        metadata.insert("section".into(), json!("Benefits"));
        metadata.insert("page_from".into(), json!(2));
        metadata.insert("page_to".into(), json!(3));
        assert_eq!(doc_header(&metadata), "handbook.pdf Benefits [pages 2-3]");

        metadata.remove("page_from");
        assert_eq!(doc_header(&metadata), "handbook.pdf Benefits");

        metadata.remove("section");
        metadata.remove("doc_title");
        assert_eq!(doc_header(&metadata), "");
    }

    #[test]
    fn include_citations_false_blanks_headers() {
        let mut doc = doc_with_body("body text");
        doc.metadata.insert("doc_title".into(), json!("doc.md"));
        let mut config = planning(100, 10);
        config.include_citations = false;
        let parts = plan_context(&[doc], &config);
        assert!(parts[0].header.is_empty());
    }
}
