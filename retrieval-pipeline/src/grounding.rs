use common::config::GroundingConfig;
use common::types::{ContextPart, RetrievedDoc};
use common::utils::text::{split_sentences, token_set};

use crate::planner::doc_header;

/// Extractive grounding: keeps only sentences that share vocabulary with
/// the query.
///
/// Each document contributes at most `max_snippets` sentences, taken in
/// document order, scored by overlapping query tokens; zero-overlap
/// sentences never qualify. In strict mode the snippets *replace* the
/// planned context, pinning every context character to a retrieved
/// sentence; otherwise they are appended as supporting evidence.
pub fn ground_context(
    query: &str,
    docs: &[RetrievedDoc],
    planned: Vec<ContextPart>,
    config: &GroundingConfig,
) -> Vec<ContextPart> {
    let snippets = extract_snippets(query, docs, config.max_snippets);
    if config.strict {
        snippets
    } else {
        let mut parts = planned;
        parts.extend(snippets);
        parts
    }
}

fn extract_snippets(query: &str, docs: &[RetrievedDoc], max_snippets: usize) -> Vec<ContextPart> {
    let terms = token_set(query);
    let mut snippets = Vec::new();
    if terms.is_empty() || max_snippets == 0 {
        return snippets;
    }

    for doc in docs {
        let header = doc_header(&doc.metadata);
        let mut taken = 0usize;
        for sentence in split_sentences(&doc.content) {
            if taken >= max_snippets {
                break;
            }
            let overlap = token_set(sentence)
                .intersection(&terms)
                .count();
            if overlap > 0 {
                snippets.push(ContextPart {
                    header: header.clone(),
                    body: sentence.to_owned(),
                });
                taken += 1;
            }
        }
    }
    snippets
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::Metadata;
    use serde_json::json;

    fn doc(content: &str) -> RetrievedDoc {
        let mut metadata = Metadata::new();
        metadata.insert("doc_title".into(), json!("policy.md"));
        RetrievedDoc {
            content: content.into(),
            metadata,
            score: Some(0.8),
        }
    }

    fn config(strict: bool, max_snippets: usize) -> GroundingConfig {
        GroundingConfig {
            enabled: true,
            strict,
            max_snippets,
        }
    }

    #[test]
    fn strict_mode_keeps_only_overlapping_sentences() {
        let docs = vec![doc(
            "Employees may work remotely. Vacations accrue monthly.",
        )];
        let parts = ground_context(
            "remote work policy",
            &docs,
            vec![ContextPart {
                header: "planned".into(),
                body: "planned body".into(),
            }],
            &config(true, 2),
        );

        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].body, "Employees may work remotely.");
        assert_eq!(parts[0].header, "policy.md");
    }

    #[test]
    fn strict_context_is_fully_made_of_extracted_sentences() {
        let content = "Remote work needs approval. Badges open the east door. Remote days are Mondays.";
        let docs = vec![doc(content)];
        let parts = ground_context("remote work", &docs, Vec::new(), &config(true, 5));

        let sentences: Vec<&str> = split_sentences(content);
        for part in &parts {
            assert!(sentences.contains(&part.body.as_str()));
        }
        assert_eq!(parts.len(), 2);
    }

    #[test]
    fn augmentation_mode_appends_after_planned_parts() {
        let docs = vec![doc("Remote work is fine. Unrelated sentence here.")];
        let planned = vec![ContextPart {
            header: "plan".into(),
            body: "planned body".into(),
        }];
        let parts = ground_context("remote work", &docs, planned, &config(false, 2));

        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].body, "planned body");
        assert_eq!(parts[1].body, "Remote work is fine.");
    }

    #[test]
    fn snippet_count_is_capped_per_document() {
        let docs = vec![doc(
            "Remote one. Remote two. Remote three. Remote four.",
        )];
        let parts = ground_context("remote", &docs, Vec::new(), &config(true, 2));
        assert_eq!(parts.len(), 2);
    }

    #[test]
    fn zero_overlap_produces_no_snippets() {
        let docs = vec![doc("Completely unrelated sentences only.")];
        let parts = ground_context("quantum chromodynamics", &docs, Vec::new(), &config(true, 3));
        assert!(parts.is_empty());
    }
}
