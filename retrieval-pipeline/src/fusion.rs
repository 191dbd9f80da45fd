use std::collections::HashMap;

use serde_json::Value;

use common::types::RetrievedDoc;
use common::utils::text::token_set;

/// Reciprocal Rank Fusion constant used by the multi-query strategy.
///
/// Deliberately 1 rather than the textbook 60: the small constant biases
/// the fusion hard toward rank-0 hits, which is what multi-query relies on.
pub const MULTI_QUERY_RRF_C: f32 = 1.0;

/// Fuses ranked lists with `score(d) = Σᵢ 1/(c + rankᵢ(d) + 1)`.
///
/// Documents are keyed by content; the first list that discovers a document
/// supplies its representative, and ties in the fused score preserve
/// discovery order.
pub fn rrf_fuse(lists: Vec<Vec<RetrievedDoc>>, c: f32) -> Vec<RetrievedDoc> {
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut fused: Vec<(RetrievedDoc, f32)> = Vec::new();

    for list in lists {
        for (rank, doc) in list.into_iter().enumerate() {
            let contribution = 1.0 / (c + rank as f32 + 1.0);
            match slots.get(&doc.content) {
                Some(&slot) => {
                    if let Some(entry) = fused.get_mut(slot) {
                        entry.1 += contribution;
                    }
                }
                None => {
                    slots.insert(doc.content.clone(), fused.len());
                    fused.push((doc, contribution));
                }
            }
        }
    }

    // Stable sort over discovery order resolves equal scores.
    fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    fused
        .into_iter()
        .map(|(mut doc, score)| {
            doc.score = Some(score);
            doc
        })
        .collect()
}

/// Stable-sorts the docs by how many query terms appear among their
/// enrichment keywords; applied after every retrieval strategy.
pub fn keyword_boost(query: &str, docs: &mut [RetrievedDoc]) {
    let terms = token_set(query);
    if terms.is_empty() {
        return;
    }

    let boosts: Vec<usize> = docs.iter().map(|doc| boost_for(doc, &terms)).collect();
    let mut order: Vec<usize> = (0..docs.len()).collect();
    order.sort_by_key(|&i| std::cmp::Reverse(boosts.get(i).copied().unwrap_or(0)));

    let mut reordered: Vec<RetrievedDoc> = Vec::with_capacity(docs.len());
    for &i in &order {
        if let Some(doc) = docs.get(i) {
            reordered.push(doc.clone());
        }
    }
    docs.clone_from_slice(&reordered);
}

fn boost_for(doc: &RetrievedDoc, terms: &std::collections::HashSet<String>) -> usize {
    let Some(keywords) = doc.metadata.get("keywords").and_then(Value::as_array) else {
        return 0;
    };
    let keywords: std::collections::HashSet<String> = keywords
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_lowercase)
        .collect();
    terms.iter().filter(|term| keywords.contains(*term)).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::Metadata;
    use serde_json::json;

    fn doc(content: &str) -> RetrievedDoc {
        RetrievedDoc {
            content: content.into(),
            metadata: Metadata::new(),
            score: None,
        }
    }

    fn doc_with_keywords(content: &str, keywords: &[&str]) -> RetrievedDoc {
        let mut metadata = Metadata::new();
        metadata.insert("keywords".into(), json!(keywords));
        RetrievedDoc {
            content: content.into(),
            metadata,
            score: Some(0.5),
        }
    }

    #[test]
    fn rrf_merges_by_reciprocal_rank() {
        let l1 = vec![doc("d1"), doc("d2"), doc("d3")];
        let l2 = vec![doc("d2"), doc("d4")];

        let fused = rrf_fuse(vec![l1, l2], 60.0);
        let order: Vec<&str> = fused.iter().map(|d| d.content.as_str()).collect();
        assert_eq!(order, vec!["d2", "d1", "d4", "d3"]);

        let score_of = |name: &str| {
            fused
                .iter()
                .find(|d| d.content == name)
                .and_then(|d| d.score)
                .unwrap()
        };
        assert!((score_of("d2") - (1.0 / 62.0 + 1.0 / 61.0)).abs() < 1e-6);
        assert!((score_of("d1") - 1.0 / 61.0).abs() < 1e-6);
        assert!((score_of("d3") - 1.0 / 63.0).abs() < 1e-6);
        assert!((score_of("d4") - 1.0 / 62.0).abs() < 1e-6);
    }

    #[test]
    fn rrf_ties_preserve_discovery_order() {
        // Two disjoint singleton lists: identical scores, first list wins.
        let fused = rrf_fuse(vec![vec![doc("alpha")], vec![doc("beta")]], 1.0);
        let order: Vec<&str> = fused.iter().map(|d| d.content.as_str()).collect();
        assert_eq!(order, vec!["alpha", "beta"]);
    }

    #[test]
    fn rrf_promoting_a_doc_to_rank_zero_never_demotes_it() {
        let base = vec![
            vec![doc("a"), doc("b"), doc("c")],
            vec![doc("b"), doc("d")],
        ];
        let fused_before = rrf_fuse(base.clone(), 60.0);
        let rank_before = fused_before
            .iter()
            .position(|d| d.content == "d")
            .unwrap();

        // Add `d` at rank 0 of a fresh list.
        let mut boosted = base;
        boosted.push(vec![doc("d")]);
        let fused_after = rrf_fuse(boosted, 60.0);
        let rank_after = fused_after.iter().position(|d| d.content == "d").unwrap();

        assert!(rank_after <= rank_before);
    }

    #[test]
    fn duplicate_content_within_one_list_keeps_best_contributions() {
        let fused = rrf_fuse(vec![vec![doc("x"), doc("x")]], 1.0);
        assert_eq!(fused.len(), 1);
        // Both ranks contribute: 1/2 + 1/3.
        assert!((fused[0].score.unwrap() - (0.5 + 1.0 / 3.0)).abs() < 1e-6);
    }

    #[test]
    fn keyword_boost_is_a_stable_descending_sort() {
        let mut docs = vec![
            doc_with_keywords("first", &["unrelated"]),
            doc_with_keywords("second", &["rust", "async"]),
            doc_with_keywords("third", &["rust"]),
            doc_with_keywords("fourth", &[]),
        ];
        keyword_boost("rust async runtime", &mut docs);

        let order: Vec<&str> = docs.iter().map(|d| d.content.as_str()).collect();
        // second: 2 hits, third: 1 hit, first/fourth keep relative order.
        assert_eq!(order, vec!["second", "third", "first", "fourth"]);
    }

    #[test]
    fn keyword_boost_matching_is_case_insensitive() {
        let mut docs = vec![
            doc_with_keywords("plain", &[]),
            doc_with_keywords("upper", &["RUST"]),
        ];
        keyword_boost("Rust", &mut docs);
        assert_eq!(docs[0].content, "upper");
    }
}
