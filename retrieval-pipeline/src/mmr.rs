use std::collections::HashSet;

use common::types::RetrievedDoc;
use common::utils::text::token_set;

/// Maximal Marginal Relevance selection over similarity-ranked candidates.
///
/// The top candidate is always taken; afterwards each pick maximizes
/// `λ·relevance − (1−λ)·max Jaccard overlap with the selected set`, where
/// relevance is the candidate's retrieval score (0 when the backend did not
/// report one) and the token sets are lowercased alphanumeric tokens longer
/// than two characters. λ is clamped to [0, 1]; λ = 1 degenerates to plain
/// relevance ranking.
pub fn mmr_select(candidates: Vec<RetrievedDoc>, k: usize, lambda: f32) -> Vec<RetrievedDoc> {
    if candidates.is_empty() || k == 0 {
        return Vec::new();
    }
    let lambda = lambda.clamp(0.0, 1.0);

    let mut pool: Vec<(RetrievedDoc, HashSet<String>)> = candidates
        .into_iter()
        .map(|doc| {
            let tokens = token_set(&doc.content);
            (doc, tokens)
        })
        .collect();

    let mut selected_tokens: Vec<HashSet<String>> = Vec::new();
    let mut selected: Vec<RetrievedDoc> = Vec::new();

    let (first, first_tokens) = pool.remove(0);
    selected.push(first);
    selected_tokens.push(first_tokens);

    while selected.len() < k && !pool.is_empty() {
        let mut best_index = 0;
        let mut best_score = f32::NEG_INFINITY;
        for (index, (doc, tokens)) in pool.iter().enumerate() {
            let relevance = doc.score.unwrap_or(0.0);
            let redundancy = selected_tokens
                .iter()
                .map(|chosen| jaccard(tokens, chosen))
                .fold(0.0f32, f32::max);
            let score = lambda * relevance - (1.0 - lambda) * redundancy;
            if score > best_score {
                best_score = score;
                best_index = index;
            }
        }
        let (doc, tokens) = pool.remove(best_index);
        selected.push(doc);
        selected_tokens.push(tokens);
    }

    selected
}

/// Jaccard similarity of two token sets; empty sets overlap with nothing.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}
