//! Vector similarity for semantic retrieval
//!
//! Scores are cosine similarity (`1 - cosine_distance`). Ranking is
//! deterministic: equal scores keep the order in which candidates were
//! supplied, which callers make newest-first.

use ordered_float::OrderedFloat;

#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Compute cosine similarity between two vectors
///
/// Returns 0.0 for mismatched lengths or zero-norm inputs.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot = dot_product(a, b);
    let norm_a = dot_product(a, a).sqrt();
    let norm_b = dot_product(b, b).sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Keep the `k` highest-scoring candidates, best first
///
/// The sort is stable, so ties resolve by input position.
pub fn top_k<T>(candidates: Vec<(f32, T)>, k: usize) -> Vec<(f32, T)> {
    let mut scored: Vec<(OrderedFloat<f32>, T)> = candidates
        .into_iter()
        .map(|(score, item)| (OrderedFloat(score), item))
        .collect();

    scored.sort_by(|a, b| b.0.cmp(&a.0));

    scored
        .into_iter()
        .take(k)
        .map(|(score, item)| (score.0, item))
        .collect()
}

/// Score every candidate against `query` and keep the top `k`
pub fn top_k_similar<T>(query: &[f32], candidates: Vec<(Vec<f32>, T)>, k: usize) -> Vec<(f32, T)> {
    let scored = candidates
        .into_iter()
        .map(|(vec, item)| (cosine_similarity(query, &vec), item))
        .collect();
    top_k(scored, k)
}
