//! Semantic neighbour ranking
//!
//! One pass over the stored embedding matrix: dot products against the
//! query vector (all vectors are unit-norm, so dot product is cosine),
//! threshold filter, then the best K.

use crate::embed::cosine_similarity;
use crate::graph::NoteId;

/// Rank stored embeddings against `query`, returning up to `top_k`
/// `(id, similarity)` pairs with similarity ≥ `threshold`, best first.
/// The query note itself must not appear in `others`.
pub fn semantic_neighbors(
    query: &[f32],
    others: &[(NoteId, Vec<f32>)],
    threshold: f32,
    top_k: usize,
) -> Vec<(NoteId, f32)> {
    let mut scored: Vec<(NoteId, f32)> = others
        .iter()
        .map(|(id, vector)| (id.clone(), cosine_similarity(query, vector)))
        .filter(|(_, similarity)| *similarity >= threshold)
        .collect();
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    scored.truncate(top_k);
    scored
}
