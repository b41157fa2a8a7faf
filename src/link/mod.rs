//! Edge creation for a just-ingested note
//!
//! Computes the full typed edge set between one note and every other
//! note: semantic similarity, shared entities (one edge per who/what/
//! where subtype), tag Jaccard, and chronological adjacency. Pure
//! computation — callers persist the returned edges inside the same
//! writer transaction that inserted the node, so readers never observe
//! a half-linked note.
//!
//! Idempotent by construction: edge identity is `(src, dst, relation)`
//! and weights are recomputed from current state, so re-linking a note
//! reproduces the same edge set.

mod overlap;
mod semantic;

pub use overlap::{normalize_entity, normalize_tag, shared_entities, tag_jaccard};
pub use semantic::semantic_neighbors;

use crate::graph::{Edge, NoteId, NoteNode, Relation};
use serde_json::json;

/// Thresholds and weights the linker applies.
#[derive(Debug, Clone, Copy)]
pub struct LinkPolicy {
    pub semantic_threshold: f32,
    pub semantic_top_k: usize,
    pub tag_jaccard_threshold: f64,
    pub time_edge_weight: f64,
}

impl From<&crate::config::EngramConfig> for LinkPolicy {
    fn from(config: &crate::config::EngramConfig) -> Self {
        Self {
            semantic_threshold: config.semantic_threshold,
            semantic_top_k: config.semantic_top_k,
            tag_jaccard_threshold: config.tag_jaccard_threshold,
            time_edge_weight: config.time_edge_weight,
        }
    }
}

/// Compute all edges for `node`.
///
/// `others` are the already-stored notes (the node itself is ignored
/// if present), `embeddings` the stored vectors of other notes, and
/// `predecessor` the chronologically closest older note.
pub fn compute_edges(
    node: &NoteNode,
    others: &[NoteNode],
    embeddings: &[(NoteId, Vec<f32>)],
    predecessor: Option<&NoteId>,
    policy: &LinkPolicy,
) -> Vec<Edge> {
    let mut edges = Vec::new();

    // Semantic: cosine against every stored embedding, thresholded
    if let Some(query) = &node.embedding {
        let candidates: Vec<(NoteId, Vec<f32>)> = embeddings
            .iter()
            .filter(|(id, _)| id != &node.id)
            .cloned()
            .collect();
        for (other_id, similarity) in semantic_neighbors(
            query,
            &candidates,
            policy.semantic_threshold,
            policy.semantic_top_k,
        ) {
            edges.push(
                Edge::symmetric(
                    node.id.clone(),
                    other_id,
                    Relation::Semantic,
                    similarity as f64,
                    node.created,
                )
                .with_metadata(json!({ "similarity": similarity })),
            );
        }
    }

    for other in others {
        if other.id == node.id {
            continue;
        }
        edges.extend(entity_edges(node, other));
        if let Some(edge) = tag_edge(node, other, policy.tag_jaccard_threshold) {
            edges.push(edge);
        }
    }

    // Time: one directional edge, older note -> this note
    if let Some(prev) = predecessor {
        if prev != &node.id {
            edges.push(
                Edge::directed(
                    prev.clone(),
                    node.id.clone(),
                    Relation::TimeNext,
                    policy.time_edge_weight,
                    node.created,
                )
                .with_metadata(json!({ "kind": "chronological" })),
            );
        }
    }

    edges
}

/// One `entity_link` edge per subtype with a non-empty intersection.
/// Weight is the shared count.
fn entity_edges(node: &NoteNode, other: &NoteNode) -> Vec<Edge> {
    let subtypes: [(&str, &[String], &[String]); 3] = [
        ("who", &node.who, &other.who),
        ("what", &node.what, &other.what),
        ("where", &node.where_, &other.where_),
    ];
    let mut edges = Vec::new();
    for (entity_type, ours, theirs) in subtypes {
        let shared = shared_entities(ours, theirs);
        if shared.is_empty() {
            continue;
        }
        let count = shared.len();
        let metadata = json!({
            "entity_type": entity_type,
            format!("shared_{}", entity_type): shared,
            "count": count,
        });
        edges.push(
            Edge::symmetric(
                node.id.clone(),
                other.id.clone(),
                Relation::EntityLink,
                count as f64,
                node.created,
            )
            .with_metadata(metadata),
        );
    }
    edges
}

/// A `tag_link` edge when Jaccard similarity clears the threshold.
fn tag_edge(node: &NoteNode, other: &NoteNode, threshold: f64) -> Option<Edge> {
    let (similarity, shared) = tag_jaccard(&node.tags, &other.tags);
    if similarity < threshold {
        return None;
    }
    Some(
        Edge::symmetric(
            node.id.clone(),
            other.id.clone(),
            Relation::TagLink,
            similarity,
            node.created,
        )
        .with_metadata(json!({ "shared_tags": shared, "jaccard": similarity })),
    )
}
