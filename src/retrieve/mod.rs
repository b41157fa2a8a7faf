//! Hybrid retrieval
//!
//! Three signals per query, fused into one ranking:
//! 1. lexical — FTS/BM25 hits, min-max normalized over the returned set
//! 2. vector — cosine between the query embedding and stored vectors
//! 3. graph — one-hop expansion from the seed set; a walked neighbour
//!    inherits `edge.weight × parent_score × decay`
//!
//! Fused score is `α·lex + β·vec + γ·graph`. Ties break on newer
//! `created`, then lexicographic id, so rankings are stable.

mod filters;

pub use filters::{parse_query, QueryFilters};

use crate::config::EngramConfig;
use crate::embed::{cosine_similarity, embed_one, Embedder};
use crate::engine::{EngineError, EngineResult};
use crate::graph::{Edge, NoteId, NoteNode};
use crate::link::{normalize_entity, normalize_tag};
use crate::llm::AuditedLlm;
use crate::storage::SqliteStore;
use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-signal contributions to a fused score.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Signals {
    pub lex: f64,
    pub vec: f64,
    pub graph: f64,
}

/// One ranked search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: NoteId,
    pub path: String,
    /// Highlighted FTS excerpt, when the lexical phase matched
    pub snippet: Option<String>,
    pub score: f64,
    pub title: String,
    pub created: DateTime<FixedOffset>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<i64>,
    pub signals: Signals,
    /// Edges that carried any graph contribution into this hit
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub via_edges: Vec<Edge>,
}

/// Hybrid retriever over the note graph. Strictly read-only.
pub struct Retriever {
    store: Arc<SqliteStore>,
    llm: Arc<AuditedLlm>,
    embedder: Arc<dyn Embedder>,
    config: Arc<EngramConfig>,
}

impl Retriever {
    pub fn new(
        store: Arc<SqliteStore>,
        llm: Arc<AuditedLlm>,
        embedder: Arc<dyn Embedder>,
        config: Arc<EngramConfig>,
    ) -> Self {
        Self {
            store,
            llm,
            embedder,
            config,
        }
    }

    /// Natural-language entry point: extract filters first, then run
    /// the filtered hybrid search.
    pub async fn search_natural(&self, query: &str, limit: usize) -> EngineResult<Vec<SearchHit>> {
        let filters = parse_query(&self.llm, query).await;
        self.search(query, limit, &filters).await
    }

    /// Hybrid search with explicit filters.
    #[tracing::instrument(skip_all, fields(query = query, limit = limit))]
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        filters: &QueryFilters,
    ) -> EngineResult<Vec<SearchHit>> {
        let k = self.config.retrieval_k;
        let effective_query = filters.text_query.as_deref().unwrap_or(query);

        // Candidate metadata for filtering and tie-breaks
        let nodes: HashMap<NoteId, NoteNode> = self
            .store
            .list_nodes(None)?
            .into_iter()
            .map(|n| (n.id.clone(), n))
            .collect();
        let passes = |id: &NoteId| -> bool {
            nodes
                .get(id)
                .map(|n| matches_filters(n, filters))
                .unwrap_or(false)
        };

        // Phase 1: lexical
        let fts_hits = self
            .store
            .fts_search(effective_query, k, filters.status.as_deref())?;
        let mut snippets: HashMap<NoteId, String> = HashMap::new();
        let mut lex_scores: HashMap<NoteId, f64> = HashMap::new();
        {
            let kept: Vec<_> = fts_hits
                .into_iter()
                .filter(|hit| passes(&hit.id))
                .collect();
            // BM25: lower rank is better; min-max flips it into [0, 1]
            let min = kept.iter().map(|h| h.bm25).fold(f64::INFINITY, f64::min);
            let max = kept
                .iter()
                .map(|h| h.bm25)
                .fold(f64::NEG_INFINITY, f64::max);
            for hit in kept {
                let normalized = if (max - min).abs() < f64::EPSILON {
                    1.0
                } else {
                    (max - hit.bm25) / (max - min)
                };
                lex_scores.insert(hit.id.clone(), normalized);
                snippets.insert(hit.id, hit.snippet);
            }
        }

        // Phase 2: vector
        let mut vec_scores: HashMap<NoteId, f64> = HashMap::new();
        if let Some(query_vector) = self.embed_query(effective_query).await? {
            let mut scored: Vec<(NoteId, f64)> = self
                .store
                .load_embeddings()?
                .into_iter()
                .filter(|(id, _)| passes(id))
                .map(|(id, vector)| {
                    let similarity = cosine_similarity(&query_vector, &vector) as f64;
                    (id, similarity)
                })
                .filter(|(_, similarity)| *similarity > 0.0)
                .collect();
            scored.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.0.cmp(&b.0))
            });
            vec_scores.extend(scored.into_iter().take(k));
        }

        // Phase 3: graph expansion from the seed union
        let weights = self.config.fusion;
        let seed_score = |id: &NoteId| -> f64 {
            weights.lexical * lex_scores.get(id).copied().unwrap_or(0.0)
                + weights.vector * vec_scores.get(id).copied().unwrap_or(0.0)
        };
        let seeds: Vec<NoteId> = lex_scores
            .keys()
            .chain(vec_scores.keys())
            .cloned()
            .collect::<std::collections::HashSet<_>>()
            .into_iter()
            .collect();
        let mut graph_scores: HashMap<NoteId, f64> = HashMap::new();
        let mut via_edges: HashMap<NoteId, Vec<Edge>> = HashMap::new();
        for seed in &seeds {
            let parent = seed_score(seed);
            if parent <= 0.0 {
                continue;
            }
            for edge in self.store.get_edges(seed, None)? {
                let Some(neighbor) = edge.other_endpoint(seed).cloned() else {
                    continue;
                };
                // Filters narrow the whole fusion pool, walked
                // neighbours included
                if !passes(&neighbor) {
                    continue;
                }
                let contribution = edge.weight * parent * self.config.graph_decay;
                let entry = graph_scores.entry(neighbor.clone()).or_default();
                if contribution > *entry {
                    *entry = contribution;
                }
                via_edges.entry(neighbor).or_default().push(edge);
            }
        }

        // Fuse, rank, cut
        let mut candidates: std::collections::HashSet<NoteId> = graph_scores.keys().cloned().collect();
        candidates.extend(seeds);
        let mut hits: Vec<SearchHit> = candidates
            .into_iter()
            .filter_map(|id| {
                let node = nodes.get(&id)?;
                let signals = Signals {
                    lex: lex_scores.get(&id).copied().unwrap_or(0.0),
                    vec: vec_scores.get(&id).copied().unwrap_or(0.0),
                    graph: graph_scores.get(&id).copied().unwrap_or(0.0),
                };
                let score = weights.lexical * signals.lex
                    + weights.vector * signals.vec
                    + weights.graph * signals.graph;
                Some(SearchHit {
                    id: id.clone(),
                    path: node.file_path.clone(),
                    snippet: snippets.get(&id).cloned(),
                    score,
                    title: node.title.clone(),
                    created: node.created,
                    cluster_id: node.cluster_id,
                    signals,
                    via_edges: via_edges.get(&id).cloned().unwrap_or_default(),
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.created.cmp(&a.created))
                .then_with(|| a.id.cmp(&b.id))
        });
        match filters.sort.as_deref() {
            Some("recent") => hits.sort_by(|a, b| b.created.cmp(&a.created)),
            Some("oldest") => hits.sort_by(|a, b| a.created.cmp(&b.created)),
            _ => {}
        }
        hits.truncate(limit);
        Ok(hits)
    }

    async fn embed_query(&self, query: &str) -> EngineResult<Option<Vec<f32>>> {
        let embedder = self.embedder.clone();
        let owned = query.to_string();
        tokio::task::spawn_blocking(move || embed_one(embedder.as_ref(), &owned))
            .await
            .map_err(|e| EngineError::Config(format!("embedding task panicked: {}", e)))?
            .map_err(EngineError::Embedding)
    }
}

/// Whether a node satisfies every present filter. Absent filters are
/// wildcards; a present filter with no match excludes the node.
fn matches_filters(node: &NoteNode, filters: &QueryFilters) -> bool {
    if let Some(person) = &filters.person {
        let wanted = normalize_entity(person);
        if !node.who.iter().any(|w| normalize_entity(w) == wanted) {
            return false;
        }
    }
    if let Some(entity) = &filters.entity {
        let wanted = normalize_entity(entity);
        let in_entities = node
            .what
            .iter()
            .chain(node.where_.iter())
            .any(|e| normalize_entity(e) == wanted);
        let wanted_tag = normalize_tag(entity);
        let in_tags = node.tags.iter().any(|t| normalize_tag(t) == wanted_tag);
        if !in_entities && !in_tags {
            return false;
        }
    }
    if let Some(emotion) = &filters.emotion {
        if !node.text.to_lowercase().contains(&emotion.to_lowercase()) {
            return false;
        }
    }
    if let Some(context) = &filters.context {
        let matched = match context.as_str() {
            "tasks" => node.status.is_some(),
            other => node.tags.iter().any(|t| normalize_tag(t) == normalize_tag(other)),
        };
        if !matched {
            return false;
        }
    }
    if let Some(status) = &filters.status {
        if node.status.as_deref() != Some(status.as_str()) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NoteId, NoteNode};
    use chrono::DateTime;

    fn node(id: &str) -> NoteNode {
        NoteNode::new(
            NoteId::from(id),
            "Felt excited pairing with Sarah on FAISS",
            DateTime::parse_from_rfc3339("2025-10-21T09:00:00-07:00").unwrap(),
        )
    }

    #[test]
    fn wildcard_filters_match_everything() {
        assert!(matches_filters(&node("a"), &QueryFilters::default()));
    }

    #[test]
    fn person_filter_is_case_insensitive() {
        let mut n = node("a");
        n.who = vec!["Sarah".to_string()];
        let filters = QueryFilters {
            person: Some("sarah".to_string()),
            ..Default::default()
        };
        assert!(matches_filters(&n, &filters));

        let filters = QueryFilters {
            person: Some("Tom".to_string()),
            ..Default::default()
        };
        assert!(!matches_filters(&n, &filters));
    }

    #[test]
    fn entity_filter_checks_entities_and_tags() {
        let mut n = node("a");
        n.what = vec!["FAISS".to_string()];
        n.tags = vec!["vector-search".to_string()];
        let by_what = QueryFilters {
            entity: Some("faiss".to_string()),
            ..Default::default()
        };
        assert!(matches_filters(&n, &by_what));
        let by_tag = QueryFilters {
            entity: Some("vector_search".to_string()),
            ..Default::default()
        };
        assert!(matches_filters(&n, &by_tag));
    }

    #[test]
    fn emotion_filter_scans_text() {
        let n = node("a");
        let excited = QueryFilters {
            emotion: Some("Excited".to_string()),
            ..Default::default()
        };
        assert!(matches_filters(&n, &excited));
        let sad = QueryFilters {
            emotion: Some("frustrated".to_string()),
            ..Default::default()
        };
        assert!(!matches_filters(&n, &sad));
    }

    #[test]
    fn context_tasks_requires_a_status() {
        let mut n = node("a");
        let filters = QueryFilters {
            context: Some("tasks".to_string()),
            ..Default::default()
        };
        assert!(!matches_filters(&n, &filters));
        n.status = Some("todo".to_string());
        assert!(matches_filters(&n, &filters));
    }

    #[test]
    fn status_filter_requires_exact_match() {
        let mut n = node("a");
        n.status = Some("todo".to_string());
        let filters = QueryFilters {
            status: Some("done".to_string()),
            ..Default::default()
        };
        assert!(!matches_filters(&n, &filters));
    }
}
