//! Community detection over the note graph
//!
//! Full recomputation each run: load every node and edge, accumulate
//! edge weights per pair into an undirected graph, partition with
//! weighted Louvain, write assignments and cluster rows back in one
//! commit, then title each cluster via the LLM. Summary failures fall
//! back to a deterministic title from the cluster's most frequent
//! `what` entities, so a cluster row is never left untitled.

mod louvain;

pub use louvain::{louvain, WeightedGraph};

use crate::config::EngramConfig;
use crate::engine::EngineResult;
use crate::graph::{Cluster, NoteId, NoteNode};
use crate::llm::{prompts, AuditedLlm};
use crate::storage::{with_backoff, SqliteStore};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// One cluster in a clustering report.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterSummary {
    pub id: i64,
    pub size: i64,
    pub title: String,
    pub summary: String,
}

/// Outcome of a clustering run.
#[derive(Debug, Clone, Serialize)]
pub struct ClusteringReport {
    pub num_nodes: usize,
    pub num_edges: usize,
    pub num_clusters: usize,
    pub clusters: Vec<ClusterSummary>,
}

/// Regenerates cluster assignments and summaries.
pub struct Clusterer {
    store: Arc<SqliteStore>,
    llm: Arc<AuditedLlm>,
    config: Arc<EngramConfig>,
}

impl Clusterer {
    pub fn new(store: Arc<SqliteStore>, llm: Arc<AuditedLlm>, config: Arc<EngramConfig>) -> Self {
        Self { store, llm, config }
    }

    /// Run the full clustering pipeline.
    #[tracing::instrument(skip_all)]
    pub async fn run(&self, resolution: Option<f64>) -> EngineResult<ClusteringReport> {
        let resolution = resolution.unwrap_or(self.config.cluster_resolution);

        // Dense indexing in sorted-id order keeps runs reproducible
        let mut nodes = self.store.list_nodes(None)?;
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        if nodes.is_empty() {
            return Ok(ClusteringReport {
                num_nodes: 0,
                num_edges: 0,
                num_clusters: 0,
                clusters: Vec::new(),
            });
        }
        let index: HashMap<NoteId, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();

        // Accumulate weights across relations connecting the same pair
        let mut pair_weights: HashMap<(usize, usize), f64> = HashMap::new();
        for edge in self.store.all_edges()? {
            let (Some(&a), Some(&b)) = (index.get(&edge.src), index.get(&edge.dst)) else {
                continue;
            };
            let key = if a <= b { (a, b) } else { (b, a) };
            *pair_weights.entry(key).or_insert(0.0) += edge.weight;
        }
        let num_edges = pair_weights.len();

        let mut graph = WeightedGraph::new(nodes.len());
        for (&(a, b), &weight) in &pair_weights {
            graph.add_edge(a, b, weight);
        }

        let partition = louvain(&graph, resolution);
        let num_clusters = partition.iter().max().map(|m| m + 1).unwrap_or(0);

        // Group members per cluster
        let mut members: Vec<Vec<&NoteNode>> = vec![Vec::new(); num_clusters];
        for (i, node) in nodes.iter().enumerate() {
            members[partition[i]].push(node);
        }

        // Commit assignments plus fallback-titled cluster rows in one
        // sweep, then let the LLM improve titles afterwards.
        let clusters: Vec<Cluster> = members
            .iter()
            .enumerate()
            .map(|(id, nodes)| {
                let (title, summary) = fallback_summary(nodes);
                Cluster {
                    id: id as i64,
                    title,
                    summary,
                    size: nodes.len() as i64,
                }
            })
            .collect();
        let assignments: Vec<(NoteId, i64)> = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.id.clone(), partition[i] as i64))
            .collect();
        let store = self.store.clone();
        with_backoff(self.config.busy_retries, self.config.busy_backoff, || {
            store.with_writer(|txn| txn.replace_clusters(&clusters, &assignments))
        })
        .await?;

        let mut summaries = Vec::with_capacity(num_clusters);
        for cluster in &clusters {
            let cluster_nodes = &members[cluster.id as usize];
            let (title, summary) = match self.llm_summary(cluster_nodes).await {
                Some(pair) => {
                    let store = self.store.clone();
                    with_backoff(self.config.busy_retries, self.config.busy_backoff, || {
                        store.update_cluster_summary(cluster.id, &pair.0, &pair.1)
                    })
                    .await?;
                    pair
                }
                None => (cluster.title.clone(), cluster.summary.clone()),
            };
            summaries.push(ClusterSummary {
                id: cluster.id,
                size: cluster.size,
                title,
                summary,
            });
        }

        tracing::info!(
            nodes = nodes.len(),
            edges = num_edges,
            clusters = num_clusters,
            "clustering complete"
        );
        Ok(ClusteringReport {
            num_nodes: nodes.len(),
            num_edges,
            num_clusters,
            clusters: summaries,
        })
    }

    /// Ask the model for `{title, summary}` over sampled texts and
    /// aggregated entities. `None` on any failure.
    async fn llm_summary(&self, nodes: &[&NoteNode]) -> Option<(String, String)> {
        let mut who = BTreeSet::new();
        let mut what = BTreeSet::new();
        let mut where_ = BTreeSet::new();
        let mut tags = BTreeSet::new();
        for node in nodes {
            who.extend(node.who.iter().cloned());
            what.extend(node.what.iter().cloned());
            where_.extend(node.where_.iter().cloned());
            tags.extend(node.tags.iter().cloned());
        }
        let samples: Vec<String> = nodes
            .iter()
            .take(3)
            .map(|n| n.text.chars().take(200).collect())
            .collect();

        let as_vec = |set: BTreeSet<String>| set.into_iter().collect::<Vec<_>>();
        let prompt = prompts::cluster_summary(
            nodes.len(),
            &as_vec(who),
            &as_vec(what),
            &as_vec(where_),
            &as_vec(tags),
            &samples,
        );

        let value = self
            .llm
            .invoke_json("cluster_summary", None, &prompt)
            .await
            .ok()?;
        let title = value.get("title")?.as_str()?.trim().to_string();
        let summary = value
            .get("summary")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        if title.is_empty() {
            return None;
        }
        Some((title, summary))
    }
}

/// Deterministic fallback: title from the most frequent `what`
/// entities across the cluster.
fn fallback_summary(nodes: &[&NoteNode]) -> (String, String) {
    let mut counts: HashMap<String, (usize, String)> = HashMap::new();
    for node in nodes {
        for what in &node.what {
            let key = what.to_lowercase();
            let entry = counts.entry(key).or_insert((0, what.clone()));
            entry.0 += 1;
        }
    }
    let mut ranked: Vec<(usize, String)> = counts.into_values().collect();
    ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    let top: Vec<String> = ranked.into_iter().take(3).map(|(_, name)| name).collect();

    if top.is_empty() {
        (
            format!("Cluster of {} notes", nodes.len()),
            format!("Cluster of {} related notes", nodes.len()),
        )
    } else {
        (
            top.iter().take(2).cloned().collect::<Vec<_>>().join(", "),
            format!("Notes about {}", top.join(", ")),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NoteId;
    use chrono::DateTime;

    fn node(id: &str, what: &[&str]) -> NoteNode {
        let mut n = NoteNode::new(
            NoteId::from(id),
            "text",
            DateTime::parse_from_rfc3339("2025-10-21T09:00:00-07:00").unwrap(),
        );
        n.what = what.iter().map(|s| s.to_string()).collect();
        n
    }

    #[test]
    fn fallback_title_uses_top_what_entities() {
        let a = node("a", &["FAISS", "HNSW"]);
        let b = node("b", &["FAISS"]);
        let nodes: Vec<&NoteNode> = vec![&a, &b];
        let (title, summary) = fallback_summary(&nodes);
        assert!(title.starts_with("FAISS"));
        assert!(summary.starts_with("Notes about FAISS"));
    }

    #[test]
    fn fallback_without_entities_counts_notes() {
        let a = node("a", &[]);
        let nodes: Vec<&NoteNode> = vec![&a];
        let (title, summary) = fallback_summary(&nodes);
        assert_eq!(title, "Cluster of 1 notes");
        assert!(summary.contains("1 related notes"));
    }
}
