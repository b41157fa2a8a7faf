//! Weighted Louvain community detection
//!
//! Modularity maximization over an undirected weighted graph held as
//! dense integer indices with adjacency lists. Deterministic: nodes
//! are visited in index order, ties prefer the lowest community id,
//! and no randomness is involved — repeated runs over the same graph
//! produce the same partition.

use std::collections::HashMap;

/// Undirected weighted graph over dense node indices.
#[derive(Debug, Clone)]
pub struct WeightedGraph {
    adj: Vec<Vec<(usize, f64)>>,
    self_loops: Vec<f64>,
    /// Sum of all edge weights (each undirected edge counted once)
    total_weight: f64,
}

impl WeightedGraph {
    pub fn new(node_count: usize) -> Self {
        Self {
            adj: vec![Vec::new(); node_count],
            self_loops: vec![0.0; node_count],
            total_weight: 0.0,
        }
    }

    pub fn node_count(&self) -> usize {
        self.adj.len()
    }

    /// Add an undirected edge. A self-edge contributes a self-loop.
    pub fn add_edge(&mut self, a: usize, b: usize, weight: f64) {
        if a == b {
            self.self_loops[a] += weight;
        } else {
            self.adj[a].push((b, weight));
            self.adj[b].push((a, weight));
        }
        self.total_weight += weight;
    }

    /// Weighted degree: incident edges plus twice the self-loop.
    fn degree(&self, node: usize) -> f64 {
        self.adj[node].iter().map(|(_, w)| w).sum::<f64>() + 2.0 * self.self_loops[node]
    }
}

/// Partition the graph into communities, returning a compact community
/// id per node (ids are 0..k, numbered by first appearance).
pub fn louvain(graph: &WeightedGraph, resolution: f64) -> Vec<usize> {
    let n = graph.node_count();
    if n == 0 {
        return Vec::new();
    }
    if graph.total_weight <= 0.0 {
        // No edges: every node is its own community
        return (0..n).collect();
    }

    // membership[i] = community of original node i in the current level
    let mut membership: Vec<usize> = (0..n).collect();
    let mut current = graph.clone();

    loop {
        let (assignment, improved) = one_level(&current, resolution);
        let assignment = renumber(&assignment);
        let community_count = assignment.iter().max().map(|m| m + 1).unwrap_or(0);

        for slot in membership.iter_mut() {
            *slot = assignment[*slot];
        }

        if !improved || community_count == current.node_count() {
            break;
        }
        current = aggregate(&current, &assignment, community_count);
    }

    renumber(&membership)
}

/// One local-moving pass: move nodes greedily until a full sweep makes
/// no move. Returns the community assignment and whether anything moved.
fn one_level(graph: &WeightedGraph, resolution: f64) -> (Vec<usize>, bool) {
    let n = graph.node_count();
    let m2 = 2.0 * graph.total_weight;
    let degrees: Vec<f64> = (0..n).map(|i| graph.degree(i)).collect();

    let mut community: Vec<usize> = (0..n).collect();
    let mut community_total: Vec<f64> = degrees.clone();
    let mut improved = false;

    loop {
        let mut moved = false;
        for node in 0..n {
            let home = community[node];
            community_total[home] -= degrees[node];

            // Weight from this node into each neighbouring community
            let mut links: HashMap<usize, f64> = HashMap::new();
            links.insert(home, 0.0);
            for &(neighbor, weight) in &graph.adj[node] {
                *links.entry(community[neighbor]).or_insert(0.0) += weight;
            }

            // Modularity gain of joining community c:
            //   w(node, c) - resolution * tot(c) * deg(node) / 2m
            let mut best_community = home;
            let mut best_gain = links[&home] - resolution * community_total[home] * degrees[node] / m2;
            let mut candidates: Vec<(usize, f64)> = links.into_iter().collect();
            candidates.sort_by_key(|(c, _)| *c);
            for (candidate, weight_in) in candidates {
                let gain =
                    weight_in - resolution * community_total[candidate] * degrees[node] / m2;
                if gain > best_gain + 1e-12 {
                    best_gain = gain;
                    best_community = candidate;
                }
            }

            community_total[best_community] += degrees[node];
            community[node] = best_community;
            if best_community != home {
                moved = true;
                improved = true;
            }
        }
        if !moved {
            break;
        }
    }

    (community, improved)
}

/// Compact community ids to 0..k in order of first appearance.
fn renumber(assignment: &[usize]) -> Vec<usize> {
    let mut mapping: HashMap<usize, usize> = HashMap::new();
    let mut next = 0;
    assignment
        .iter()
        .map(|&c| {
            *mapping.entry(c).or_insert_with(|| {
                let id = next;
                next += 1;
                id
            })
        })
        .collect()
}

/// Condense communities into single nodes, folding intra-community
/// edges into self-loops.
fn aggregate(graph: &WeightedGraph, assignment: &[usize], community_count: usize) -> WeightedGraph {
    let mut condensed = WeightedGraph::new(community_count);
    for node in 0..graph.node_count() {
        if graph.self_loops[node] > 0.0 {
            condensed.add_edge(assignment[node], assignment[node], graph.self_loops[node]);
        }
        for &(neighbor, weight) in &graph.adj[node] {
            // Each undirected edge appears in both adjacency lists;
            // fold it once.
            if node < neighbor {
                condensed.add_edge(assignment[node], assignment[neighbor], weight);
            }
        }
    }
    condensed
}
