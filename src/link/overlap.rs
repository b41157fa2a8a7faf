//! Entity and tag overlap math
//!
//! Entity equality is case-insensitive; results keep the original
//! casing of the first argument. Tag equality additionally treats `-`
//! and `_` (and spaces) as equivalent.

use std::collections::{HashMap, HashSet};

/// Normalize an entity for comparison.
pub fn normalize_entity(entity: &str) -> String {
    entity.trim().to_lowercase()
}

/// Normalize a tag for comparison: `ai-research` == `AI Research` == `ai_research`.
pub fn normalize_tag(tag: &str) -> String {
    tag.trim()
        .to_lowercase()
        .replace('-', "_")
        .replace(' ', "_")
}

/// Case-insensitive intersection, returning original casing from `a`.
pub fn shared_entities(a: &[String], b: &[String]) -> Vec<String> {
    if a.is_empty() || b.is_empty() {
        return Vec::new();
    }
    let norm_a: HashMap<String, &String> =
        a.iter().map(|e| (normalize_entity(e), e)).collect();
    let norm_b: HashSet<String> = b.iter().map(|e| normalize_entity(e)).collect();

    let mut shared: Vec<String> = norm_a
        .iter()
        .filter(|(norm, _)| norm_b.contains(*norm))
        .map(|(_, original)| (*original).clone())
        .collect();
    shared.sort();
    shared
}

/// Jaccard similarity between tag sets under normalization.
///
/// Returns `(coefficient, shared_tags)` with shared tags in the
/// casing of `a`.
pub fn tag_jaccard(a: &[String], b: &[String]) -> (f64, Vec<String>) {
    if a.is_empty() || b.is_empty() {
        return (0.0, Vec::new());
    }
    let norm_a: HashMap<String, &String> = a.iter().map(|t| (normalize_tag(t), t)).collect();
    let norm_b: HashSet<String> = b.iter().map(|t| normalize_tag(t)).collect();

    let keys_a: HashSet<&String> = norm_a.keys().collect();
    let keys_b: HashSet<&String> = norm_b.iter().collect();
    let intersection: Vec<&&String> = keys_a.intersection(&keys_b).collect();
    let union_size = keys_a.union(&keys_b).count();

    if union_size == 0 {
        return (0.0, Vec::new());
    }
    let similarity = intersection.len() as f64 / union_size as f64;
    let mut shared: Vec<String> = intersection
        .iter()
        .map(|key| norm_a[**key].clone())
        .collect();
    shared.sort();
    (similarity, shared)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn shared_entities_ignores_case_keeps_original() {
        let shared = shared_entities(&strs(&["Sarah", "FAISS"]), &strs(&["sarah", "Tom"]));
        assert_eq!(shared, vec!["Sarah"]);
    }

    #[test]
    fn shared_entities_empty_inputs_share_nothing() {
        assert!(shared_entities(&[], &strs(&["Sarah"])).is_empty());
        assert!(shared_entities(&strs(&["Sarah"]), &[]).is_empty());
    }

    #[test]
    fn jaccard_matches_hand_computation() {
        // {project/alpha, urgent} vs {project/alpha}: 1 shared / 2 union
        let (sim, shared) = tag_jaccard(
            &strs(&["project/alpha", "urgent"]),
            &strs(&["project/alpha"]),
        );
        assert!((sim - 0.5).abs() < 1e-9);
        assert_eq!(shared, vec!["project/alpha"]);
    }

    #[test]
    fn jaccard_disjoint_sets_is_zero() {
        let (sim, shared) = tag_jaccard(&strs(&["a"]), &strs(&["b"]));
        assert_eq!(sim, 0.0);
        assert!(shared.is_empty());
    }

    #[test]
    fn jaccard_normalizes_separator_variants() {
        let (sim, shared) = tag_jaccard(&strs(&["ai-research"]), &strs(&["ai_research"]));
        assert!((sim - 1.0).abs() < 1e-9);
        assert_eq!(shared, vec!["ai-research"]);
    }

    #[test]
    fn identical_sets_have_similarity_one() {
        let tags = strs(&["a", "b", "c"]);
        let (sim, shared) = tag_jaccard(&tags, &tags);
        assert!((sim - 1.0).abs() < 1e-9);
        assert_eq!(shared.len(), 3);
    }
}
