//! Edge representation for the knowledge graph

use super::node::NoteId;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Typed relation between two notes.
///
/// `Semantic`, `EntityLink` and `TagLink` are symmetric and stored with
/// the lexicographically smaller id first. `TimeNext` is directional,
/// older note → newer note. The consolidation relations (`Related`,
/// `Spawned`, `References`, `Contradicts`) are judged by the LLM and
/// directional, consolidated note → existing note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    /// Cosine similarity between embeddings, weight in (0, 1]
    Semantic,
    /// Shared who/what/where entities, weight = shared count
    EntityLink,
    /// Shared hashtags, weight = Jaccard coefficient
    TagLink,
    /// Chronological adjacency, fixed weight
    TimeNext,
    /// Discusses the same topic or concept (LLM-judged)
    Related,
    /// Source note is a follow-up or action from the target (LLM-judged)
    Spawned,
    /// Source note builds on the target's idea (LLM-judged)
    References,
    /// Source note challenges the target's conclusion (LLM-judged)
    Contradicts,
}

impl Relation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::Semantic => "semantic",
            Relation::EntityLink => "entity_link",
            Relation::TagLink => "tag_link",
            Relation::TimeNext => "time_next",
            Relation::Related => "related",
            Relation::Spawned => "spawned",
            Relation::References => "references",
            Relation::Contradicts => "contradicts",
        }
    }

    /// Whether edge direction carries meaning for this relation.
    pub fn is_directional(&self) -> bool {
        !matches!(
            self,
            Relation::Semantic | Relation::EntityLink | Relation::TagLink
        )
    }

    /// Whether this is one of the LLM-judged consolidation relations.
    pub fn is_consolidation(&self) -> bool {
        matches!(
            self,
            Relation::Related | Relation::Spawned | Relation::References | Relation::Contradicts
        )
    }
}

impl FromStr for Relation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "semantic" => Ok(Relation::Semantic),
            "entity_link" => Ok(Relation::EntityLink),
            "tag_link" => Ok(Relation::TagLink),
            "time_next" => Ok(Relation::TimeNext),
            "related" => Ok(Relation::Related),
            "spawned" => Ok(Relation::Spawned),
            "references" => Ok(Relation::References),
            "contradicts" => Ok(Relation::Contradicts),
            _ => Err(format!("Unknown relation: {}", s)),
        }
    }
}

impl std::fmt::Display for Relation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A weighted edge between two notes.
///
/// `(src, dst, relation)` is the identity; writing the same triple
/// again overwrites weight and metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub src: NoteId,
    pub dst: NoteId,
    pub relation: Relation,
    /// Relation-specific strength, non-negative
    pub weight: f64,
    /// Small structured blob (shared items, similarity, kind)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub created: DateTime<FixedOffset>,
}

impl Edge {
    /// Create a symmetric edge; endpoints are normalized so the
    /// lexicographically smaller id becomes `src`.
    pub fn symmetric(
        a: NoteId,
        b: NoteId,
        relation: Relation,
        weight: f64,
        created: DateTime<FixedOffset>,
    ) -> Self {
        debug_assert!(
            !relation.is_directional(),
            "directional relation {} must use Edge::directed",
            relation
        );
        let (src, dst) = if a <= b { (a, b) } else { (b, a) };
        Self {
            src,
            dst,
            relation,
            weight,
            metadata: None,
            created,
        }
    }

    /// Create a directional edge (endpoints kept as given).
    pub fn directed(
        src: NoteId,
        dst: NoteId,
        relation: Relation,
        weight: f64,
        created: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            src,
            dst,
            relation,
            weight,
            metadata: None,
            created,
        }
    }

    /// Attach metadata (builder pattern).
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// The endpoint opposite to `id`, if `id` is one of the endpoints.
    pub fn other_endpoint(&self, id: &NoteId) -> Option<&NoteId> {
        if &self.src == id {
            Some(&self.dst)
        } else if &self.dst == id {
            Some(&self.src)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339("2025-10-21T09:00:00-07:00").unwrap()
    }

    #[test]
    fn symmetric_edge_orders_smaller_id_first() {
        let edge = Edge::symmetric(
            NoteId::from("zzz"),
            NoteId::from("aaa"),
            Relation::Semantic,
            0.8,
            now(),
        );
        assert_eq!(edge.src.as_str(), "aaa");
        assert_eq!(edge.dst.as_str(), "zzz");
    }

    #[test]
    fn directed_edge_keeps_endpoint_order() {
        let edge = Edge::directed(
            NoteId::from("zzz"),
            NoteId::from("aaa"),
            Relation::TimeNext,
            1.0,
            now(),
        );
        assert_eq!(edge.src.as_str(), "zzz");
        assert_eq!(edge.dst.as_str(), "aaa");
    }

    #[test]
    fn relation_round_trips_through_strings() {
        for relation in [
            Relation::Semantic,
            Relation::EntityLink,
            Relation::TagLink,
            Relation::TimeNext,
            Relation::Related,
            Relation::Spawned,
            Relation::References,
            Relation::Contradicts,
        ] {
            assert_eq!(relation.as_str().parse::<Relation>().unwrap(), relation);
        }
        assert!("tangent".parse::<Relation>().is_err());
    }

    #[test]
    fn directionality_splits_the_relation_set() {
        assert!(!Relation::Semantic.is_directional());
        assert!(!Relation::EntityLink.is_directional());
        assert!(!Relation::TagLink.is_directional());
        assert!(Relation::TimeNext.is_directional());
        assert!(Relation::Spawned.is_directional());

        assert!(Relation::Contradicts.is_consolidation());
        assert!(!Relation::TimeNext.is_consolidation());
        assert!(!Relation::Semantic.is_consolidation());
    }

    #[test]
    fn other_endpoint_resolves_both_directions() {
        let edge = Edge::symmetric(
            NoteId::from("a"),
            NoteId::from("b"),
            Relation::TagLink,
            0.5,
            now(),
        );
        assert_eq!(
            edge.other_endpoint(&NoteId::from("a")),
            Some(&NoteId::from("b"))
        );
        assert_eq!(
            edge.other_endpoint(&NoteId::from("b")),
            Some(&NoteId::from("a"))
        );
        assert_eq!(edge.other_endpoint(&NoteId::from("c")), None);
    }
}
