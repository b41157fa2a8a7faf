//! Consolidation: LLM-judged typed linking
//!
//! Connects a note to established knowledge the deterministic linker
//! cannot judge: the model reads the note next to a shortlist of
//! metadata-overlap candidates and types each worthwhile connection as
//! `related`, `spawned`, `references`, or `contradicts`, with a
//! free-text justification stored in the edge metadata.
//!
//! Candidate discovery is deterministic (shared entities and tags,
//! newest first, capped); only the judgment call goes to the model.
//! Validation keeps the model honest: unknown ids and relation types
//! are discarded, vague justifications are dropped, and at most five
//! links survive per note.

use crate::config::EngramConfig;
use crate::engine::{EngineError, EngineResult};
use crate::graph::{Edge, NoteId, NoteNode, Relation};
use crate::link::{shared_entities, tag_jaccard};
use crate::llm::{prompts, AuditedLlm, LlmError};
use crate::storage::{with_backoff, SqliteStore};
use serde::Serialize;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

/// Most candidates shown to the model per note.
const MAX_CANDIDATES: usize = 10;

/// Most links accepted per note.
const MAX_LINKS: usize = 5;

/// Snippet length shown per candidate.
const SNIPPET_CHARS: usize = 200;

/// Justifications containing these markers are too hedged to keep.
const VAGUE_MARKERS: [&str; 3] = ["might be", "possibly", "unclear"];

/// One accepted link suggestion.
#[derive(Debug, Clone, Serialize)]
pub struct LinkSuggestion {
    pub target: NoteId,
    pub relation: Relation,
    pub reason: String,
}

/// Outcome of consolidating one note.
#[derive(Debug, Clone, Serialize)]
pub struct NoteConsolidation {
    pub note_id: NoteId,
    pub candidates_found: usize,
    pub links_created: usize,
    pub links: Vec<LinkSuggestion>,
}

/// Aggregated outcome of a batch run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsolidationReport {
    pub notes_processed: usize,
    pub notes_with_links: usize,
    pub links_created: usize,
}

/// A shortlisted note with the overlap that earned it a look.
struct Candidate {
    node: NoteNode,
    match_reason: String,
    shared_who: Vec<String>,
    shared_what: Vec<String>,
    shared_where: Vec<String>,
    shared_tags: Vec<String>,
}

impl Candidate {
    fn overlap_total(&self) -> usize {
        self.shared_who.len()
            + self.shared_what.len()
            + self.shared_where.len()
            + self.shared_tags.len()
    }
}

/// Judges and persists typed links between notes.
pub struct Consolidator {
    store: Arc<SqliteStore>,
    llm: Arc<AuditedLlm>,
    config: Arc<EngramConfig>,
}

impl Consolidator {
    pub fn new(store: Arc<SqliteStore>, llm: Arc<AuditedLlm>, config: Arc<EngramConfig>) -> Self {
        Self { store, llm, config }
    }

    /// Consolidate one note: shortlist candidates, ask the model, and
    /// upsert the surviving typed edges (note → target).
    #[tracing::instrument(skip_all, fields(note_id = %id))]
    pub async fn consolidate_note(&self, id: &NoteId) -> EngineResult<NoteConsolidation> {
        let Some(note) = self.store.get_node(id)? else {
            return Err(EngineError::NotFound(id.as_str().to_string()));
        };

        let candidates = self.find_candidates(&note)?;
        if candidates.is_empty() {
            return Ok(NoteConsolidation {
                note_id: note.id,
                candidates_found: 0,
                links_created: 0,
                links: Vec::new(),
            });
        }

        let links = self.suggest_links(&note, &candidates).await?;
        let created = chrono::Local::now().fixed_offset();
        for link in &links {
            let edge = Edge::directed(
                note.id.clone(),
                link.target.clone(),
                link.relation,
                1.0,
                created,
            )
            .with_metadata(serde_json::json!({ "reason": link.reason }));
            let store = self.store.clone();
            with_backoff(self.config.busy_retries, self.config.busy_backoff, || {
                store.upsert_edge(&edge)
            })
            .await?;
        }

        tracing::info!(note_id = %note.id, links = links.len(), "note consolidated");
        Ok(NoteConsolidation {
            note_id: note.id,
            candidates_found: candidates.len(),
            links_created: links.len(),
            links,
        })
    }

    /// Consolidate a batch of notes sequentially. Each note may link
    /// to any other note, earlier batch members included.
    pub async fn consolidate_batch(&self, ids: &[NoteId]) -> EngineResult<ConsolidationReport> {
        let mut report = ConsolidationReport::default();
        for id in ids {
            let outcome = self.consolidate_note(id).await?;
            report.notes_processed += 1;
            if outcome.links_created > 0 {
                report.notes_with_links += 1;
                report.links_created += outcome.links_created;
            }
        }
        Ok(report)
    }

    /// Shortlist other notes by metadata overlap, newest first.
    fn find_candidates(&self, note: &NoteNode) -> EngineResult<Vec<Candidate>> {
        let mut candidates = Vec::new();
        for other in self.store.list_nodes(None)? {
            if other.id == note.id {
                continue;
            }
            let shared_who = shared_entities(&note.who, &other.who);
            let shared_what = shared_entities(&note.what, &other.what);
            let shared_where = shared_entities(&note.where_, &other.where_);
            let (_, shared_tags) = tag_jaccard(&note.tags, &other.tags);

            let match_reason = if let Some(who) = shared_who.first() {
                format!("mentions {}", who)
            } else if let Some(what) = shared_what.first() {
                format!("discusses {}", what)
            } else if let Some(place) = shared_where.first() {
                format!("shares location {}", place)
            } else if let Some(tag) = shared_tags.first() {
                format!("shares tag: {}", tag)
            } else {
                continue;
            };

            candidates.push(Candidate {
                node: other,
                match_reason,
                shared_who,
                shared_what,
                shared_where,
                shared_tags,
            });
            if candidates.len() == MAX_CANDIDATES {
                break;
            }
        }
        Ok(candidates)
    }

    /// One model call over the full shortlist; malformed output yields
    /// no links, a deadline overrun propagates.
    async fn suggest_links(
        &self,
        note: &NoteNode,
        candidates: &[Candidate],
    ) -> EngineResult<Vec<LinkSuggestion>> {
        let block = format_candidates(candidates);
        let prompt = prompts::consolidation(&note.text, &block);
        match self
            .llm
            .invoke_json("consolidation", Some(&note.id), &prompt)
            .await
        {
            Ok(value) => Ok(parse_suggestions(&value, candidates)),
            Err(LlmError::Timeout) => Err(EngineError::Provider(LlmError::Timeout)),
            Err(err) => {
                tracing::warn!(%err, "consolidation judgment failed, creating no links");
                Ok(Vec::new())
            }
        }
    }
}

fn format_candidates(candidates: &[Candidate]) -> String {
    candidates
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let snippet: String = c.node.text.chars().take(SNIPPET_CHARS).collect();
            format!(
                "{}. [{}] {}\n   Snippet: {}\n   Match: {}\n   Overlap: {} shared dimensions ({} people, {} topics, {} places, {} tags)",
                i + 1,
                c.node.id,
                c.node.title,
                snippet,
                c.match_reason,
                c.overlap_total(),
                c.shared_who.len(),
                c.shared_what.len(),
                c.shared_where.len(),
                c.shared_tags.len(),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Validate the model's suggestions against the shortlist: unknown
/// ids, non-consolidation relation types, and hedged reasons are
/// discarded; at most [`MAX_LINKS`] survive.
fn parse_suggestions(value: &serde_json::Value, candidates: &[Candidate]) -> Vec<LinkSuggestion> {
    let valid_ids: HashSet<&str> = candidates.iter().map(|c| c.node.id.as_str()).collect();

    // Accept a bare object as a single-element array
    let items: Vec<serde_json::Value> = match value {
        serde_json::Value::Array(items) => items.clone(),
        serde_json::Value::Object(_) => vec![value.clone()],
        _ => Vec::new(),
    };

    items
        .iter()
        .filter_map(|item| {
            let id = item.get("id")?.as_str()?;
            if !valid_ids.contains(id) {
                return None;
            }
            let relation = Relation::from_str(item.get("link_type")?.as_str()?).ok()?;
            if !relation.is_consolidation() {
                return None;
            }
            let reason = item.get("reason")?.as_str()?.trim().to_string();
            if reason.is_empty() {
                return None;
            }
            let lower = reason.to_lowercase();
            if VAGUE_MARKERS.iter().any(|marker| lower.contains(marker)) {
                return None;
            }
            Some(LinkSuggestion {
                target: NoteId::from_string(id),
                relation,
                reason,
            })
        })
        .take(MAX_LINKS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlm;
    use chrono::DateTime;
    use std::time::Duration;

    fn node(id: &str, created: &str, text: &str) -> NoteNode {
        NoteNode::new(
            NoteId::from(id),
            text,
            DateTime::parse_from_rfc3339(created).unwrap(),
        )
    }

    fn consolidator(mock: MockLlm) -> Consolidator {
        let store = Arc::new(SqliteStore::open_temporary().unwrap());
        let config = Arc::new(EngramConfig::default());
        let llm = Arc::new(AuditedLlm::new(
            Arc::new(mock),
            store.clone(),
            "test-model",
            Duration::from_secs(5),
        ));
        Consolidator::new(store, llm, config)
    }

    fn seed_pair(consolidator: &Consolidator) {
        let mut a = node(
            "a",
            "2025-10-20T09:00:00-07:00",
            "Sarah sketched the proposal outline",
        );
        a.who = vec!["Sarah".to_string()];
        a.tags = vec!["proposal".to_string()];
        let mut b = node(
            "b",
            "2025-10-21T09:00:00-07:00",
            "Action items from the proposal review with Sarah",
        );
        b.who = vec!["Sarah".to_string()];
        b.tags = vec!["proposal".to_string()];
        consolidator.store.put_node(&a).unwrap();
        consolidator.store.put_node(&b).unwrap();
    }

    #[tokio::test]
    async fn candidates_come_from_shared_metadata() {
        let c = consolidator(MockLlm::new());
        seed_pair(&c);
        let note = c.store.get_node(&NoteId::from("b")).unwrap().unwrap();

        let candidates = c.find_candidates(&note).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].node.id.as_str(), "a");
        assert_eq!(candidates[0].match_reason, "mentions Sarah");
        assert_eq!(candidates[0].overlap_total(), 2);
    }

    #[tokio::test]
    async fn notes_without_overlap_are_not_candidates() {
        let c = consolidator(MockLlm::new());
        c.store
            .put_node(&node("a", "2025-10-20T09:00:00-07:00", "pasta recipe"))
            .unwrap();
        c.store
            .put_node(&node("b", "2025-10-21T09:00:00-07:00", "sharding plan"))
            .unwrap();

        let outcome = c.consolidate_note(&NoteId::from("b")).await.unwrap();
        assert_eq!(outcome.candidates_found, 0);
        assert_eq!(outcome.links_created, 0);
        // No candidates means the model is never consulted
        assert_eq!(c.store.audit_stats().unwrap().total_operations, 0);
    }

    #[tokio::test]
    async fn accepted_links_become_typed_edges_with_reasons() {
        let c = consolidator(MockLlm::new().with_response(
            "consolidation",
            r#"[{"id": "a", "link_type": "spawned", "reason": "Action items follow from the outline note"}]"#,
        ));
        seed_pair(&c);

        let outcome = c.consolidate_note(&NoteId::from("b")).await.unwrap();
        assert_eq!(outcome.links_created, 1);
        assert_eq!(outcome.links[0].relation, Relation::Spawned);

        let edges = c
            .store
            .get_edges(&NoteId::from("b"), Some(Relation::Spawned))
            .unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].src.as_str(), "b");
        assert_eq!(edges[0].dst.as_str(), "a");
        assert_eq!(
            edges[0].metadata.as_ref().unwrap()["reason"],
            "Action items follow from the outline note"
        );
    }

    #[tokio::test]
    async fn invalid_suggestions_are_discarded() {
        let c = consolidator(MockLlm::new().with_response(
            "consolidation",
            r#"[
                {"id": "ghost", "link_type": "related", "reason": "solid reason"},
                {"id": "a", "link_type": "semantic", "reason": "wrong relation family"},
                {"id": "a", "link_type": "related", "reason": "might be connected"},
                {"id": "a", "link_type": "related"},
                {"id": "a", "link_type": "contradicts", "reason": "Disputes the outline's scope estimate"}
            ]"#,
        ));
        seed_pair(&c);

        let outcome = c.consolidate_note(&NoteId::from("b")).await.unwrap();
        assert_eq!(outcome.links_created, 1);
        assert_eq!(outcome.links[0].relation, Relation::Contradicts);
    }

    #[tokio::test]
    async fn links_cap_at_five() {
        let day_prefix = "2025-10-0";
        let c = consolidator(MockLlm::new().with_response(
            "consolidation",
            r#"[
                {"id": "n1", "link_type": "related", "reason": "shared project one"},
                {"id": "n2", "link_type": "related", "reason": "shared project two"},
                {"id": "n3", "link_type": "related", "reason": "shared project three"},
                {"id": "n4", "link_type": "related", "reason": "shared project four"},
                {"id": "n5", "link_type": "related", "reason": "shared project five"},
                {"id": "n6", "link_type": "related", "reason": "shared project six"}
            ]"#,
        ));
        for i in 1..=6 {
            let mut n = node(
                &format!("n{}", i),
                &format!("{}{}T09:00:00-07:00", day_prefix, i),
                "planning the alpha rollout",
            );
            n.tags = vec!["alpha".to_string()];
            c.store.put_node(&n).unwrap();
        }
        let mut target = node("z", "2025-10-09T09:00:00-07:00", "alpha rollout retro");
        target.tags = vec!["alpha".to_string()];
        c.store.put_node(&target).unwrap();

        let outcome = c.consolidate_note(&NoteId::from("z")).await.unwrap();
        assert_eq!(outcome.links_created, 5);
    }

    #[tokio::test]
    async fn single_object_response_is_accepted() {
        let c = consolidator(MockLlm::new().with_response(
            "consolidation",
            r#"{"id": "a", "link_type": "references", "reason": "Builds on the proposal outline"}"#,
        ));
        seed_pair(&c);

        let outcome = c.consolidate_note(&NoteId::from("b")).await.unwrap();
        assert_eq!(outcome.links_created, 1);
        assert_eq!(outcome.links[0].relation, Relation::References);
    }

    #[tokio::test]
    async fn model_failure_creates_no_links() {
        let c = consolidator(MockLlm::new().with_failure("consolidation", "down"));
        seed_pair(&c);

        let outcome = c.consolidate_note(&NoteId::from("b")).await.unwrap();
        assert_eq!(outcome.candidates_found, 1);
        assert_eq!(outcome.links_created, 0);
    }

    #[tokio::test]
    async fn batch_accumulates_stats() {
        let c = consolidator(MockLlm::new().with_response(
            "consolidation",
            r#"[{"id": "a", "link_type": "related", "reason": "Same proposal thread"}]"#,
        ));
        seed_pair(&c);

        let report = c
            .consolidate_batch(&[NoteId::from("b")])
            .await
            .unwrap();
        assert_eq!(report.notes_processed, 1);
        assert_eq!(report.notes_with_links, 1);
        assert_eq!(report.links_created, 1);
    }
}
