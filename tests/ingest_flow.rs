//! End-to-end ingest scenarios: extraction, persistence, linking,
//! recovery from embedder failures, background enrichment.

mod common;

use common::{engine_with, engine_with_llm, entity_response, ts, FlakyEmbedder, NO_ENTITIES, NO_PROSPECTIVE};
use engram::{MockLlm, QueryFilters, Relation};
use std::sync::Arc;

fn base_mock() -> MockLlm {
    MockLlm::new().with_response("prospective_extraction", NO_PROSPECTIVE)
}

#[tokio::test]
async fn ingested_note_is_findable_via_fts() {
    let harness = engine_with_llm(base_mock().with_response(
        "entity_extraction",
        entity_response(&["Sarah"], &["FAISS"], &["Café Awesome"], "Coffee with Sarah"),
    ));
    let engine = &harness.engine;

    let outcome = engine
        .ingest(
            "Met with Sarah at Café Awesome to discuss FAISS.",
            Some(ts(21, 9)),
        )
        .await
        .unwrap();
    assert_eq!(outcome.title, "Coffee with Sarah");
    assert!(outcome.path.ends_with(".md"));
    assert!(std::path::Path::new(&outcome.path).exists());

    let hits = engine
        .query("FAISS", 10, &QueryFilters::default())
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, outcome.note_id);
    assert!(hits[0].signals.lex > 0.0);
    assert!(hits[0].snippet.as_deref().unwrap_or("").contains("<b>"));
}

#[tokio::test]
async fn shared_entities_link_notes_per_subtype() {
    let mock = base_mock()
        .with_response(
            "entity_extraction",
            entity_response(&["Sarah"], &["FAISS"], &[], "First note"),
        )
        .with_response(
            "entity_extraction",
            entity_response(&["sarah"], &["faiss"], &[], "Second note"),
        );
    let harness = engine_with_llm(mock);
    let engine = &harness.engine;

    let first = engine
        .ingest("Sarah walked me through FAISS basics.", Some(ts(20, 9)))
        .await
        .unwrap();
    let second = engine
        .ingest("Another deep dive on FAISS with Sarah.", Some(ts(21, 9)))
        .await
        .unwrap();

    let edges = engine
        .store()
        .get_edges(&second.note_id, Some(Relation::EntityLink))
        .unwrap();
    assert_eq!(edges.len(), 2);

    let who = edges
        .iter()
        .find(|e| e.metadata.as_ref().unwrap()["entity_type"] == "who")
        .expect("who edge");
    assert_eq!(who.weight, 1.0);
    assert_eq!(who.metadata.as_ref().unwrap()["shared_who"][0], "sarah");

    let what = edges
        .iter()
        .find(|e| e.metadata.as_ref().unwrap()["entity_type"] == "what")
        .expect("what edge");
    assert_eq!(what.metadata.as_ref().unwrap()["shared_what"][0], "faiss");

    // Symmetric edges store the smaller id first
    for edge in &edges {
        assert!(edge.src <= edge.dst);
        assert_eq!(edge.src, first.note_id);
    }
}

#[tokio::test]
async fn tag_overlap_links_by_jaccard() {
    let harness = engine_with_llm(base_mock().with_response("entity_extraction", NO_ENTITIES));
    let engine = &harness.engine;

    let first = engine
        .ingest("Kickoff notes #project/alpha #urgent", Some(ts(20, 9)))
        .await
        .unwrap();
    let second = engine
        .ingest("Follow-up #project/alpha", Some(ts(21, 9)))
        .await
        .unwrap();
    // Disjoint tags: no tag edge expected
    engine
        .ingest("Totally unrelated #cooking", Some(ts(22, 9)))
        .await
        .unwrap();

    let edges = engine
        .store()
        .get_edges(&second.note_id, Some(Relation::TagLink))
        .unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].src, first.note_id);
    assert!((edges[0].weight - 0.5).abs() < 1e-9);
    assert_eq!(
        edges[0].metadata.as_ref().unwrap()["shared_tags"][0],
        "project/alpha"
    );
}

#[tokio::test]
async fn chronological_neighbours_get_time_edges() {
    let harness = engine_with_llm(base_mock().with_response("entity_extraction", NO_ENTITIES));
    let engine = &harness.engine;

    let first = engine.ingest("morning note", Some(ts(20, 8))).await.unwrap();
    let second = engine.ingest("midday note", Some(ts(20, 12))).await.unwrap();
    let third = engine.ingest("evening note", Some(ts(20, 18))).await.unwrap();

    let edges = engine
        .store()
        .get_edges(&second.note_id, Some(Relation::TimeNext))
        .unwrap();
    assert_eq!(edges.len(), 2);
    // Older -> newer in both hops
    assert!(edges
        .iter()
        .any(|e| e.src == first.note_id && e.dst == second.note_id));
    assert!(edges
        .iter()
        .any(|e| e.src == second.note_id && e.dst == third.note_id));
}

#[tokio::test]
async fn embedder_failure_recovers_on_retry() {
    let embedder = Arc::new(FlakyEmbedder::failing_first(1));
    let harness = engine_with(
        base_mock().with_response("entity_extraction", NO_ENTITIES),
        embedder,
    );
    let engine = &harness.engine;

    let text = "Vector index sharding strategies for FAISS deployments";
    let first = engine.ingest(text, Some(ts(20, 9))).await.unwrap();

    // The embedder failed: node persisted without a vector, no
    // semantic edges
    let stored = engine.store().get_node(&first.note_id).unwrap().unwrap();
    assert!(stored.embedding.is_none());

    let second = engine.ingest(text, Some(ts(21, 9))).await.unwrap();
    assert!(engine
        .store()
        .get_edges(&first.note_id, Some(Relation::Semantic))
        .unwrap()
        .is_empty());

    // The sweep fills the missing embedding and creates the edges
    let repaired = engine.retry_missing_embeddings().await.unwrap();
    assert_eq!(repaired, 1);

    let stored = engine.store().get_node(&first.note_id).unwrap().unwrap();
    assert!(stored.embedding.is_some());
    let semantic = engine
        .store()
        .get_edges(&first.note_id, Some(Relation::Semantic))
        .unwrap();
    assert_eq!(semantic.len(), 1);
    assert!(semantic[0].weight >= 0.99);
    assert!(semantic.iter().all(|e| e.src != e.dst));
    let _ = second;
}

#[tokio::test]
async fn no_self_semantic_edges_are_ever_written() {
    let harness = engine_with_llm(base_mock().with_response("entity_extraction", NO_ENTITIES));
    let engine = &harness.engine;

    let outcome = engine
        .ingest("A note that is very similar to itself", Some(ts(20, 9)))
        .await
        .unwrap();
    let edges = engine.store().get_edges(&outcome.note_id, None).unwrap();
    assert!(edges.iter().all(|e| e.src != e.dst));
}

#[tokio::test]
async fn extraction_failure_flags_note_for_review() {
    let harness = engine_with_llm(
        MockLlm::new()
            .with_response("entity_extraction", "absolutely not json")
            .with_response("prospective_extraction", NO_PROSPECTIVE),
    );
    let engine = &harness.engine;

    let outcome = engine
        .ingest("A note the model could not handle", Some(ts(20, 9)))
        .await
        .unwrap();
    let stored = engine.store().get_node(&outcome.note_id).unwrap().unwrap();
    assert!(stored.needs_review);
    assert!(stored.review_reason.is_some());
    assert!(stored.who.is_empty());
    // The failed call is in the audit log
    let stats = engine.audit_stats().unwrap();
    assert!(stats.failed >= 1);
}

#[tokio::test]
async fn prospective_items_are_stored_on_the_node() {
    let mock = MockLlm::new()
        .with_response(
            "entity_extraction",
            entity_response(&["Sarah"], &[], &[], "Proposal review"),
        )
        .with_response(
            "prospective_extraction",
            r#"{"contains_prospective": true, "prospective_items": [
                {"content": "review proposal", "timedata": "2025-10-24T00:00:00"}
            ]}"#,
        );
    let harness = engine_with_llm(mock);
    let engine = &harness.engine;

    let outcome = engine
        .ingest(
            "Met with Sarah. Need to review proposal by Friday.",
            Some(ts(21, 9)),
        )
        .await
        .unwrap();
    let stored = engine.store().get_node(&outcome.note_id).unwrap().unwrap();
    assert_eq!(stored.prospective.len(), 1);
    assert_eq!(stored.prospective[0].content, "review proposal");
    assert!(stored.prospective[0].timedata.is_some());
}

#[tokio::test]
async fn background_ingest_enriches_placeholder() {
    let harness = engine_with_llm(base_mock().with_response(
        "entity_extraction",
        entity_response(&["Sarah"], &["FAISS"], &[], "Enriched title"),
    ));
    let engine = &harness.engine;

    let outcome = engine
        .ingest_background(
            "Met Sarah to plan the FAISS migration\nmore detail here",
            Some(ts(21, 9)),
        )
        .await
        .unwrap();
    // Placeholder is immediately visible with the first line as title
    assert_eq!(outcome.title, "Met Sarah to plan the FAISS migration");
    let placeholder = engine.store().get_node(&outcome.note_id).unwrap().unwrap();
    assert!(placeholder.who.is_empty());

    let store = engine.store().clone();
    // Wait for the worker by polling the stored node
    for _ in 0..200 {
        let node = store.get_node(&outcome.note_id).unwrap().unwrap();
        if !node.who.is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    let enriched = store.get_node(&outcome.note_id).unwrap().unwrap();
    assert_eq!(enriched.who, vec!["Sarah"]);
    assert_eq!(enriched.title, "Enriched title");
    assert!(enriched.embedding.is_some());
}

#[tokio::test]
async fn status_updates_persist_and_filter_searches() {
    let harness = engine_with_llm(base_mock().with_response("entity_extraction", NO_ENTITIES));
    let engine = &harness.engine;

    let outcome = engine
        .ingest("Review the FAISS proposal", Some(ts(20, 9)))
        .await
        .unwrap();
    engine
        .set_status(&outcome.note_id, Some("todo".to_string()))
        .await
        .unwrap();

    let stored = engine.store().get_node(&outcome.note_id).unwrap().unwrap();
    assert_eq!(stored.status.as_deref(), Some("todo"));

    let filters = QueryFilters {
        status: Some("todo".to_string()),
        ..Default::default()
    };
    assert_eq!(engine.query("FAISS", 10, &filters).await.unwrap().len(), 1);

    let filters = QueryFilters {
        status: Some("done".to_string()),
        ..Default::default()
    };
    assert!(engine.query("FAISS", 10, &filters).await.unwrap().is_empty());
}

#[tokio::test]
async fn deleting_a_note_cascades() {
    let harness = engine_with_llm(base_mock().with_response("entity_extraction", NO_ENTITIES));
    let engine = &harness.engine;

    let first = engine
        .ingest("note one #shared/tag", Some(ts(20, 9)))
        .await
        .unwrap();
    let second = engine
        .ingest("note two #shared/tag", Some(ts(21, 9)))
        .await
        .unwrap();
    assert!(!engine.store().get_edges(&second.note_id, None).unwrap().is_empty());

    assert!(engine.delete_note(&first.note_id).unwrap());
    assert!(engine.store().get_node(&first.note_id).unwrap().is_none());
    let remaining = engine.store().get_edges(&second.note_id, None).unwrap();
    assert!(remaining.iter().all(|e| e.src != first.note_id && e.dst != first.note_id));
}
