//! Ingest pipeline — the only write path for new notes
//!
//! Foreground sequence: extract episodic metadata, embed, extract
//! prospective items, then persist node + edges + tag registrations in
//! one writer transaction. Readers never observe a note without its
//! edges; a failure after extraction rolls the whole commit back.
//!
//! Background variant: a placeholder node (title = first line) is
//! committed immediately and a worker fills in metadata, embedding and
//! edges afterwards. The worker's update is idempotent and marks the
//! note for review when the provider times out.

use crate::config::EngramConfig;
use crate::embed::{embed_one, Embedder};
use crate::engine::{EngineError, EngineResult};
use crate::extract::{extract_episodic, EpisodicRecord};
use crate::graph::{NoteId, NoteNode};
use crate::link::{compute_edges, LinkPolicy};
use crate::llm::{AuditedLlm, LlmError};
use crate::notefile;
use crate::prospective::extract_prospective;
use crate::storage::{with_backoff, SqliteStore, StoreError};
use chrono::{DateTime, FixedOffset};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Result of ingesting one note.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub note_id: NoteId,
    pub title: String,
    pub path: String,
    pub episodic: EpisodicRecord,
}

/// Orchestrates extraction, embedding and linking for new notes.
pub struct Ingestor {
    store: Arc<SqliteStore>,
    llm: Arc<AuditedLlm>,
    embedder: Arc<dyn Embedder>,
    config: Arc<EngramConfig>,
    /// Notes whose background enrichment is still running
    in_flight: DashMap<String, ()>,
}

impl Ingestor {
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
            in_flight: DashMap::new(),
        }
    }

    /// Ingest a note synchronously: extract, embed, link, commit.
    #[tracing::instrument(skip_all, fields(chars = text.len()))]
    pub async fn ingest(
        &self,
        text: &str,
        now: Option<DateTime<FixedOffset>>,
    ) -> EngineResult<IngestOutcome> {
        let created = now.unwrap_or_else(|| chrono::Local::now().fixed_offset());
        let id = NoteId::generate(&created);

        let episodic = extract_episodic(&self.llm, text, created.naive_local()).await?;
        let embedding = self.embed_with_audit(text).await;
        let prospective = extract_prospective(&self.llm, text, &episodic.when).await?;

        let mut node = NoteNode::new(id, text, created);
        apply_episodic(&mut node, &episodic);
        node.embedding = embedding;
        node.prospective = prospective;

        let path = notefile::write_note(&self.config.notes_dir, &node)?;
        node.file_path = path.to_string_lossy().to_string();

        if let Err(err) = self.commit(&node).await {
            // The file belongs to the failed commit; best-effort cleanup
            let _ = std::fs::remove_file(&path);
            return Err(err);
        }

        tracing::info!(note_id = %node.id, title = %node.title, "note ingested");
        Ok(IngestOutcome {
            note_id: node.id,
            title: node.title,
            path: node.file_path,
            episodic,
        })
    }

    /// Ingest with deferred enrichment: commit a placeholder right
    /// away, enrich in a background task.
    pub async fn ingest_background(
        self: &Arc<Self>,
        text: &str,
        now: Option<DateTime<FixedOffset>>,
    ) -> EngineResult<IngestOutcome> {
        let created = now.unwrap_or_else(|| chrono::Local::now().fixed_offset());
        let id = NoteId::generate(&created);

        let mut node = NoteNode::new(id.clone(), text, created);
        let path = notefile::write_note(&self.config.notes_dir, &node)?;
        node.file_path = path.to_string_lossy().to_string();

        let store = self.store.clone();
        let placeholder = node.clone();
        with_backoff(self.config.busy_retries, self.config.busy_backoff, || {
            store.put_node(&placeholder).map(|_| ())
        })
        .await?;

        self.in_flight.insert(id.as_str().to_string(), ());
        let worker = self.clone();
        let worker_text = text.to_string();
        let worker_id = id.clone();
        tokio::spawn(async move {
            if let Err(err) = worker.enrich(&worker_id, &worker_text, created).await {
                tracing::warn!(note_id = %worker_id, %err, "background enrichment failed");
            }
            worker.in_flight.remove(worker_id.as_str());
        });

        Ok(IngestOutcome {
            note_id: node.id,
            title: node.title,
            path: node.file_path,
            episodic: EpisodicRecord::default(),
        })
    }

    /// Whether any background enrichment is still running.
    pub fn has_pending_work(&self) -> bool {
        !self.in_flight.is_empty()
    }

    /// Block until all background enrichment finishes (test helper and
    /// shutdown path).
    pub async fn drain_background(&self) {
        while self.has_pending_work() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Set or clear a note's task status, rewriting its file so the
    /// front-matter stays in step.
    pub async fn set_status(&self, id: &NoteId, status: Option<String>) -> EngineResult<()> {
        let Some(mut node) = self.store.get_node(id)? else {
            return Err(EngineError::NotFound(id.as_str().to_string()));
        };
        node.status = status;
        let path = notefile::write_note(&self.config.notes_dir, &node)?;
        node.file_path = path.to_string_lossy().to_string();
        let store = self.store.clone();
        with_backoff(self.config.busy_retries, self.config.busy_backoff, || {
            store.put_node(&node).map(|_| ())
        })
        .await?;
        Ok(())
    }

    /// Re-embed nodes that were persisted without an embedding and
    /// create the semantic edges they missed. Returns how many nodes
    /// were repaired.
    pub async fn retry_missing_embeddings(&self) -> EngineResult<usize> {
        let nodes = self.store.list_nodes(None)?;
        let mut repaired = 0;
        for node in nodes.into_iter().filter(|n| n.embedding.is_none()) {
            let Some(embedding) = self.embed_with_audit(&node.text).await else {
                continue;
            };
            let mut filled = node;
            filled.embedding = Some(embedding);
            self.relink(&filled).await?;
            repaired += 1;
        }
        Ok(repaired)
    }

    /// Background worker: run the full extraction pipeline and fold
    /// the results into the placeholder node. Safe to re-run; the
    /// version check detects concurrent updates and the fold is
    /// recomputed from the stored row.
    async fn enrich(
        &self,
        id: &NoteId,
        text: &str,
        created: DateTime<FixedOffset>,
    ) -> EngineResult<()> {
        let (episodic, prospective) = match self.extract_all(text, created).await {
            Ok(pair) => pair,
            Err(EngineError::Provider(LlmError::Timeout)) => {
                // Keep the placeholder, flag it for review
                self.mark_needs_review(id, "provider timeout during enrichment")
                    .await?;
                return Ok(());
            }
            Err(other) => return Err(other),
        };
        let embedding = self.embed_with_audit(text).await;

        for attempt in 0..2 {
            let Some(mut node) = self.store.get_node(id)? else {
                return Err(EngineError::NotFound(id.as_str().to_string()));
            };
            apply_episodic(&mut node, &episodic);
            node.embedding = embedding.clone();
            node.prospective = prospective.clone();

            // Refresh the note file; the enriched title may pick a new
            // filename, in which case the placeholder file goes away
            let previous_path = node.file_path.clone();
            let path = notefile::write_note(&self.config.notes_dir, &node)?;
            node.file_path = path.to_string_lossy().to_string();
            if !previous_path.is_empty() && previous_path != node.file_path {
                let _ = std::fs::remove_file(&previous_path);
            }

            match self.commit(&node).await {
                Ok(()) => return Ok(()),
                Err(EngineError::Store(StoreError::Conflict(_))) if attempt == 0 => {
                    tracing::debug!(note_id = %id, "enrichment raced an update, retrying");
                }
                Err(err) => return Err(err),
            }
        }
        Err(EngineError::Store(StoreError::Conflict(id.clone())))
    }

    async fn extract_all(
        &self,
        text: &str,
        created: DateTime<FixedOffset>,
    ) -> EngineResult<(EpisodicRecord, Vec<crate::graph::ProspectiveItem>)> {
        let episodic = extract_episodic(&self.llm, text, created.naive_local()).await?;
        let prospective = extract_prospective(&self.llm, text, &episodic.when).await?;
        Ok((episodic, prospective))
    }

    async fn mark_needs_review(&self, id: &NoteId, reason: &str) -> EngineResult<()> {
        let Some(mut node) = self.store.get_node(id)? else {
            return Err(EngineError::NotFound(id.as_str().to_string()));
        };
        node.needs_review = true;
        node.review_reason = Some(reason.to_string());
        let store = self.store.clone();
        with_backoff(self.config.busy_retries, self.config.busy_backoff, || {
            store.put_node(&node).map(|_| ())
        })
        .await?;
        Ok(())
    }

    /// Embed on the blocking pool; failures degrade to `None` so the
    /// note is still created (a later sweep fills the vector in).
    async fn embed_with_audit(&self, text: &str) -> Option<Vec<f32>> {
        let embedder = self.embedder.clone();
        let owned = text.to_string();
        let started = Instant::now();
        let result = tokio::task::spawn_blocking(move || embed_one(embedder.as_ref(), &owned))
            .await
            .unwrap_or_else(|join_err| {
                Err(crate::embed::EmbeddingError::ModelError(join_err.to_string()))
            });
        match result {
            Ok(embedding) => {
                self.llm
                    .record_operation("embedding", None, started.elapsed(), None);
                embedding
            }
            Err(err) => {
                tracing::warn!(%err, "embedding failed, note stored without vector");
                self.llm.record_operation(
                    "embedding",
                    None,
                    started.elapsed(),
                    Some(err.to_string()),
                );
                None
            }
        }
    }

    /// Persist node + edges + tags in one writer transaction, with
    /// busy retries around the whole commit.
    async fn commit(&self, node: &NoteNode) -> EngineResult<()> {
        let policy = LinkPolicy::from(self.config.as_ref());
        let store = self.store.clone();
        with_backoff(self.config.busy_retries, self.config.busy_backoff, || {
            store.with_writer(|txn| {
                txn.put_node(node)?;
                txn.register_tags(&node.id, &node.tags)?;
                let others = txn.list_nodes(None)?;
                let embeddings = txn.load_embeddings()?;
                let predecessor = txn.latest_before(&node.created, &node.id)?;
                let edges =
                    compute_edges(node, &others, &embeddings, predecessor.as_ref(), &policy);
                for edge in &edges {
                    txn.upsert_edge(edge)?;
                }
                tracing::debug!(note_id = %node.id, edges = edges.len(), "commit");
                Ok(())
            })
        })
        .await?;
        Ok(())
    }

    /// Same commit path, for nodes that already exist (embedding
    /// retries). Reads the current version first.
    async fn relink(&self, node: &NoteNode) -> EngineResult<()> {
        let Some(current) = self.store.get_node(&node.id)? else {
            return Err(EngineError::NotFound(node.id.as_str().to_string()));
        };
        let mut fresh = node.clone();
        fresh.version = current.version;
        self.commit(&fresh).await
    }
}

/// Fold an episodic record into a node.
fn apply_episodic(node: &mut NoteNode, episodic: &EpisodicRecord) {
    node.who = episodic.who.clone();
    node.what = episodic.what.clone();
    node.where_ = episodic.where_.clone();
    node.when = episodic.when.clone();
    node.tags = episodic.tags.clone();
    if !episodic.title.is_empty() {
        node.title = episodic.title.clone();
    }
    node.needs_review = episodic.needs_review;
    node.review_reason = episodic.review_reason.clone();
}
