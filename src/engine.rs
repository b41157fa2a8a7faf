//! Engine facade
//!
//! Owns the process-wide singletons — store handle, LLM client,
//! embedding model — and wires the pipelines together. Created once by
//! an explicit init call and released by `shutdown()`; tests inject
//! fakes through the same constructor seams.

use crate::cluster::{Clusterer, ClusteringReport};
use crate::config::EngramConfig;
use crate::consolidate::{ConsolidationReport, Consolidator, NoteConsolidation};
use crate::embed::{Embedder, EmbeddingError};
use crate::graph::NoteId;
use crate::ingest::{IngestOutcome, Ingestor};
use crate::llm::{AuditedLlm, LlmClient, LlmError};
use crate::retrieve::{QueryFilters, Retriever, SearchHit};
use crate::storage::{AuditStats, SqliteStore, StoreError};
use chrono::{DateTime, FixedOffset};
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced at the engine boundary.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("provider error: {0}")]
    Provider(#[from] LlmError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Process exit code for CLI entry points: 1 configuration,
    /// 2 storage, 3 external provider.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::Config(_) => 1,
            EngineError::Store(_) | EngineError::NotFound(_) | EngineError::Io(_) => 2,
            EngineError::Provider(_) | EngineError::Embedding(_) => 3,
        }
    }
}

/// Result type at the engine boundary.
pub type EngineResult<T> = Result<T, EngineError>;

/// The assembled engine: one store, one LLM client, one embedding
/// model, shared by every pipeline.
pub struct Engram {
    store: Arc<SqliteStore>,
    ingestor: Arc<Ingestor>,
    retriever: Retriever,
    clusterer: Clusterer,
    consolidator: Consolidator,
}

impl Engram {
    /// Initialize against the configured database path.
    pub fn init(
        config: EngramConfig,
        client: Arc<dyn LlmClient>,
        embedder: Arc<dyn Embedder>,
    ) -> EngineResult<Self> {
        config.validate().map_err(EngineError::Config)?;
        let store = Arc::new(SqliteStore::open(&config.db_path)?);
        Ok(Self::assemble(config, store, client, embedder))
    }

    /// Initialize with a throwaway store (tests).
    pub fn init_temporary(
        config: EngramConfig,
        client: Arc<dyn LlmClient>,
        embedder: Arc<dyn Embedder>,
    ) -> EngineResult<Self> {
        config.validate().map_err(EngineError::Config)?;
        let store = Arc::new(SqliteStore::open_temporary()?);
        Ok(Self::assemble(config, store, client, embedder))
    }

    fn assemble(
        config: EngramConfig,
        store: Arc<SqliteStore>,
        client: Arc<dyn LlmClient>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        let config = Arc::new(config);
        let llm = Arc::new(AuditedLlm::new(
            client,
            store.clone(),
            config.llm_model.clone(),
            config.llm_timeout,
        ));
        let ingestor = Arc::new(Ingestor::new(
            store.clone(),
            llm.clone(),
            embedder.clone(),
            config.clone(),
        ));
        let retriever = Retriever::new(store.clone(), llm.clone(), embedder, config.clone());
        let clusterer = Clusterer::new(store.clone(), llm.clone(), config.clone());
        let consolidator = Consolidator::new(store.clone(), llm, config);
        Self {
            store,
            ingestor,
            retriever,
            clusterer,
            consolidator,
        }
    }

    /// Ingest a note and link it into the graph.
    pub async fn ingest(
        &self,
        text: &str,
        now: Option<DateTime<FixedOffset>>,
    ) -> EngineResult<IngestOutcome> {
        self.ingestor.ingest(text, now).await
    }

    /// Ingest a placeholder immediately, enrich in the background.
    pub async fn ingest_background(
        &self,
        text: &str,
        now: Option<DateTime<FixedOffset>>,
    ) -> EngineResult<IngestOutcome> {
        self.ingestor.ingest_background(text, now).await
    }

    /// Hybrid search with explicit filters.
    pub async fn query(
        &self,
        query: &str,
        limit: usize,
        filters: &QueryFilters,
    ) -> EngineResult<Vec<SearchHit>> {
        self.retriever.search(query, limit, filters).await
    }

    /// Hybrid search with LLM-extracted filters.
    pub async fn query_natural(&self, query: &str, limit: usize) -> EngineResult<Vec<SearchHit>> {
        self.retriever.search_natural(query, limit).await
    }

    /// Recompute clusters and summaries.
    pub async fn run_clustering(&self, resolution: Option<f64>) -> EngineResult<ClusteringReport> {
        self.clusterer.run(resolution).await
    }

    /// LLM-judged typed linking for one note.
    pub async fn consolidate_note(&self, id: &NoteId) -> EngineResult<NoteConsolidation> {
        self.consolidator.consolidate_note(id).await
    }

    /// Consolidate every note created on the same calendar day as
    /// `now` (current clock when omitted).
    pub async fn consolidate_today(
        &self,
        now: Option<DateTime<FixedOffset>>,
    ) -> EngineResult<ConsolidationReport> {
        let now = now.unwrap_or_else(|| chrono::Local::now().fixed_offset());
        let day = now.date_naive();
        let ids: Vec<NoteId> = self
            .store
            .list_nodes(None)?
            .into_iter()
            .filter(|n| n.created.with_timezone(&now.timezone()).date_naive() == day)
            .map(|n| n.id)
            .collect();
        self.consolidator.consolidate_batch(&ids).await
    }

    /// Fill in embeddings (and their semantic edges) for nodes that
    /// were persisted without one.
    pub async fn retry_missing_embeddings(&self) -> EngineResult<usize> {
        self.ingestor.retry_missing_embeddings().await
    }

    /// Set or clear a note's task status.
    pub async fn set_status(&self, id: &NoteId, status: Option<String>) -> EngineResult<()> {
        self.ingestor.set_status(id, status).await
    }

    /// Delete a note and everything hanging off it.
    pub fn delete_note(&self, id: &NoteId) -> EngineResult<bool> {
        Ok(self.store.cascade_delete(id)?)
    }

    /// Aggregate LLM call statistics.
    pub fn audit_stats(&self) -> EngineResult<AuditStats> {
        Ok(self.store.audit_stats()?)
    }

    /// Direct store access (read paths, tests).
    pub fn store(&self) -> &Arc<SqliteStore> {
        &self.store
    }

    /// Wait for background enrichment, then release the singletons.
    pub async fn shutdown(self) {
        self.ingestor.drain_background().await;
    }
}
