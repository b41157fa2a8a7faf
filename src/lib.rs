//! Engram: Episodic Knowledge Graph Engine
//!
//! Ingests short free-form notes and maintains an incrementally built,
//! persistent knowledge graph over them. Each note becomes a node with
//! episodic metadata (who/what/where/when, hashtags, a 384-dim
//! embedding); typed weighted edges connect notes that share meaning,
//! entities, tags, or chronology.
//!
//! # Core Concepts
//!
//! - **Nodes**: one per note, with episodic metadata and an embedding
//! - **Edges**: deterministic `semantic`, `entity_link`, `tag_link`,
//!   `time_next`, plus LLM-judged consolidation links (`related`,
//!   `spawned`, `references`, `contradicts`)
//! - **Hybrid retrieval**: BM25 + cosine + one-hop graph expansion,
//!   fused into a single ranking
//! - **Clusters**: weighted Louvain communities with LLM titles
//!
//! # Example
//!
//! ```no_run
//! use engram::{Engram, EngramConfig, HashEmbedder, MockLlm};
//! use std::sync::Arc;
//!
//! # async fn demo() -> engram::EngineResult<()> {
//! let engine = Engram::init_temporary(
//!     EngramConfig::default(),
//!     Arc::new(MockLlm::new()),
//!     Arc::new(HashEmbedder::new()),
//! )?;
//! let outcome = engine.ingest("Met with Sarah to discuss FAISS", None).await?;
//! println!("ingested {}", outcome.note_id);
//! # Ok(())
//! # }
//! ```

pub mod cluster;
pub mod config;
pub mod consolidate;
pub mod embed;
pub mod engine;
pub mod extract;
pub mod graph;
pub mod ingest;
pub mod link;
pub mod llm;
pub mod notefile;
pub mod prospective;
pub mod retrieve;
pub mod storage;

pub use cluster::{ClusteringReport, ClusterSummary};
pub use config::{EngramConfig, FusionWeights, EMBEDDING_DIMS};
pub use consolidate::{ConsolidationReport, LinkSuggestion, NoteConsolidation};
pub use embed::{cosine_similarity, Embedder, EmbeddingError, HashEmbedder};
#[cfg(feature = "embeddings")]
pub use embed::FastEmbedder;
pub use engine::{Engram, EngineError, EngineResult};
pub use extract::{extract_hashtags, EpisodicRecord};
pub use graph::{Cluster, Edge, NoteId, NoteNode, ProspectiveItem, Relation, TagRecord, TimeKind, TimeRef};
pub use ingest::IngestOutcome;
pub use llm::{AuditedLlm, HttpLlm, LlmClient, LlmError, LlmResponse, MockLlm};
pub use retrieve::{QueryFilters, SearchHit, Signals};
pub use storage::{AuditRecord, AuditStats, FtsHit, SqliteStore, StoreError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
