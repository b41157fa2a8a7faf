//! Engine configuration
//!
//! Every tunable threshold lives here with its default. Tests override
//! individual fields; the CLI loads defaults and applies flags on top.

use std::path::PathBuf;
use std::time::Duration;

/// Expected embedding dimensionality (all-MiniLM-class models).
pub const EMBEDDING_DIMS: usize = 384;

/// Relative weights for fusing lexical, vector and graph scores.
#[derive(Debug, Clone, Copy)]
pub struct FusionWeights {
    pub lexical: f64,
    pub vector: f64,
    pub graph: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            lexical: 0.4,
            vector: 0.4,
            graph: 0.2,
        }
    }
}

/// Engine configuration with defaults matching production behavior.
#[derive(Debug, Clone)]
pub struct EngramConfig {
    /// SQLite database file
    pub db_path: PathBuf,
    /// Directory where note markdown files are written
    pub notes_dir: PathBuf,
    /// Base URL of the LLM provider (Ollama-style generate endpoint)
    pub llm_endpoint: String,
    /// Model name passed to the provider
    pub llm_model: String,
    /// Deadline for a single LLM or embedder call
    pub llm_timeout: Duration,
    /// Minimum cosine similarity for a semantic edge
    pub semantic_threshold: f32,
    /// Maximum semantic neighbours considered per note
    pub semantic_top_k: usize,
    /// Minimum Jaccard coefficient for a tag edge
    pub tag_jaccard_threshold: f64,
    /// Weight assigned to chronological-adjacency edges
    pub time_edge_weight: f64,
    /// Per-hop attenuation during graph expansion
    pub graph_decay: f64,
    /// Candidates fetched from each retrieval phase before fusion
    pub retrieval_k: usize,
    /// Score fusion weights
    pub fusion: FusionWeights,
    /// Community detection resolution; higher → more, smaller clusters
    pub cluster_resolution: f64,
    /// Attempts for store operations that hit the writer-lock timeout
    pub busy_retries: u32,
    /// Base delay for the backoff between retries
    pub busy_backoff: Duration,
}

impl Default for EngramConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("engram");
        Self {
            db_path: data_dir.join("engram.db"),
            notes_dir: data_dir.join("notes"),
            llm_endpoint: "http://localhost:11434".to_string(),
            llm_model: "gemma3:4b".to_string(),
            llm_timeout: Duration::from_secs(30),
            semantic_threshold: 0.5,
            semantic_top_k: 20,
            tag_jaccard_threshold: 0.3,
            time_edge_weight: 1.0,
            graph_decay: 0.5,
            retrieval_k: 10,
            fusion: FusionWeights::default(),
            cluster_resolution: 1.0,
            busy_retries: 3,
            busy_backoff: Duration::from_millis(50),
        }
    }
}

impl EngramConfig {
    /// Reject configurations that would silently misbehave.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.semantic_threshold) {
            return Err(format!(
                "semantic_threshold must be in [0, 1], got {}",
                self.semantic_threshold
            ));
        }
        if !(0.0..=1.0).contains(&self.tag_jaccard_threshold) {
            return Err(format!(
                "tag_jaccard_threshold must be in [0, 1], got {}",
                self.tag_jaccard_threshold
            ));
        }
        if self.graph_decay < 0.0 || self.graph_decay > 1.0 {
            return Err(format!(
                "graph_decay must be in [0, 1], got {}",
                self.graph_decay
            ));
        }
        let FusionWeights {
            lexical,
            vector,
            graph,
        } = self.fusion;
        if lexical < 0.0 || vector < 0.0 || graph < 0.0 {
            return Err("fusion weights must be non-negative".to_string());
        }
        if lexical + vector + graph == 0.0 {
            return Err("at least one fusion weight must be positive".to_string());
        }
        if self.cluster_resolution <= 0.0 {
            return Err(format!(
                "cluster_resolution must be positive, got {}",
                self.cluster_resolution
            ));
        }
        if self.retrieval_k == 0 {
            return Err("retrieval_k must be at least 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(EngramConfig::default().validate().is_ok());
    }

    #[test]
    fn out_of_range_thresholds_are_rejected() {
        let mut config = EngramConfig::default();
        config.semantic_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = EngramConfig::default();
        config.cluster_resolution = 0.0;
        assert!(config.validate().is_err());

        let mut config = EngramConfig::default();
        config.fusion = FusionWeights {
            lexical: 0.0,
            vector: 0.0,
            graph: 0.0,
        };
        assert!(config.validate().is_err());
    }
}
