//! Shared test harness
//!
//! Builds an engine over a throwaway store with a mock LLM and the
//! deterministic hashing embedder. Note files land in a temp directory
//! owned by the harness.

// Each integration test binary compiles its own copy; not every test
// uses every helper.
#![allow(dead_code)]

use engram::{Embedder, EmbeddingError, Engram, EngramConfig, HashEmbedder, MockLlm};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Canned response for notes without prospective content.
pub const NO_PROSPECTIVE: &str =
    r#"{"contains_prospective": false, "prospective_items": []}"#;

/// Canned response for notes without extractable entities.
pub const NO_ENTITIES: &str = r#"{"who": [], "what": [], "where": [], "title": ""}"#;

/// Engine plus the temp dir its note files live in.
pub struct TestEngine {
    pub engine: Engram,
    _notes_dir: tempfile::TempDir,
}

/// Build an engine around a preconfigured mock LLM.
pub fn engine_with_llm(mock: MockLlm) -> TestEngine {
    engine_with(mock, Arc::new(HashEmbedder::new()))
}

/// Build an engine around a mock the test keeps a handle to, so
/// responses can be queued after notes (and their ids) exist.
pub fn engine_with_shared_llm(mock: Arc<MockLlm>) -> TestEngine {
    let notes_dir = tempfile::tempdir().expect("temp notes dir");
    let mut config = EngramConfig::default();
    config.notes_dir = notes_dir.path().to_path_buf();
    config.busy_backoff = std::time::Duration::from_millis(1);
    let engine =
        Engram::init_temporary(config, mock, Arc::new(HashEmbedder::new())).expect("engine init");
    TestEngine {
        engine,
        _notes_dir: notes_dir,
    }
}

/// Build an engine with explicit LLM and embedder fakes.
pub fn engine_with(mock: MockLlm, embedder: Arc<dyn Embedder>) -> TestEngine {
    let notes_dir = tempfile::tempdir().expect("temp notes dir");
    let mut config = EngramConfig::default();
    config.notes_dir = notes_dir.path().to_path_buf();
    config.busy_backoff = std::time::Duration::from_millis(1);
    let engine = Engram::init_temporary(config, Arc::new(mock), embedder).expect("engine init");
    TestEngine {
        engine,
        _notes_dir: notes_dir,
    }
}

/// JSON entity-extraction response in the provider's shape.
pub fn entity_response(who: &[&str], what: &[&str], where_: &[&str], title: &str) -> String {
    serde_json::json!({
        "who": who,
        "what": what,
        "where": where_,
        "title": title,
    })
    .to_string()
}

/// RFC3339 timestamp helper: day/hour offsets from a fixed anchor.
pub fn ts(day: u32, hour: u32) -> chrono::DateTime<chrono::FixedOffset> {
    chrono::DateTime::parse_from_rfc3339(&format!(
        "2025-10-{:02}T{:02}:00:00-07:00",
        day, hour
    ))
    .expect("valid timestamp")
}

/// Embedder that fails its first `fail_first` calls, then delegates to
/// the hashing embedder. Exercises the missing-embedding repair path.
pub struct FlakyEmbedder {
    inner: HashEmbedder,
    remaining_failures: AtomicUsize,
}

impl FlakyEmbedder {
    pub fn failing_first(count: usize) -> Self {
        Self {
            inner: HashEmbedder::new(),
            remaining_failures: AtomicUsize::new(count),
        }
    }
}

impl Embedder for FlakyEmbedder {
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let remaining = self.remaining_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.remaining_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(EmbeddingError::ModelError("model warming up".to_string()));
        }
        self.inner.embed_batch(texts)
    }
}
