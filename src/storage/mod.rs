//! Persistent storage: nodes, edges, clusters, tags, FTS index, audit log

mod sqlite;

pub use sqlite::{SqliteStore, WriterTxn};

use crate::graph::NoteId;
use chrono::{DateTime, FixedOffset};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by storage operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Writer lock could not be acquired within the timeout.
    /// Callers retry with [`with_backoff`].
    #[error("Store busy: writer lock timed out")]
    Busy,

    /// A concurrent writer modified the row between read and write
    #[error("Version conflict on node {0}")]
    Conflict(NoteId),

    #[error("Node not found: {0}")]
    NotFound(String),

    #[error("Embedding has {0} dimensions, expected 384")]
    InvalidEmbedding(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Map a raw SQLite error to [`StoreError`], translating lock timeouts
/// into `Busy` so callers can retry.
pub(crate) fn map_sqlite_error(err: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(code, _) = &err {
        if matches!(
            code.code,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        ) {
            return StoreError::Busy;
        }
    }
    StoreError::Database(err)
}

/// Retry an operation that may hit the writer lock.
///
/// Exponential backoff with jitter, capped per attempt at one second.
/// Only `Busy` is retried; every other error propagates immediately.
pub async fn with_backoff<T>(
    attempts: u32,
    base: Duration,
    mut op: impl FnMut() -> StoreResult<T>,
) -> StoreResult<T> {
    let mut attempt = 0;
    loop {
        match op() {
            Err(StoreError::Busy) if attempt + 1 < attempts => {
                let exp = base.saturating_mul(1 << attempt);
                let jitter_ms = rand::thread_rng().gen_range(0..=base.as_millis() as u64);
                let delay = (exp + Duration::from_millis(jitter_ms)).min(Duration::from_secs(1));
                tracing::debug!(attempt, ?delay, "store busy, backing off");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// One hit from the full-text index
#[derive(Debug, Clone, Serialize)]
pub struct FtsHit {
    pub id: NoteId,
    pub path: String,
    /// Highlighted excerpt around the match
    pub snippet: String,
    /// Raw BM25 rank (lower is better)
    pub bm25: f64,
}

/// A recorded LLM or embedder call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub note_id: Option<NoteId>,
    pub operation_type: String,
    pub created: DateTime<FixedOffset>,
    pub model: String,
    pub duration_ms: i64,
    pub tokens_input: Option<i64>,
    pub tokens_output: Option<i64>,
    pub prompt_text: String,
    pub raw_response: String,
    pub parsed_output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub success: bool,
}

/// Aggregate statistics over the audit log
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditStats {
    pub total_operations: i64,
    pub successful: i64,
    pub failed: i64,
    pub avg_duration_ms: f64,
    pub max_duration_ms: i64,
    pub total_tokens_input: i64,
    pub total_tokens_output: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn backoff_retries_busy_then_succeeds() {
        let mut calls = 0;
        let result = with_backoff(3, Duration::from_millis(1), || {
            calls += 1;
            if calls < 3 {
                Err(StoreError::Busy)
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn backoff_gives_up_after_attempts() {
        let mut calls = 0;
        let result: StoreResult<()> = with_backoff(3, Duration::from_millis(1), || {
            calls += 1;
            Err(StoreError::Busy)
        })
        .await;
        assert!(matches!(result, Err(StoreError::Busy)));
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn backoff_does_not_retry_other_errors() {
        let mut calls = 0;
        let result: StoreResult<()> = with_backoff(3, Duration::from_millis(1), || {
            calls += 1;
            Err(StoreError::NotFound("missing".to_string()))
        })
        .await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
        assert_eq!(calls, 1);
    }
}
