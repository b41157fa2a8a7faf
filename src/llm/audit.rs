//! Audited LLM wrapper
//!
//! Every model call goes through [`AuditedLlm::invoke_json`]: start the
//! clock, dispatch with a deadline, capture the raw response, parse the
//! JSON payload, and persist an audit row with timing and token counts.
//! Errors are recorded with `success = false` and re-raised. A failure
//! to persist the audit row is logged and swallowed — auditing never
//! breaks the wrapped call.

use super::{extract_json, LlmClient, LlmError};
use crate::graph::NoteId;
use crate::storage::{AuditRecord, SqliteStore};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// LLM client wrapper that records every call in the audit log.
pub struct AuditedLlm {
    client: Arc<dyn LlmClient>,
    store: Arc<SqliteStore>,
    model: String,
    timeout: Duration,
}

impl AuditedLlm {
    pub fn new(
        client: Arc<dyn LlmClient>,
        store: Arc<SqliteStore>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            store,
            model: model.into(),
            timeout,
        }
    }

    /// Invoke the model and parse its response as JSON.
    ///
    /// `note_id` should be set only for notes already persisted; the
    /// audit table references the node row.
    pub async fn invoke_json(
        &self,
        operation: &str,
        note_id: Option<&NoteId>,
        prompt: &str,
    ) -> Result<serde_json::Value, LlmError> {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.timeout, self.client.invoke(operation, prompt))
            .await
            .unwrap_or(Err(LlmError::Timeout));
        let duration_ms = started.elapsed().as_millis() as i64;

        let (raw, tokens_in, tokens_out, result) = match outcome {
            Ok(response) => {
                let parsed = extract_json(&response.text).ok_or_else(|| {
                    LlmError::Parse(format!(
                        "no valid JSON in response: {}",
                        response.text.chars().take(200).collect::<String>()
                    ))
                });
                (
                    response.text.clone(),
                    response.tokens_input,
                    response.tokens_output,
                    parsed,
                )
            }
            Err(err) => (String::new(), None, None, Err(err)),
        };

        let record = AuditRecord {
            id: None,
            note_id: note_id.cloned(),
            operation_type: operation.to_string(),
            created: chrono::Local::now().fixed_offset(),
            model: self.model.clone(),
            duration_ms,
            tokens_input: tokens_in,
            tokens_output: tokens_out,
            prompt_text: prompt.to_string(),
            raw_response: raw,
            parsed_output: result.as_ref().ok().cloned(),
            error: result.as_ref().err().map(|e| e.to_string()),
            success: result.is_ok(),
        };
        if let Err(err) = self.store.insert_audit(&record) {
            tracing::warn!(operation, %err, "audit logging skipped");
        }

        result
    }

    /// Record a non-LLM provider call (e.g. an embedding) in the same
    /// audit log. The caller did the work; this just persists the row.
    pub fn record_operation(
        &self,
        operation: &str,
        note_id: Option<&NoteId>,
        duration: Duration,
        error: Option<String>,
    ) {
        let record = AuditRecord {
            id: None,
            note_id: note_id.cloned(),
            operation_type: operation.to_string(),
            created: chrono::Local::now().fixed_offset(),
            model: self.model.clone(),
            duration_ms: duration.as_millis() as i64,
            tokens_input: None,
            tokens_output: None,
            prompt_text: String::new(),
            raw_response: String::new(),
            parsed_output: None,
            success: error.is_none(),
            error,
        };
        if let Err(err) = self.store.insert_audit(&record) {
            tracing::warn!(operation, %err, "audit logging skipped");
        }
    }
}
