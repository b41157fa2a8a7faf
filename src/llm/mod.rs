//! LLM client abstraction
//!
//! Defines the client trait and response types. Two implementations:
//! - [`http::HttpLlm`]: calls an Ollama-style HTTP endpoint (production)
//! - [`MockLlm`]: returns preconfigured responses keyed by operation (testing)
//!
//! Adapters never depend on how the model is reached; they go through
//! `Arc<dyn LlmClient>` injected at engine init.

pub mod audit;
pub mod http;
pub mod prompts;

pub use audit::AuditedLlm;
pub use http::HttpLlm;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Result of one model invocation.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// Raw completion text
    pub text: String,
    /// Prompt tokens, if the provider reports them
    pub tokens_input: Option<i64>,
    /// Completion tokens, if the provider reports them
    pub tokens_output: Option<i64>,
}

impl LlmResponse {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tokens_input: None,
            tokens_output: None,
        }
    }
}

/// Errors from LLM client operations.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("provider not available: {0}")]
    Unavailable(String),
    #[error("invocation failed: {0}")]
    InvocationFailed(String),
    #[error("call exceeded its deadline")]
    Timeout,
    #[error("response parse error: {0}")]
    Parse(String),
}

/// Client trait for model invocations.
///
/// `operation` names the calling pipeline step (`entity_extraction`,
/// `prospective_extraction`, `cluster_summary`, `search_parse`); the
/// production client ignores it, the mock dispatches on it.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn invoke(&self, operation: &str, prompt: &str) -> Result<LlmResponse, LlmError>;
}

/// Extract a JSON value from LLM response text.
///
/// Models sometimes wrap JSON in markdown code fences or add
/// explanation text. Tries, in order:
/// 1. Direct parse (response is pure JSON)
/// 2. Extract from a ```json ... ``` or ``` ... ``` fenced block
/// 3. The first `{` to last `}` span (or `[`..`]` for arrays)
pub fn extract_json(text: &str) -> Option<serde_json::Value> {
    let trimmed = text.trim();

    if let Ok(v) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if v.is_object() || v.is_array() {
            return Some(v);
        }
    }

    let fenced = if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        after.find("```").map(|end| &after[..end])
    } else if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        after.find("```").map(|end| &after[..end])
    } else {
        None
    };

    if let Some(block) = fenced {
        if let Ok(v) = serde_json::from_str::<serde_json::Value>(block.trim()) {
            if v.is_object() || v.is_array() {
                return Some(v);
            }
        }
    }

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close)) {
            if start < end {
                if let Ok(v) = serde_json::from_str::<serde_json::Value>(&trimmed[start..=end]) {
                    if v.is_object() || v.is_array() {
                        return Some(v);
                    }
                }
            }
        }
    }

    None
}

/// Mock client for testing — returns preconfigured responses.
///
/// Responses are queued per operation; each invocation pops the front,
/// and the last response is kept for repeat calls.
pub struct MockLlm {
    responses: Mutex<HashMap<String, Vec<String>>>,
    failures: Mutex<HashMap<String, String>>,
}

impl MockLlm {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Queue a response for an operation (builder form).
    pub fn with_response(self, operation: impl Into<String>, response: impl Into<String>) -> Self {
        self.queue_response(operation, response);
        self
    }

    /// Queue a response on a client that is already shared with an
    /// engine, e.g. to echo ids that only exist after an ingest.
    pub fn queue_response(&self, operation: impl Into<String>, response: impl Into<String>) {
        self.responses
            .lock()
            .expect("mock lock poisoned")
            .entry(operation.into())
            .or_default()
            .push(response.into());
    }

    /// Register a failure for an operation.
    pub fn with_failure(self, operation: impl Into<String>, message: impl Into<String>) -> Self {
        self.failures
            .lock()
            .expect("mock lock poisoned")
            .insert(operation.into(), message.into());
        self
    }
}

impl Default for MockLlm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn invoke(&self, operation: &str, _prompt: &str) -> Result<LlmResponse, LlmError> {
        if let Some(message) = self.failures.lock().expect("mock lock poisoned").get(operation) {
            return Err(LlmError::InvocationFailed(message.clone()));
        }
        let mut responses = self.responses.lock().expect("mock lock poisoned");
        match responses.get_mut(operation) {
            Some(queue) if !queue.is_empty() => {
                let text = if queue.len() == 1 {
                    queue[0].clone()
                } else {
                    queue.remove(0)
                };
                Ok(LlmResponse::from_text(text))
            }
            _ => Err(LlmError::InvocationFailed(format!(
                "no mock response for operation '{}'",
                operation
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_returns_configured_response() {
        let client = MockLlm::new().with_response("entity_extraction", r#"{"who": []}"#);
        let response = client.invoke("entity_extraction", "prompt").await.unwrap();
        assert_eq!(response.text, r#"{"who": []}"#);
    }

    #[tokio::test]
    async fn mock_pops_queued_responses_and_repeats_last() {
        let client = MockLlm::new()
            .with_response("op", "first")
            .with_response("op", "second");
        assert_eq!(client.invoke("op", "p").await.unwrap().text, "first");
        assert_eq!(client.invoke("op", "p").await.unwrap().text, "second");
        assert_eq!(client.invoke("op", "p").await.unwrap().text, "second");
    }

    #[tokio::test]
    async fn mock_missing_operation_fails() {
        let client = MockLlm::new();
        assert!(matches!(
            client.invoke("unknown", "p").await,
            Err(LlmError::InvocationFailed(_))
        ));
    }

    #[tokio::test]
    async fn mock_registered_failure_propagates() {
        let client = MockLlm::new().with_failure("op", "model exploded");
        assert!(matches!(
            client.invoke("op", "p").await,
            Err(LlmError::InvocationFailed(_))
        ));
    }

    #[test]
    fn extract_json_handles_pure_json() {
        let v = extract_json(r#"{"a": 1}"#).unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn extract_json_handles_fenced_block() {
        let text = "Here you go:\n```json\n{\"who\": [\"Sarah\"]}\n```\nDone.";
        let v = extract_json(text).unwrap();
        assert_eq!(v["who"][0], "Sarah");
    }

    #[test]
    fn extract_json_handles_surrounding_prose() {
        let text = "Sure! The answer is {\"title\": \"Coffee with Sarah\"} as requested.";
        let v = extract_json(text).unwrap();
        assert_eq!(v["title"], "Coffee with Sarah");
    }

    #[test]
    fn extract_json_handles_arrays() {
        let v = extract_json("[{\"id\": \"x\"}]").unwrap();
        assert!(v.is_array());
    }

    #[test]
    fn extract_json_rejects_garbage() {
        assert!(extract_json("no json here").is_none());
        assert!(extract_json("").is_none());
    }
}
