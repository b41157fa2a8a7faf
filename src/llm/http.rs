//! HTTP LLM provider (Ollama-style generate endpoint)
//!
//! One process-wide client with a bounded connection pool; callers
//! share it through `Arc<dyn LlmClient>`. JSON response format is
//! requested so downstream parsing stays simple.

use super::{LlmClient, LlmError, LlmResponse};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Maximum concurrent requests to the provider.
const MAX_CONNECTIONS: usize = 20;
/// Idle sockets kept alive for reuse.
const MAX_IDLE_CONNECTIONS: usize = 10;
/// How long an idle socket stays pooled.
const KEEPALIVE: Duration = Duration::from_secs(30);
/// TCP connect timeout, separate from the per-call deadline.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Wire format of the generate response.
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    prompt_eval_count: Option<i64>,
    #[serde(default)]
    eval_count: Option<i64>,
}

/// Production client for an Ollama-compatible `/api/generate` endpoint.
pub struct HttpLlm {
    client: reqwest::Client,
    base_url: String,
    model: String,
    /// Caps in-flight requests at the pool bound
    permits: Semaphore,
}

impl HttpLlm {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(MAX_IDLE_CONNECTIONS)
            .pool_idle_timeout(KEEPALIVE)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| LlmError::Unavailable(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            permits: Semaphore::new(MAX_CONNECTIONS),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl LlmClient for HttpLlm {
    async fn invoke(&self, _operation: &str, prompt: &str) -> Result<LlmResponse, LlmError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| LlmError::Unavailable("client shut down".to_string()))?;
        let url = format!("{}/api/generate", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "format": "json",
            "options": { "temperature": 0.1 },
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    LlmError::Unavailable(format!("cannot reach provider at {}: {}", url, e))
                } else if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::InvocationFailed(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(LlmError::InvocationFailed(format!(
                "provider returned HTTP {}",
                response.status()
            )));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(format!("malformed provider response: {}", e)))?;

        Ok(LlmResponse {
            text: parsed.response,
            tokens_input: parsed.prompt_eval_count,
            tokens_output: parsed.eval_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_normalized() {
        let client = HttpLlm::new("http://localhost:11434/", "test-model").unwrap();
        assert_eq!(client.base_url, "http://localhost:11434");
        assert_eq!(client.model(), "test-model");
    }

    #[tokio::test]
    async fn unreachable_provider_reports_unavailable() {
        // Port 9 (discard) is essentially never listening
        let client = HttpLlm::new("http://127.0.0.1:9", "test-model").unwrap();
        let err = client.invoke("entity_extraction", "hi").await.unwrap_err();
        assert!(matches!(
            err,
            LlmError::Unavailable(_) | LlmError::InvocationFailed(_)
        ));
    }
}
