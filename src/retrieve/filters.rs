//! Natural-language query preprocessing
//!
//! One LLM call turns a free-form query into structured filters that
//! narrow the candidate pool before score fusion. Missing filters are
//! wildcards. The parser never invents values: anything outside the
//! closed filter vocabulary is dropped, and on any failure the query
//! falls through unfiltered.

use crate::llm::{prompts, AuditedLlm};
use serde::{Deserialize, Serialize};

/// Valid `context` filter values.
const CONTEXTS: [&str; 5] = ["tasks", "meetings", "ideas", "reference", "journal"];

/// Structured filters narrowing a search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryFilters {
    /// Person name matched against `who` (case-insensitive)
    pub person: Option<String>,
    /// Feeling word matched against the note text
    pub emotion: Option<String>,
    /// Named thing matched against `what`/`where`/`tags`
    pub entity: Option<String>,
    /// One of tasks/meetings/ideas/reference/journal
    pub context: Option<String>,
    /// Task status filter (`todo`, `in_progress`, `done`)
    pub status: Option<String>,
    /// Replacement keywords for the lexical phase
    pub text_query: Option<String>,
    /// `recent` or `oldest`
    pub sort: Option<String>,
}

impl QueryFilters {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Parse a natural-language query into filters via the LLM.
///
/// Returns wildcard-only filters when the model is unreachable or its
/// output is unusable — retrieval then degrades to plain hybrid search.
pub async fn parse_query(llm: &AuditedLlm, query: &str) -> QueryFilters {
    let prompt = prompts::parse_search_query(query);
    let value = match llm.invoke_json("search_parse", None, &prompt).await {
        Ok(value) => value,
        Err(err) => {
            tracing::debug!(%err, "query filter extraction failed, searching unfiltered");
            return QueryFilters::default();
        }
    };

    let field = |key: &str| -> Option<String> {
        value
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty() && *s != "null")
            .map(str::to_string)
    };

    QueryFilters {
        person: field("person"),
        emotion: field("emotion"),
        entity: field("entity"),
        context: field("context")
            .map(|c| c.to_lowercase())
            .filter(|c| CONTEXTS.contains(&c.as_str())),
        status: None,
        text_query: field("text_query"),
        sort: field("sort")
            .map(|s| s.to_lowercase())
            .filter(|s| s == "recent" || s == "oldest"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlm;
    use crate::storage::SqliteStore;
    use std::sync::Arc;
    use std::time::Duration;

    fn audited(mock: MockLlm) -> AuditedLlm {
        AuditedLlm::new(
            Arc::new(mock),
            Arc::new(SqliteStore::open_temporary().unwrap()),
            "test-model",
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn parses_all_known_filters() {
        let llm = audited(MockLlm::new().with_response(
            "search_parse",
            r#"{"person": "Sarah", "emotion": "excited", "entity": "FAISS",
                "context": "meetings", "text_query": "vector search", "sort": "recent"}"#,
        ));
        let filters = parse_query(&llm, "recent meetings where I was excited about FAISS").await;
        assert_eq!(filters.person.as_deref(), Some("Sarah"));
        assert_eq!(filters.emotion.as_deref(), Some("excited"));
        assert_eq!(filters.entity.as_deref(), Some("FAISS"));
        assert_eq!(filters.context.as_deref(), Some("meetings"));
        assert_eq!(filters.text_query.as_deref(), Some("vector search"));
        assert_eq!(filters.sort.as_deref(), Some("recent"));
    }

    #[tokio::test]
    async fn nulls_and_unknown_values_become_wildcards() {
        let llm = audited(MockLlm::new().with_response(
            "search_parse",
            r#"{"person": null, "emotion": "", "entity": "FAISS",
                "context": "everything", "text_query": "null", "sort": "sideways"}"#,
        ));
        let filters = parse_query(&llm, "notes about FAISS").await;
        assert_eq!(filters.person, None);
        assert_eq!(filters.emotion, None);
        assert_eq!(filters.entity.as_deref(), Some("FAISS"));
        // Out-of-vocabulary context and sort are dropped, not invented
        assert_eq!(filters.context, None);
        assert_eq!(filters.sort, None);
        assert_eq!(filters.text_query, None);
    }

    #[tokio::test]
    async fn parser_failure_searches_unfiltered() {
        let llm = audited(MockLlm::new().with_failure("search_parse", "down"));
        let filters = parse_query(&llm, "anything").await;
        assert!(filters.is_empty());
    }
}
