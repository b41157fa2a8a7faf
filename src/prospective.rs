//! Prospective item extraction
//!
//! Finds future-facing actions, questions and decisions in a note and
//! binds each to one of the note's already-parsed timepoints, or to
//! nothing. Items are stored as node metadata only; they deliberately
//! create no edges. The model must reuse `parsed` values verbatim —
//! anything it invents is discarded by post-parse validation.

use crate::graph::{ProspectiveItem, TimeRef};
use crate::llm::{prompts, AuditedLlm, LlmError};
use chrono::NaiveDateTime;
use std::collections::HashSet;

/// Extract prospective items from note text.
///
/// Runs after episodic extraction so the parsed `when` list is
/// available. Malformed output degrades to an empty list — a note
/// without prospective items is the common case, not an error — while
/// a deadline overrun propagates like any other provider timeout.
pub async fn extract_prospective(
    llm: &AuditedLlm,
    text: &str,
    when: &[TimeRef],
) -> Result<Vec<ProspectiveItem>, LlmError> {
    let when_json = serde_json::to_string_pretty(when).unwrap_or_else(|_| "[]".to_string());
    let prompt = prompts::prospective_extraction(text, &when_json);

    let value = match llm.invoke_json("prospective_extraction", None, &prompt).await {
        Ok(value) => value,
        Err(LlmError::Timeout) => return Err(LlmError::Timeout),
        Err(err) => {
            tracing::warn!(%err, "prospective extraction failed, storing no items");
            return Ok(Vec::new());
        }
    };

    let valid_times: HashSet<NaiveDateTime> =
        when.iter().filter_map(|tr| tr.parsed).collect();

    let items = value
        .get("prospective_items")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    let kept = items
        .iter()
        .filter_map(|item| {
            let content = item.get("content")?.as_str()?.trim().to_string();
            if content.is_empty() {
                return None;
            }
            let timedata = match item.get("timedata") {
                None | Some(serde_json::Value::Null) => None,
                Some(serde_json::Value::String(s)) => {
                    let parsed = parse_timestamp(s)?;
                    // Timepoints must come from the note's own `when`
                    // list; an invented one invalidates the item.
                    if !valid_times.contains(&parsed) {
                        return None;
                    }
                    Some(parsed)
                }
                Some(_) => return None,
            };
            Some(ProspectiveItem { content, timedata })
        })
        .collect();
    Ok(kept)
}

/// Accept the serialization format of `TimeRef::parsed` with or
/// without fractional seconds.
fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::TimeKind;
    use crate::llm::MockLlm;
    use crate::storage::SqliteStore;
    use chrono::NaiveDate;
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

    fn friday() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 10, 24)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn when_friday() -> Vec<TimeRef> {
        vec![TimeRef {
            original: "Friday".to_string(),
            parsed: Some(friday()),
            kind: TimeKind::Absolute,
        }]
    }

    #[tokio::test]
    async fn items_bind_to_known_timepoints() {
        let llm = audited(MockLlm::new().with_response(
            "prospective_extraction",
            r#"{"contains_prospective": true, "prospective_items": [
                {"content": "review proposal", "timedata": "2025-10-24T00:00:00"}
            ]}"#,
        ));
        let items = extract_prospective(
            &llm,
            "Met with Sarah. Need to review proposal by Friday.",
            &when_friday(),
        )
        .await
        .unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].content, "review proposal");
        assert_eq!(items[0].timedata, Some(friday()));
    }

    #[tokio::test]
    async fn invented_timepoints_invalidate_the_item() {
        let llm = audited(MockLlm::new().with_response(
            "prospective_extraction",
            r#"{"contains_prospective": true, "prospective_items": [
                {"content": "review proposal", "timedata": "2031-01-01T12:00:00"},
                {"content": "ask about budget", "timedata": null}
            ]}"#,
        ));
        let items = extract_prospective(&llm, "note text", &when_friday())
            .await
            .unwrap();

        // The invented timestamp is discarded with its item; the
        // unbound item survives.
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].content, "ask about budget");
        assert_eq!(items[0].timedata, None);
    }

    #[tokio::test]
    async fn llm_failure_yields_no_items() {
        let llm = audited(MockLlm::new().with_failure("prospective_extraction", "down"));
        let items = extract_prospective(&llm, "note text", &when_friday())
            .await
            .unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn empty_content_and_wrong_shapes_are_dropped() {
        let llm = audited(MockLlm::new().with_response(
            "prospective_extraction",
            r#"{"contains_prospective": true, "prospective_items": [
                {"content": "   ", "timedata": null},
                {"content": "valid item", "timedata": 17},
                {"timedata": null},
                {"content": "keep me"}
            ]}"#,
        ));
        let items = extract_prospective(&llm, "note text", &[]).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].content, "keep me");
    }
}
