//! Episodic metadata extraction
//!
//! Turns raw note text into who/what/where/when/tags plus a title.
//! Entities and title come from a single LLM call; hashtags and time
//! references are parsed deterministically. The LLM path is built to
//! tolerate noisy output: malformed responses yield an empty record
//! flagged `needs_review` instead of an error.

mod tags;
mod timeparse;

pub use tags::{extract_hashtags, is_valid_tag};
pub use timeparse::extract_time_references;

use crate::graph::{first_line_title, TimeRef};
use crate::llm::{prompts, AuditedLlm, LlmError};
use chrono::NaiveDateTime;

/// Minimum text length below which a note is flagged for review.
const SHORT_TEXT_THRESHOLD: usize = 15;

/// Structured episodic metadata for one note.
#[derive(Debug, Clone, Default)]
pub struct EpisodicRecord {
    pub who: Vec<String>,
    pub what: Vec<String>,
    pub where_: Vec<String>,
    pub when: Vec<TimeRef>,
    pub tags: Vec<String>,
    pub title: String,
    pub needs_review: bool,
    pub review_reason: Option<String>,
}

/// Extract episodic metadata from note text.
///
/// `now` anchors relative time expressions. Malformed model output
/// degrades to empty entity sets with `needs_review` set; only a
/// deadline overrun propagates, so the enclosing commit can roll back.
pub async fn extract_episodic(
    llm: &AuditedLlm,
    text: &str,
    now: NaiveDateTime,
) -> Result<EpisodicRecord, LlmError> {
    let mut record = EpisodicRecord {
        when: extract_time_references(text, now),
        tags: extract_hashtags(text),
        title: first_line_title(text),
        ..Default::default()
    };

    let current_date = now.format("%Y-%m-%d %H:%M").to_string();
    let prompt = prompts::entity_extraction(text, &current_date);
    match llm.invoke_json("entity_extraction", None, &prompt).await {
        Ok(value) => {
            record.who = string_array(&value, "who");
            record.what = string_array(&value, "what");
            record.where_ = string_array(&value, "where");
            if let Some(title) = value.get("title").and_then(|v| v.as_str()) {
                if !title.trim().is_empty() {
                    record.title = title.trim().to_string();
                }
            }
        }
        Err(LlmError::Timeout) => return Err(LlmError::Timeout),
        Err(err) => {
            tracing::warn!(%err, "entity extraction failed, storing empty record");
            record.needs_review = true;
            record.review_reason = Some(format!("entity extraction failed: {}", err));
        }
    }

    if text.trim().len() < SHORT_TEXT_THRESHOLD && !record.needs_review {
        record.needs_review = true;
        record.review_reason = Some("text too short".to_string());
    }

    Ok(record)
}

/// Read a string array field from a dynamic LLM payload. Unknown
/// shapes and non-string elements are discarded; a missing field is an
/// empty set.
fn string_array(value: &serde_json::Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}
