//! Node representation: one note in the knowledge graph

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a note.
///
/// Serializes as a plain string. Generated ids embed the creation
/// timestamp (`{rfc3339}_{4 hex}`), so sorting ids lexicographically
/// sorts them by creation time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteId(String);

impl NoteId {
    /// Generate a fresh id anchored at the given creation timestamp.
    pub fn generate(created: &DateTime<FixedOffset>) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!(
            "{}_{}",
            created.to_rfc3339_opts(chrono::SecondsFormat::Secs, false),
            &suffix[..4]
        ))
    }

    /// Create a NoteId from an existing string.
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NoteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NoteId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NoteId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Classification of an extracted time expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeKind {
    /// A concrete date or clock time ("October 21", "3pm")
    Absolute,
    /// Anchored to the current clock ("tomorrow", "next Tuesday")
    Relative,
    /// A span of time ("3 hours", "2 weeks")
    Duration,
    /// A repetition pattern ("weekly", "daily")
    Recurring,
}

impl FromStr for TimeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "absolute" => Ok(TimeKind::Absolute),
            "relative" => Ok(TimeKind::Relative),
            "duration" => Ok(TimeKind::Duration),
            "recurring" => Ok(TimeKind::Recurring),
            _ => Err(format!("Unknown time kind: {}", s)),
        }
    }
}

/// A time expression found in note text.
///
/// `parsed` is a naive local datetime, or `None` when the expression
/// could not be resolved (or deliberately should not be, e.g. a
/// duration describing the past).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeRef {
    /// The literal text span, original casing
    pub original: String,
    /// Resolved local timestamp, if any
    pub parsed: Option<NaiveDateTime>,
    /// Expression classification
    #[serde(rename = "type")]
    pub kind: TimeKind,
}

/// A future-facing action, question, or decision extracted from a note,
/// optionally bound to one of the note's parsed timepoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProspectiveItem {
    /// Brief description of the action/decision/question
    pub content: String,
    /// Timestamp copied verbatim from the note's `when` list, or None
    pub timedata: Option<NaiveDateTime>,
}

/// A note stored as a graph node, carrying episodic metadata.
///
/// `who`/`what`/`where` keep their original casing; equality between
/// notes is case-insensitive (see the linker). `tags` are lowercase
/// hierarchical hashtags (`a/b/c`, max depth 3). The embedding, when
/// present, is a 384-dim unit-norm vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteNode {
    pub id: NoteId,
    /// Full original note body
    pub text: String,
    /// Short descriptive title (LLM-generated or first line)
    pub title: String,
    /// Path of the on-disk note file
    pub file_path: String,
    pub created: DateTime<FixedOffset>,
    pub who: Vec<String>,
    pub what: Vec<String>,
    #[serde(rename = "where")]
    pub where_: Vec<String>,
    pub when: Vec<TimeRef>,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<i64>,
    /// Task status (`todo`, `in_progress`, `done`), when applicable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub needs_review: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_reason: Option<String>,
    #[serde(default)]
    pub prospective: Vec<ProspectiveItem>,
    /// Optimistic-concurrency counter; 0 for a node not yet stored
    #[serde(default)]
    pub version: i64,
}

impl NoteNode {
    /// Create a bare node with the given id, text and creation time.
    /// Metadata starts empty; the ingest pipeline fills it in.
    pub fn new(id: NoteId, text: impl Into<String>, created: DateTime<FixedOffset>) -> Self {
        let text = text.into();
        let title = first_line_title(&text);
        Self {
            id,
            text,
            title,
            file_path: String::new(),
            created,
            who: Vec::new(),
            what: Vec::new(),
            where_: Vec::new(),
            when: Vec::new(),
            tags: Vec::new(),
            embedding: None,
            cluster_id: None,
            status: None,
            needs_review: false,
            review_reason: None,
            prospective: Vec::new(),
            version: 0,
        }
    }
}

/// Fallback title: first line of the text, capped at 60 characters.
pub fn first_line_title(text: &str) -> String {
    let line = text.lines().next().unwrap_or("").trim();
    line.chars().take(60).collect()
}

/// A group of notes produced by community detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: i64,
    /// Short title, at most five words
    pub title: String,
    /// One or two sentence description
    pub summary: String,
    pub size: i64,
}

/// A registered user tag with hierarchy bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagRecord {
    pub id: i64,
    /// Canonical lowercase name, full path form (`project/alpha`)
    pub name: String,
    pub parent_id: Option<i64>,
    /// Hierarchy depth: 0 for `a`, 1 for `a/b`, 2 for `a/b/c`
    pub level: i64,
    pub use_count: i64,
}
