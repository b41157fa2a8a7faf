//! On-disk note files: markdown body with YAML front-matter
//!
//! The engine consumes text blobs, but every ingested note is also
//! materialized as a human-editable markdown file. Front-matter keys:
//! `id`, `title`, `created`, `updated` always; `tags`, `status`,
//! `needs_review`, `review_reason`, `entities`, `time_references`,
//! `related_ids` when non-empty. Timestamps are ISO-8601 with offset.

use crate::graph::{NoteNode, TimeRef};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Front-matter of a note file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrontMatter {
    pub id: String,
    pub title: String,
    pub created: String,
    pub updated: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub needs_review: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_reason: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub entities: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub time_references: Vec<TimeRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_ids: Vec<String>,
}

impl FrontMatter {
    /// Build front-matter from a node's current state.
    pub fn from_node(node: &NoteNode) -> Self {
        let mut entities = BTreeMap::new();
        if !node.who.is_empty() {
            entities.insert("who".to_string(), node.who.clone());
        }
        if !node.what.is_empty() {
            entities.insert("what".to_string(), node.what.clone());
        }
        if !node.where_.is_empty() {
            entities.insert("where".to_string(), node.where_.clone());
        }
        let created = node.created.to_rfc3339();
        Self {
            id: node.id.as_str().to_string(),
            title: node.title.clone(),
            created: created.clone(),
            updated: created,
            tags: node.tags.clone(),
            status: node.status.clone(),
            needs_review: node.needs_review,
            review_reason: node.review_reason.clone(),
            entities,
            time_references: node.when.clone(),
            related_ids: Vec::new(),
        }
    }
}

/// Lowercase, hyphen-separated slug for filenames.
pub fn slugify(s: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"[^a-z0-9]+").expect("slug regex"));
    let slug = re
        .replace_all(&s.trim().to_lowercase(), "-")
        .trim_matches('-')
        .to_string();
    if slug.is_empty() {
        "note".to_string()
    } else {
        slug
    }
}

/// `YYYY-MM-DD-<slug>.md`, slug capped at 80 chars.
pub fn pick_filename(title: &str, created_iso: &str) -> String {
    let ymd = &created_iso[..created_iso.len().min(10)];
    let slug: String = slugify(title).chars().take(80).collect();
    format!("{}-{}.md", ymd, slug.trim_end_matches('-'))
}

/// Render a note file: front-matter between `---` lines, then the body.
pub fn render(front: &FrontMatter, body: &str) -> Result<String, serde_yaml::Error> {
    let yaml = serde_yaml::to_string(front)?;
    Ok(format!("---\n{}---\n\n{}\n", yaml, body.trim()))
}

/// Write a note to `dir`, returning the full path.
pub fn write_note(dir: &Path, node: &NoteNode) -> io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let front = FrontMatter::from_node(node);
    let filename = pick_filename(&node.title, &front.created);
    let path = dir.join(filename);
    let content =
        render(&front, &node.text).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    std::fs::write(&path, content)?;
    Ok(path)
}

/// Split a note file into front-matter and body (stripped of the
/// surrounding blank lines).
pub fn parse(content: &str) -> Option<(FrontMatter, String)> {
    let rest = content.strip_prefix("---")?;
    let (yaml, body) = rest.split_once("\n---")?;
    let front: FrontMatter = serde_yaml::from_str(yaml).ok()?;
    Some((front, body.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NoteId, TimeKind};
    use chrono::DateTime;

    fn sample_node() -> NoteNode {
        let mut node = NoteNode::new(
            NoteId::from("2025-10-21T09:00:00-07:00_ab12"),
            "Met with Sarah to discuss FAISS.\n\nShe suggested trying HNSW.",
            DateTime::parse_from_rfc3339("2025-10-21T09:00:00-07:00").unwrap(),
        );
        node.title = "Coffee with Sarah".to_string();
        node.who = vec!["Sarah".to_string()];
        node.tags = vec!["project/alpha".to_string()];
        node.when = vec![TimeRef {
            original: "tomorrow".to_string(),
            parsed: None,
            kind: TimeKind::Relative,
        }];
        node
    }

    #[test]
    fn slugify_normalizes_punctuation_and_case() {
        assert_eq!(slugify("Coffee with Sarah!"), "coffee-with-sarah");
        assert_eq!(slugify("  FAISS & HNSW  "), "faiss-hnsw");
        assert_eq!(slugify("???"), "note");
    }

    #[test]
    fn filename_embeds_date_and_slug() {
        assert_eq!(
            pick_filename("Coffee with Sarah", "2025-10-21T09:00:00-07:00"),
            "2025-10-21-coffee-with-sarah.md"
        );
    }

    #[test]
    fn render_and_parse_round_trip() {
        let node = sample_node();
        let front = FrontMatter::from_node(&node);
        let content = render(&front, &node.text).unwrap();
        assert!(content.starts_with("---\n"));
        assert!(content.contains("id: 2025-10-21T09:00:00-07:00_ab12"));
        assert!(content.ends_with("She suggested trying HNSW.\n"));

        let (parsed, body) = parse(&content).expect("parse back");
        assert_eq!(parsed.id, front.id);
        assert_eq!(parsed.title, "Coffee with Sarah");
        assert_eq!(parsed.tags, vec!["project/alpha"]);
        assert_eq!(parsed.entities["who"], vec!["Sarah"]);
        assert_eq!(parsed.time_references.len(), 1);
        assert_eq!(body, node.text);
    }

    #[test]
    fn optional_fields_are_omitted_when_empty() {
        let mut node = sample_node();
        node.who.clear();
        node.tags.clear();
        node.when.clear();
        let content = render(&FrontMatter::from_node(&node), &node.text).unwrap();
        assert!(!content.contains("entities:"));
        assert!(!content.contains("tags:"));
        assert!(!content.contains("needs_review:"));
        assert!(!content.contains("time_references:"));
    }

    #[test]
    fn write_note_creates_file_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let node = sample_node();
        let path = write_note(dir.path(), &node).unwrap();
        assert!(path.exists());
        let content = std::fs::read_to_string(&path).unwrap();
        let (front, _) = parse(&content).unwrap();
        assert_eq!(front.id, node.id.as_str());
    }

    #[test]
    fn parse_rejects_files_without_front_matter() {
        assert!(parse("just a plain file").is_none());
        assert!(parse("---\nbroken yaml: [").is_none());
    }
}
