//! User hashtag extraction
//!
//! Tags are user-controlled taxonomy: parsed straight from the text,
//! no model involved. Grammar: `#name`, `#a/b`, `#a/b/c` — characters
//! `[a-zA-Z0-9_-]`, `/` as hierarchy delimiter, max depth 3. Equality
//! is case-insensitive; tags are stored lowercase.

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

fn hashtag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"#([a-zA-Z0-9_-]+(?:/[a-zA-Z0-9_-]+){0,2})").expect("hashtag regex")
    })
}

fn tag_grammar_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9_-]+(/[a-z0-9_-]+){0,2}$").expect("tag grammar regex")
    })
}

/// Extract hashtags from note text: lowercase, order-preserving,
/// deduplicated.
pub fn extract_hashtags(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut tags = Vec::new();
    for capture in hashtag_re().captures_iter(text) {
        let tag = capture[1].to_lowercase();
        if seen.insert(tag.clone()) {
            tags.push(tag);
        }
    }
    tags
}

/// Whether a (lowercased) tag matches the storage grammar.
pub fn is_valid_tag(tag: &str) -> bool {
    tag_grammar_re().is_match(tag)
}
