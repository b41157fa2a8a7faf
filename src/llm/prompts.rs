//! Prompt templates
//!
//! Centralized so extraction behavior can be tuned in one place. All
//! prompts are written for small local models: no few-shot chains that
//! invite hallucination, explicit instruction to return empty arrays
//! when nothing is found, and strict JSON-only output.

/// Entity extraction: who/what/where plus a short title.
pub fn entity_extraction(text: &str, current_date: &str) -> String {
    format!(
        r#"Extract people, topics, and locations from this note.

TODAY'S DATE: {current_date}

NOTE TEXT:
{text}

INSTRUCTIONS:
1. WHO: Extract names of people and organizations mentioned in the note
2. WHAT: Extract specific concepts, technologies, or topics mentioned
3. WHERE: Extract physical places, virtual locations, or meeting contexts
4. TITLE: Generate a short descriptive title (max 10 words)

RULES:
- Only extract entities EXPLICITLY mentioned in the text
- Use empty arrays if nothing found
- Return valid JSON only

OUTPUT FORMAT:
{{
  "who": [],
  "what": [],
  "where": [],
  "title": ""
}}

Your JSON response:"#
    )
}

/// Prospective items: future-facing actions bound to extracted timepoints.
pub fn prospective_extraction(text: &str, when_json: &str) -> String {
    format!(
        r#"Extract future-oriented action items from this note.

NOTE TEXT:
{text}

TIMEPOINTS EXTRACTED:
{when_json}

TASK:
Identify any prospective items (things to do, evaluate, discuss, decide, or questions to answer).

For each prospective item:
1. Provide a brief description of the action/decision/question
2. If the item is associated with a specific timepoint, return the "parsed" timestamp from the TIMEPOINTS above
3. If no specific timepoint is mentioned with the item, use null

OUTPUT FORMAT (JSON only, no explanation):
{{
  "contains_prospective": true/false,
  "prospective_items": [
    {{
      "content": "<action description>",
      "timedata": "<ISO timestamp or null>"
    }}
  ]
}}

RULES:
- Only extract items requiring future action, decision, or answer
- Do NOT extract pure observations or completed past events
- For timedata: use the EXACT "parsed" value from TIMEPOINTS
- If no prospective items found, return {{"contains_prospective": false, "prospective_items": []}}

Return ONLY the JSON object:"#
    )
}

/// Cluster title + summary from sampled notes and aggregated entities.
pub fn cluster_summary(
    size: usize,
    who: &[String],
    what: &[String],
    where_: &[String],
    tags: &[String],
    samples: &[String],
) -> String {
    let join = |items: &[String], cap: usize| -> String {
        if items.is_empty() {
            "None".to_string()
        } else {
            items
                .iter()
                .take(cap)
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        }
    };
    let sample_lines = samples
        .iter()
        .enumerate()
        .map(|(i, text)| format!("{}. {}...", i + 1, text))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        r#"Generate a title and summary for this cluster of {size} related notes.

CLUSTER ENTITIES:
- People/Orgs: {who}
- Topics: {what}
- Locations: {where_}
- Tags: {tags}

SAMPLE NOTES:
{sample_lines}

OUTPUT FORMAT (JSON):
{{
  "title": "3-5 word cluster title",
  "summary": "1-2 sentence description of what these notes are about"
}}

Your JSON response:"#,
        who = join(who, 5),
        what = join(what, 8),
        where_ = join(where_, 5),
        tags = join(tags, 5),
    )
}

/// Consolidation: judge which existing notes a new note should link
/// to, and how. `candidates_block` is the preformatted candidate list
/// (id, title, snippet, match reason, overlap counts).
pub fn consolidation(note_text: &str, candidates_block: &str) -> String {
    format!(
        r#"You are a knowledge graph linker. Analyze connections between notes.

NEW NOTE:
{note_text}

EXISTING NOTES:
{candidates_block}

Task: Which existing notes should link to the new note? Analyze ALL at once.

Link Types:
- related: Discusses same topic/concept
- spawned: New note is follow-up/action from old note
- references: New note builds on old note's idea
- contradicts: New note challenges old note's conclusion

Rules:
1. Only include if CLEAR connection (shared specific concept/person/project/decision)
2. Use the "Overlap" statistics as context - higher overlap suggests stronger potential connection
3. Reason must be specific (not "both mention topics")
4. Max 5 links total (prioritize strongest)
5. Must use exact note ID from brackets above
6. Trust your judgment - if overlap is high but semantic meaning differs, skip it

Return ONLY a JSON array (even if empty or single link):
[
  {{"id": "<note id>", "link_type": "related", "reason": "<specific reason>"}}
]

JSON:"#
    )
}

/// Search query parsing: structured filters from a natural-language query.
pub fn parse_search_query(query: &str) -> String {
    format!(
        r#"You are a search query parser for a note-taking system. Extract structured filters from the natural language query below.

User query: "{query}"

Extract these filters:

- person: Proper name of a person mentioned ("notes with Sarah" -> "Sarah")
- emotion: Feeling or mood word expressed ("notes where I felt excited" -> "excited")
- entity: Specific tool, concept, project, or topic ("notes about FAISS" -> "FAISS")
- context: One of: tasks, meetings, ideas, reference, journal. Only if explicitly mentioned.
- text_query: Core searchable keywords. Remove filler words ("about", "I remember", "what did I"); keep the actual nouns and key terms.
- sort: "recent" or "oldest". Only if explicitly mentioned (recent, latest, newest, oldest, earliest).

RULES:
- Use null for any filter not present in the query
- Never invent values that are not in the query
- Return ONLY a JSON object with exactly these six keys

OUTPUT FORMAT:
{{
  "person": null,
  "emotion": null,
  "entity": null,
  "context": null,
  "text_query": null,
  "sort": null
}}

Your JSON response:"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_prompt_embeds_text_and_date() {
        let prompt = entity_extraction("Met Sarah", "2025-10-21 09:00");
        assert!(prompt.contains("Met Sarah"));
        assert!(prompt.contains("2025-10-21 09:00"));
        assert!(prompt.contains("empty arrays"));
    }

    #[test]
    fn cluster_prompt_formats_entity_lists() {
        let prompt = cluster_summary(
            3,
            &["Sarah".to_string()],
            &[],
            &[],
            &["research".to_string()],
            &["note one".to_string(), "note two".to_string()],
        );
        assert!(prompt.contains("People/Orgs: Sarah"));
        assert!(prompt.contains("Topics: None"));
        assert!(prompt.contains("1. note one..."));
        assert!(prompt.contains("cluster of 3 related notes"));
    }

    #[test]
    fn consolidation_prompt_embeds_note_and_candidates() {
        let prompt = consolidation(
            "Met Sarah about the proposal",
            "1. [2025-10-20T09:00:00-07:00_ab12] Proposal draft\n   Snippet: ...",
        );
        assert!(prompt.contains("Met Sarah about the proposal"));
        assert!(prompt.contains("2025-10-20T09:00:00-07:00_ab12"));
        assert!(prompt.contains("contradicts"));
        assert!(prompt.contains("Max 5 links"));
    }

    #[test]
    fn search_prompt_embeds_query() {
        let prompt = parse_search_query("recent notes with Sarah about FAISS");
        assert!(prompt.contains("recent notes with Sarah about FAISS"));
        assert!(prompt.contains("Never invent values"));
    }
}
