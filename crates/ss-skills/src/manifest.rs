//! AGENTS.md and SKILL.md parsing.
//!
//! AGENTS.md embeds an `<available_skills>` XML block listing the skills a
//! server advertises; SKILL.md carries `---`-delimited `key: value` front
//! matter above the instruction body.  Both formats are line/tag-regular,
//! so they are parsed with a hand-rolled scanner.

use std::collections::HashMap;

use tracing::warn;

/// One `<skill>` element from an AGENTS.md manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestSkill {
    pub name: String,
    pub description: String,
    pub location: String,
}

/// Extract the `<available_skills>` block and parse its `<skill>` children.
/// Entries without a name are skipped; a missing or empty block yields an
/// empty list (logged).
pub fn parse_agents_md(content: &str) -> Vec<ManifestSkill> {
    let Some(block) = section(content, "available_skills") else {
        warn!("no <available_skills> block in AGENTS.md");
        return Vec::new();
    };

    let mut skills = Vec::new();
    let mut rest = block;
    while let Some((skill_block, after)) = next_element(rest, "skill") {
        rest = after;
        let name = tag_text(skill_block, "name").unwrap_or_default();
        if name.is_empty() {
            warn!("manifest <skill> without a <name>, skipped");
            continue;
        }
        skills.push(ManifestSkill {
            name,
            description: tag_text(skill_block, "description").unwrap_or_default(),
            location: tag_text(skill_block, "location").unwrap_or_default(),
        });
    }
    skills
}

/// Split SKILL.md content into `(front-matter fields, body)`.
///
/// The front matter is the block between the first two `---` lines; each
/// line inside is a `key: value` pair (first colon splits).  Returns `None`
/// when the document has no front matter.
pub fn parse_front_matter(content: &str) -> Option<(HashMap<String, String>, String)> {
    let mut lines = content.lines();
    if lines.next().map(str::trim) != Some("---") {
        return None;
    }

    let mut fields = HashMap::new();
    for line in lines.by_ref() {
        if line.trim() == "---" {
            let body: String = lines.collect::<Vec<_>>().join("\n");
            return Some((fields, body.trim().to_owned()));
        }
        if let Some((key, value)) = line.split_once(':') {
            fields.insert(key.trim().to_owned(), value.trim().to_owned());
        }
    }
    // Never saw the closing delimiter.
    None
}

// ---------------------------------------------------------------------------
// Tag scanning helpers
// ---------------------------------------------------------------------------

/// The text between `<tag>` and `</tag>`, or `None`.
fn section<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = text.find(&open)? + open.len();
    let end = text[start..].find(&close)? + start;
    Some(&text[start..end])
}

/// The next `<tag>...</tag>` element in `text`, plus the remainder after it.
fn next_element<'a>(text: &'a str, tag: &str) -> Option<(&'a str, &'a str)> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = text.find(&open)? + open.len();
    let end = text[start..].find(&close)? + start;
    Some((&text[start..end], &text[end + close.len()..]))
}

/// Trimmed text content of the first `<tag>` element.
fn tag_text(text: &str, tag: &str) -> Option<String> {
    section(text, tag).map(|s| s.trim().to_owned())
}
