//! Skills tree scanning and on-demand detail loading.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::manifest::{parse_agents_md, parse_front_matter};
use crate::{SkillDetail, SkillEntry, SkillsError};
use ss_protocol::topic_for_folder;

// ---------------------------------------------------------------------------
// Snapshot types
// ---------------------------------------------------------------------------

/// All skills under one topic folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSkills {
    pub topic: String,
    /// Server-provided description used for coarse routing prompts.
    pub description: String,
    /// Absolute path of the topic folder.
    pub dir: PathBuf,
    pub skills: Vec<SkillEntry>,
}

impl TopicSkills {
    pub fn skill(&self, name: &str) -> Option<&SkillEntry> {
        self.skills.iter().find(|s| s.name == name)
    }

    /// Load the full SKILL.md for one of this topic's entries.
    pub fn load_detail(&self, entry: &SkillEntry) -> Result<SkillDetail, SkillsError> {
        load_detail(&self.dir, entry)
    }
}

/// Immutable result of a tree scan; a rescan replaces the whole value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiscoverySnapshot {
    /// Keyed by topic string, ordered for stable iteration.
    pub topics: BTreeMap<String, TopicSkills>,
}

impl DiscoverySnapshot {
    pub fn topic(&self, topic: &str) -> Option<&TopicSkills> {
        self.topics.get(topic)
    }

    pub fn skill_count(&self) -> usize {
        self.topics.values().map(|t| t.skills.len()).sum()
    }

    /// Compact human-readable listing of every topic and skill, suitable
    /// for prompting an external matcher or an orchestrating agent.
    pub fn metadata_summary(&self) -> String {
        if self.topics.is_empty() {
            return "No skills available.".to_owned();
        }
        let mut lines = vec![
            "Available skills:".to_owned(),
            "Intent modes: explicit (JSON with skill name) | task-based (server matches)".to_owned(),
            String::new(),
        ];
        for topic in self.topics.values() {
            if topic.description.is_empty() {
                lines.push(format!("  Topic: {}", topic.topic));
            } else {
                lines.push(format!("  Topic: {} — {}", topic.topic, topic.description));
            }
            for skill in &topic.skills {
                lines.push(format!("    - {}: {}", skill.name, skill.description));
            }
            lines.push(String::new());
        }
        lines.join("\n")
    }
}

// ---------------------------------------------------------------------------
// Scanning
// ---------------------------------------------------------------------------

/// Scan a skills root: each direct subdirectory becomes a topic.
/// `topic_descriptions` supplies the per-topic routing descriptions (there
/// is deliberately no process-wide registry).
pub fn scan(
    root: &Path,
    topic_descriptions: &HashMap<String, String>,
) -> Result<DiscoverySnapshot, SkillsError> {
    let mut snapshot = DiscoverySnapshot::default();
    if !root.is_dir() {
        warn!(root = %root.display(), "skills root not found");
        return Ok(snapshot);
    }

    let mut folders: Vec<PathBuf> = std::fs::read_dir(root)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    folders.sort();

    for folder in folders {
        let Some(name) = folder.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let topic = topic_for_folder(name);
        let description = topic_descriptions.get(&topic).cloned().unwrap_or_default();
        let topic_skills = load_topic(&folder, &topic, &description)?;
        if topic_skills.skills.is_empty() {
            debug!(topic = %topic, "topic folder holds no skills, skipped");
            continue;
        }
        snapshot.topics.insert(topic, topic_skills);
    }

    info!(
        topics = snapshot.topics.len(),
        skills = snapshot.skill_count(),
        "discovery scan complete"
    );
    Ok(snapshot)
}

/// Load one topic folder: the AGENTS.md manifest is authoritative when
/// present; otherwise skill directories are found by a one-level scan for
/// SKILL.md files.
pub fn load_topic(dir: &Path, topic: &str, description: &str) -> Result<TopicSkills, SkillsError> {
    let dir = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
    let agents_md = dir.join("AGENTS.md");

    let skills = if agents_md.is_file() {
        let content = std::fs::read_to_string(&agents_md)?;
        parse_agents_md(&content)
            .into_iter()
            .map(|m| SkillEntry {
                name: m.name,
                description: m.description,
                location: m.location,
                topic: topic.to_owned(),
            })
            .collect()
    } else {
        scan_skill_dirs(&dir, topic)?
    };

    for skill in &skills {
        debug!(topic = %topic, skill = %skill.name, "discovered skill");
    }

    Ok(TopicSkills {
        topic: topic.to_owned(),
        description: description.to_owned(),
        dir,
        skills,
    })
}

/// One-level scan for `<dir>/<skill>/SKILL.md`; the directory name is the
/// skill name, the description comes from the front matter.
fn scan_skill_dirs(dir: &Path, topic: &str) -> Result<Vec<SkillEntry>, SkillsError> {
    let mut subdirs: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    subdirs.sort();

    let mut skills = Vec::new();
    for skill_dir in subdirs {
        let skill_md = skill_dir.join("SKILL.md");
        if !skill_md.is_file() {
            continue;
        }
        let Some(name) = skill_dir.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let content = std::fs::read_to_string(&skill_md)?;
        let description = match parse_front_matter(&content) {
            Some((fields, _)) => fields.get("description").cloned().unwrap_or_default(),
            None => {
                warn!(path = %skill_md.display(), "SKILL.md without front matter, skipped");
                continue;
            }
        };
        skills.push(SkillEntry {
            name: name.to_owned(),
            description,
            location: name.to_owned(),
            topic: topic.to_owned(),
        });
    }
    Ok(skills)
}

// ---------------------------------------------------------------------------
// Detail loading (progressive disclosure)
// ---------------------------------------------------------------------------

/// Read the full SKILL.md for `entry`, resolving its executable.  Only
/// called once a skill has been matched and is about to run.
pub fn load_detail(topic_dir: &Path, entry: &SkillEntry) -> Result<SkillDetail, SkillsError> {
    let skill_dir = topic_dir.join(entry.location.trim_end_matches('/'));
    let skill_md = skill_dir.join("SKILL.md");
    if !skill_md.is_file() {
        return Err(SkillsError::MissingSkillMd(skill_dir));
    }

    let content = std::fs::read_to_string(&skill_md)?;
    let (fields, body) = parse_front_matter(&content)
        .ok_or_else(|| SkillsError::MissingFrontMatter(skill_md.clone()))?;

    let base_dir = skill_dir.canonicalize()?;
    Ok(SkillDetail {
        name: fields
            .get("name")
            .cloned()
            .unwrap_or_else(|| entry.name.clone()),
        description: fields
            .get("description")
            .cloned()
            .unwrap_or_else(|| entry.description.clone()),
        instructions: body,
        script_path: resolve_script(&base_dir),
        base_dir,
    })
}

/// The skill's executable: the lexically first `scripts/run.*` file.
/// A missing executable is recoverable (execution reports an error).
pub fn resolve_script(base_dir: &Path) -> Option<PathBuf> {
    let scripts = base_dir.join("scripts");
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(&scripts)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("run."))
        })
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}
