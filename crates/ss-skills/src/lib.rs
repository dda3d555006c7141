//! ss-skills: filesystem skill discovery for SkillScale servers.
//!
//! A skills tree groups skills by topic folder:
//!
//! ```text
//! skills/
//! ├── data-processing/            topic = TOPIC_DATA_PROCESSING
//! │   ├── AGENTS.md               optional server manifest
//! │   ├── csv-analyzer/
//! │   │   ├── SKILL.md
//! │   │   └── scripts/run.py
//! │   └── text-summarizer/
//! │       └── SKILL.md
//! └── code-analysis/              topic = TOPIC_CODE_ANALYSIS
//!     └── ...
//! ```
//!
//! Discovery keeps only lightweight metadata (name, description, location);
//! the full SKILL.md body is loaded on demand when a skill is about to run
//! (progressive disclosure).  Scan results are immutable snapshots: a
//! rescan builds a new value, never mutates an old one.

pub mod discovery;
pub mod manifest;

pub use discovery::{DiscoverySnapshot, TopicSkills, load_topic, scan};
pub use manifest::{parse_agents_md, parse_front_matter};

use std::path::PathBuf;

/// Lightweight skill metadata, as listed by a manifest or folder scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillEntry {
    /// Unique within its topic.
    pub name: String,
    pub description: String,
    /// Path of the skill directory, relative to the topic folder.
    pub location: String,
    /// Derived from the enclosing folder, e.g. `TOPIC_DATA_PROCESSING`.
    pub topic: String,
}

/// Full skill detail, loaded lazily from SKILL.md.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillDetail {
    pub name: String,
    pub description: String,
    /// The markdown body beneath the front matter.
    pub instructions: String,
    /// Absolute path of the skill directory.
    pub base_dir: PathBuf,
    /// Absolute path of `scripts/run.*`, when one exists.
    pub script_path: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum SkillsError {
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("no SKILL.md under '{0}'")]
    MissingSkillMd(PathBuf),
    #[error("SKILL.md at '{0}' has no front matter")]
    MissingFrontMatter(PathBuf),
}
