//! Skill matching: task description -> skill name.
//!
//! A matcher is a pure selection function over `(task, skills)`.  Three
//! reference implementations exist: the single-skill matcher, the
//! exact-name matcher (used for testing and for the `explicit-only` server
//! mode), and an external callout that delegates the choice to another
//! program.  On internal failure every matcher degrades to the first
//! skill's name rather than erroring; `NoMatch` is a considered answer,
//! not a failure.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use ss_skills::SkillEntry;

/// Upper bound on an external callout, including I/O.
pub const MATCH_TIMEOUT: Duration = Duration::from_secs(30);

/// A matcher's verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    Skill(String),
    /// The matcher processed the input and chose no skill.
    NoMatch,
}

/// Reference matcher implementations.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Always the only (or first) skill.
    SingleSkill,
    /// The task text must equal a skill name (case-insensitive, quotes and
    /// whitespace stripped); anything else is `NoMatch`.
    ExactName,
    /// Spawn `command`, write `{"task", "skills"}` JSON on stdin, read the
    /// chosen name (or the literal `none`) from stdout.
    External { command: PathBuf },
}

impl Matcher {
    /// Pick a skill for `task` out of `skills`.
    pub async fn select(&self, task: &str, skills: &[SkillEntry]) -> MatchOutcome {
        if skills.is_empty() {
            return MatchOutcome::NoMatch;
        }
        match self {
            Matcher::SingleSkill => MatchOutcome::Skill(skills[0].name.clone()),
            Matcher::ExactName => match find_named(skills, task) {
                Some(name) => MatchOutcome::Skill(name),
                None => MatchOutcome::NoMatch,
            },
            Matcher::External { command } => external_select(command, task, skills).await,
        }
    }
}

/// Case-insensitive name lookup after trimming whitespace, quotes, and
/// backticks; returns the canonical name.
fn find_named(skills: &[SkillEntry], reply: &str) -> Option<String> {
    let cleaned = reply.trim().trim_matches(['"', '\'', '`']).trim();
    skills
        .iter()
        .find(|s| s.name.eq_ignore_ascii_case(cleaned))
        .map(|s| s.name.clone())
}

/// Run the callout.  Wire contract: stdin gets
/// `{"task":"...","skills":[{"name","description"},...]}`, stdout returns
/// a bare skill name or `none`.  Any internal error (spawn failure,
/// timeout, unreadable output) degrades to the first skill.
async fn external_select(command: &PathBuf, task: &str, skills: &[SkillEntry]) -> MatchOutcome {
    let request = serde_json::json!({
        "task": task,
        "skills": skills
            .iter()
            .map(|s| serde_json::json!({"name": s.name, "description": s.description}))
            .collect::<Vec<_>>(),
    });

    let reply = match run_callout(command, &request.to_string()).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!(command = %command.display(), error = %e, "matcher callout failed, falling back to first skill");
            return MatchOutcome::Skill(skills[0].name.clone());
        }
    };

    let cleaned = reply.trim().trim_matches(['"', '\'', '`']).trim();
    if cleaned.eq_ignore_ascii_case("none") {
        return MatchOutcome::NoMatch;
    }
    match find_named(skills, cleaned) {
        Some(name) => {
            debug!(skill = %name, "matcher callout selected skill");
            MatchOutcome::Skill(name)
        }
        None => {
            warn!(reply = %cleaned, "matcher callout named an unknown skill");
            MatchOutcome::NoMatch
        }
    }
}

async fn run_callout(command: &PathBuf, input: &str) -> Result<String, String> {
    let mut child = Command::new(command)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("spawn: {}", e))?;

    // The 30 s bound covers the stdin hand-off too.
    let run = async {
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input.as_bytes())
                .await
                .map_err(|e| format!("stdin: {}", e))?;
            // Dropping closes the pipe so the callout sees EOF.
        }
        child
            .wait_with_output()
            .await
            .map_err(|e| format!("wait: {}", e))
    };
    let output = tokio::time::timeout(MATCH_TIMEOUT, run)
        .await
        .map_err(|_| "timed out".to_owned())??;

    if !output.status.success() {
        return Err(format!("exit status {}", output.status));
    }
    String::from_utf8(output.stdout).map_err(|e| format!("stdout not UTF-8: {}", e))
}
