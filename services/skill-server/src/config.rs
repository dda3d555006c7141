//! Skill server configuration.
//!
//! One options record with defaults; the binary resolves CLI flags and
//! `SKILLSCALE_*` environment variables into this struct, the core never
//! reads the environment itself.

use std::path::PathBuf;
use std::time::Duration;

/// Which skill matcher the server runs in task mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatcherMode {
    /// Always pick the only (or first) skill.
    #[default]
    Single,
    /// The task text must name a skill exactly; otherwise no match.
    ExactName,
    /// Delegate to an external callout command.
    External,
}

impl std::str::FromStr for MatcherMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(MatcherMode::Single),
            // "explicit-only" is the historical name for the exact-name mode.
            "exact-name" | "explicit-only" => Ok(MatcherMode::ExactName),
            "external" => Ok(MatcherMode::External),
            other => Err(format!(
                "unknown matcher mode '{}' (expected single, exact-name, or external)",
                other
            )),
        }
    }
}

/// Skill server options.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Topic this server subscribes to (exact prefix).
    pub topic: String,
    /// Topic folder holding AGENTS.md and/or skill directories.
    pub skills_dir: PathBuf,
    /// Informational description, surfaced in startup metadata.
    pub description: String,
    pub proxy_xsub: String,
    pub proxy_xpub: String,
    /// Worker pool size; at most this many skill executables run at once.
    pub workers: usize,
    /// Per-request execution timeout.
    pub exec_timeout: Duration,
    /// Subscription propagation delay observed before publishing starts.
    pub settle_time: Duration,
    /// Internal dispatch queue bound; the oldest frame is dropped on
    /// overflow.
    pub queue_capacity: usize,
    /// Socket queue bound, in messages.
    pub hwm: usize,
    pub matcher_mode: MatcherMode,
    /// Callout command for [`MatcherMode::External`].
    pub matcher_command: Option<PathBuf>,
    /// Interpreter override for skill executables (default: inferred from
    /// the script extension).
    pub executor: Option<String>,
    /// How long workers may drain the queue on shutdown before being
    /// force-killed.
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            topic: "TOPIC_DEFAULT".to_owned(),
            skills_dir: PathBuf::from("./skills"),
            description: String::new(),
            proxy_xsub: "tcp://127.0.0.1:5444".to_owned(),
            proxy_xpub: "tcp://127.0.0.1:5555".to_owned(),
            workers: 2,
            exec_timeout: Duration::from_secs(120),
            settle_time: Duration::from_millis(500),
            queue_capacity: 1024,
            hwm: 10_000,
            matcher_mode: MatcherMode::Single,
            matcher_command: None,
            executor: None,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matcher_mode_parses_all_spellings() {
        assert_eq!("single".parse::<MatcherMode>().unwrap(), MatcherMode::Single);
        assert_eq!(
            "exact-name".parse::<MatcherMode>().unwrap(),
            MatcherMode::ExactName
        );
        assert_eq!(
            "explicit-only".parse::<MatcherMode>().unwrap(),
            MatcherMode::ExactName
        );
        assert_eq!(
            "external".parse::<MatcherMode>().unwrap(),
            MatcherMode::External
        );
        assert!("llm".parse::<MatcherMode>().is_err());
    }
}
