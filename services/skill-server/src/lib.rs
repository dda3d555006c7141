//! SkillScale skill server runtime.
//!
//! A skill server subscribes to one topic on the bus, hands every incoming
//! request to a bounded worker pool, selects a skill for each intent
//! (single-skill shortcut, explicit name, or matcher), runs the skill's
//! executable in a sandbox with a per-request timeout, and publishes the
//! response on the caller's reply topic.

pub mod config;
pub mod executor;
pub mod matcher;
pub mod server;

pub use config::{MatcherMode, ServerConfig};
pub use executor::{ExecutionResult, execute_skill};
pub use matcher::{MatchOutcome, Matcher};
pub use server::{ServerError, ServerHandle, SkillServer};
