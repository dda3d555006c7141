//! skillscale: framework-agnostic async client for the SkillScale bus.
//!
//! The client manages PUB/SUB connections to the XPUB/XSUB proxy,
//! publishes intents to skill topics, correlates responses by request id,
//! and enforces per-call timeouts.  Agent frameworks wrap this client
//! through thin adapter layers.
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), skillscale::ClientError> {
//! use skillscale::{ClientConfig, SkillClient};
//!
//! let client = SkillClient::new(ClientConfig::from_env());
//! client.connect().await?;
//! let result = client
//!     .invoke("TOPIC_DATA_PROCESSING", "summarize this", None)
//!     .await?;
//! println!("{result}");
//! client.close().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod pending;

pub use client::{ClientError, SkillClient};
pub use config::ClientConfig;
pub use pending::{PendingTable, SkillReply};

/// Clip a string to at most `max` characters for log fields.
pub(crate) fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
