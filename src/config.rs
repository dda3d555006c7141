//! Client configuration.
//!
//! Environment overrides (`SKILLSCALE_PROXY_XSUB`, `SKILLSCALE_PROXY_XPUB`,
//! `SKILLSCALE_TIMEOUT`) are resolved only in [`ClientConfig::from_env`];
//! the client itself never reads the environment.

use std::time::Duration;

use uuid::Uuid;

/// Connection and tuning parameters for the SkillScale client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Proxy endpoint the PUB socket connects to.
    pub proxy_xsub: String,
    /// Proxy endpoint the SUB socket connects to.
    pub proxy_xpub: String,
    /// Private reply topic, stable for the client's lifetime.
    pub client_id: String,
    /// Socket queue bound, in messages.
    pub hwm: usize,
    pub default_timeout: Duration,
    /// Delay after subscribing, letting the subscription propagate across
    /// the proxy to publishers.
    pub settle_time: Duration,
    /// Stale entries are garbage-collected after
    /// `stale_multiplier x default_timeout`.
    pub stale_multiplier: f64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            proxy_xsub: "tcp://127.0.0.1:5444".to_owned(),
            proxy_xpub: "tcp://127.0.0.1:5555".to_owned(),
            client_id: default_client_id(),
            hwm: 10_000,
            default_timeout: Duration::from_secs(30),
            settle_time: Duration::from_millis(500),
            stale_multiplier: 2.0,
        }
    }
}

impl ClientConfig {
    /// Defaults with endpoint and timeout overrides from the environment.
    pub fn from_env() -> Self {
        let mut config = ClientConfig::default();
        if let Ok(xsub) = std::env::var("SKILLSCALE_PROXY_XSUB") {
            config.proxy_xsub = xsub;
        }
        if let Ok(xpub) = std::env::var("SKILLSCALE_PROXY_XPUB") {
            config.proxy_xpub = xpub;
        }
        if let Some(timeout) = std::env::var("SKILLSCALE_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| *v > 0.0)
        {
            config.default_timeout = Duration::from_secs_f64(timeout);
        }
        config
    }

    /// Age past which [`crate::SkillClient::gc_stale`] cancels an entry.
    pub fn stale_after(&self) -> Duration {
        self.default_timeout.mul_f64(self.stale_multiplier.max(1.0))
    }
}

/// Fresh reply topic: `AGENT_REPLY_<8-hex>`.
fn default_client_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("AGENT_REPLY_{}", &hex[..8])
}
