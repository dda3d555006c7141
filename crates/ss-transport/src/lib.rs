//! ss-transport: prefix-filtered topic pub/sub over TCP stream sockets.
//!
//! The bus carries two-frame multipart messages `[topic, payload]` between
//! peers and a central proxy.  Publishers connect to the proxy's XSUB-side
//! endpoint and filter outgoing messages against the subscription set the
//! proxy forwards down the same connection; subscribers connect to the
//! XPUB-side endpoint and send subscribe/unsubscribe command frames
//! upstream.
//!
//! Endpoints are `tcp://host:port` strings (the scheme prefix is optional
//! on input).  Both socket types reconnect with bounded backoff and never
//! block their callers on network I/O: sends past the high-water mark are
//! dropped and logged, matching PUB/SUB semantics.

pub mod frame;
pub mod publisher;
pub mod subscriber;

pub use frame::{FrameError, WireMessage, read_message, write_data, write_subscription};
pub use publisher::PubSocket;
pub use subscriber::SubSocket;

use std::time::Duration;

/// Default per-socket queue bound (messages), mirroring the client defaults.
pub const DEFAULT_HWM: usize = 10_000;

/// Reconnect backoff bounds.
pub(crate) const RECONNECT_MIN: Duration = Duration::from_millis(100);
pub(crate) const RECONNECT_MAX: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid endpoint '{0}' (expected tcp://host:port)")]
    InvalidEndpoint(String),
}

/// Resolves when shutdown is requested or every handle is gone.
pub(crate) async fn wait_shutdown(rx: &mut tokio::sync::watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Strip the `tcp://` scheme and validate the `host:port` remainder.
pub fn tcp_addr(endpoint: &str) -> Result<String, TransportError> {
    let addr = endpoint.strip_prefix("tcp://").unwrap_or(endpoint);
    if addr.is_empty() || !addr.contains(':') {
        return Err(TransportError::InvalidEndpoint(endpoint.to_owned()));
    }
    Ok(addr.to_owned())
}

/// True when `topic` matches one of `prefixes` (byte-prefix filtering; an
/// empty prefix matches everything, as with conventional SUB sockets).
pub fn matches_any(prefixes: &std::collections::HashSet<Vec<u8>>, topic: &[u8]) -> bool {
    prefixes.iter().any(|p| topic.starts_with(p))
}
