//! The SkillScale client: publishes intents, awaits correlated responses.
//!
//! Lifecycle: `connect` opens the PUB and SUB sockets, subscribes to the
//! client's private reply topic, waits out the subscription settle delay,
//! and starts the background listener.  `invoke` registers a waiter under
//! a fresh request id, publishes `[topic, envelope]`, and awaits the
//! waiter with a deadline.  `close` stops the listener and cancels every
//! outstanding waiter.  Both lifecycle calls are idempotent.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ss_protocol::{RequestEnvelope, ResponseEnvelope};
use ss_transport::{PubSocket, SubSocket, TransportError};

use crate::config::ClientConfig;
use crate::pending::{PendingTable, SkillReply};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// What an `invoke` caller can observe.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("client is not connected; call connect() first")]
    NotConnected,
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("skill error: {0}")]
    Skill(String),
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

struct Connection {
    pub_socket: PubSocket,
    stop: watch::Sender<bool>,
    listener: tokio::task::JoinHandle<()>,
}

/// Async client for the SkillScale bus.  Safe to share across tasks:
/// concurrent `invoke`s serialize their sends through the publisher's
/// single writer task.
pub struct SkillClient {
    config: ClientConfig,
    pending: Arc<PendingTable>,
    conn: tokio::sync::Mutex<Option<Connection>>,
}

impl SkillClient {
    pub fn new(config: ClientConfig) -> Self {
        SkillClient {
            config,
            pending: Arc::new(PendingTable::new()),
            conn: tokio::sync::Mutex::new(None),
        }
    }

    /// The private reply topic responses for this client arrive on.
    pub fn client_id(&self) -> &str {
        &self.config.client_id
    }

    pub async fn is_connected(&self) -> bool {
        self.conn.lock().await.is_some()
    }

    /// Outstanding request count.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    // -- Lifecycle ----------------------------------------------------------

    /// Open sockets, subscribe to the reply topic, wait for subscription
    /// propagation, and start the listener.  A second call is a no-op.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let mut conn = self.conn.lock().await;
        if conn.is_some() {
            return Ok(());
        }

        info!(client_id = %self.config.client_id, "connecting client");
        let pub_socket = PubSocket::connect(&self.config.proxy_xsub, self.config.hwm)?;
        let sub_socket = SubSocket::connect(&self.config.proxy_xpub, self.config.hwm)?;
        sub_socket.subscribe(self.config.client_id.as_bytes());
        debug!(reply_topic = %self.config.client_id, "subscribed to reply topic");

        tokio::time::sleep(self.config.settle_time).await;

        let (stop, stop_rx) = watch::channel(false);
        let listener = tokio::spawn(listener_loop(sub_socket, self.pending.clone(), stop_rx));

        *conn = Some(Connection {
            pub_socket,
            stop,
            listener,
        });
        info!(client_id = %self.config.client_id, "client ready");
        Ok(())
    }

    /// Stop the listener, cancel every pending waiter, release sockets.
    /// A second call is a no-op.
    pub async fn close(&self) {
        let Some(conn) = self.conn.lock().await.take() else {
            return;
        };
        info!(client_id = %self.config.client_id, "closing client");

        let _ = conn.stop.send(true);
        let _ = conn.listener.await;

        self.gc_stale();
        let cancelled = self.pending.cancel_all();
        if cancelled > 0 {
            warn!(cancelled, "pending requests cancelled at close");
        }
        conn.pub_socket.close();
        info!(client_id = %self.config.client_id, "client closed");
    }

    // -- Core API -----------------------------------------------------------

    /// Publish an intent on `topic` and await the correlated response.
    ///
    /// Returns the skill's response content, or [`ClientError::Timeout`]
    /// when nothing arrived in time, or [`ClientError::Skill`] when the
    /// server reported an error.
    pub async fn invoke(
        &self,
        topic: &str,
        intent: &str,
        timeout: Option<Duration>,
    ) -> Result<String, ClientError> {
        let publisher = {
            let conn = self.conn.lock().await;
            match conn.as_ref() {
                Some(conn) => conn.pub_socket.clone(),
                None => return Err(ClientError::NotConnected),
            }
        };
        let timeout = timeout.unwrap_or(self.config.default_timeout);

        // uuid collisions are not a practical concern, but the pending
        // table enforces uniqueness, so honour its verdict anyway.
        let (request_id, waiter) = loop {
            let candidate = Uuid::new_v4().simple().to_string();
            if let Ok(rx) = self.pending.add(&candidate, topic, intent) {
                break (candidate, rx);
            }
        };

        let envelope = RequestEnvelope::new(
            request_id.clone(),
            self.config.client_id.clone(),
            intent.to_owned(),
        );
        let payload = match serde_json::to_vec(&envelope) {
            Ok(payload) => payload,
            Err(e) => {
                self.pending.remove(&request_id);
                return Err(ClientError::Skill(format!("request serialization: {}", e)));
            }
        };
        publisher.send(vec![topic.as_bytes().to_vec(), payload]);
        info!(topic = %topic, request_id = %&request_id[..8], "intent published");

        match tokio::time::timeout(timeout, waiter).await {
            Ok(Ok(SkillReply::Success(content))) => Ok(content),
            Ok(Ok(SkillReply::Error(message))) => Err(ClientError::Skill(message)),
            // Waiter cancelled from underneath us (close or GC).
            Ok(Err(_)) => Err(ClientError::NotConnected),
            Err(_) => {
                self.pending.remove(&request_id);
                warn!(topic = %topic, request_id = %&request_id[..8], "invoke timed out");
                Err(ClientError::Timeout(timeout))
            }
        }
    }

    /// Fan out every request concurrently and collect all outcomes in
    /// input order.  Never fails as a whole; per-call errors are returned
    /// in place.
    pub async fn invoke_parallel(
        &self,
        requests: &[(String, String)],
        timeout: Option<Duration>,
    ) -> Vec<Result<String, ClientError>> {
        futures::future::join_all(
            requests
                .iter()
                .map(|(topic, intent)| self.invoke(topic, intent, timeout)),
        )
        .await
    }

    /// Issue the requests one at a time, stopping at the first error.
    pub async fn invoke_sequential(
        &self,
        requests: &[(String, String)],
        timeout: Option<Duration>,
    ) -> Result<Vec<String>, ClientError> {
        let mut results = Vec::with_capacity(requests.len());
        for (topic, intent) in requests {
            results.push(self.invoke(topic, intent, timeout).await?);
        }
        Ok(results)
    }

    // -- Housekeeping -------------------------------------------------------

    /// Cancel pending requests older than
    /// `stale_multiplier x default_timeout`; returns how many.  This and
    /// `close` are the only non-response sources of removal, so slow
    /// skills inside the window are never pre-empted.
    pub fn gc_stale(&self) -> usize {
        let swept = self.pending.sweep(self.config.stale_after());
        if swept > 0 {
            debug!(swept, "stale pending requests garbage-collected");
        }
        swept
    }
}

// ---------------------------------------------------------------------------
// Background listener
// ---------------------------------------------------------------------------

/// Drain the SUB socket and settle waiters.  Malformed payloads and
/// unknown request ids are logged and dropped; they never stop the loop.
/// A fatally closed socket cancels every pending waiter on the way out.
async fn listener_loop(
    mut sub_socket: SubSocket,
    pending: Arc<PendingTable>,
    mut stop: watch::Receiver<bool>,
) {
    debug!("listener started");
    loop {
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            received = sub_socket.recv() => match received {
                Some(frames) => handle_response(&pending, &frames),
                None => {
                    warn!("subscription socket closed, cancelling pending requests");
                    pending.cancel_all();
                    break;
                }
            },
        }
    }
    sub_socket.close();
    debug!("listener stopped");
}

fn handle_response(pending: &PendingTable, frames: &[Vec<u8>]) {
    // The transport already discards sub-two-frame messages.
    let payload = &frames[1];
    let response: ResponseEnvelope = match serde_json::from_slice(payload) {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "non-JSON response payload dropped");
            return;
        }
    };

    let settled = if response.is_success() {
        pending.resolve(&response.request_id, response.content)
    } else {
        let message = if response.error.is_empty() {
            format!("status '{}'", response.status)
        } else {
            response.error
        };
        pending.reject(&response.request_id, message)
    };

    if !settled {
        warn!(
            request_id = %crate::truncate(&response.request_id, 8),
            "unknown request_id, response dropped"
        );
    }
}
