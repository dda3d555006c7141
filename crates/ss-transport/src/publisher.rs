//! PUB socket: connects to the proxy's XSUB-side endpoint.
//!
//! The socket is owned by a dedicated IO task fed from a bounded channel,
//! which serializes writes so every multipart message is atomic on the
//! wire.  The proxy forwards subscription frames down this connection;
//! the IO task keeps that prefix set and drops any published message that
//! matches no subscription, so unwanted topics never cross the network.
//!
//! `send` never blocks: past the high-water mark the message is dropped
//! and logged, and while the connection is down messages queue until the
//! bound is hit.  The task reconnects with backoff between 100 ms and 5 s.

use std::collections::HashSet;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

use crate::frame::{WireMessage, read_message, write_data};
use crate::{RECONNECT_MAX, RECONNECT_MIN, TransportError, matches_any, tcp_addr, wait_shutdown};

/// Handle to a connected publisher.  Clones share the IO task; dropping
/// the last one stops it.
#[derive(Clone)]
pub struct PubSocket {
    tx: mpsc::Sender<Vec<Vec<u8>>>,
    shutdown: watch::Sender<bool>,
}

impl PubSocket {
    /// Start a publisher for `endpoint` (`tcp://host:port`).  The
    /// connection is established (and re-established) in the background.
    pub fn connect(endpoint: &str, hwm: usize) -> Result<Self, TransportError> {
        let addr = tcp_addr(endpoint)?;
        let (tx, rx) = mpsc::channel(hwm.max(1));
        let (shutdown, shutdown_rx) = watch::channel(false);
        tokio::spawn(io_task(addr, rx, shutdown_rx));
        Ok(PubSocket { tx, shutdown })
    }

    /// Queue one multipart message for publication.  Never blocks; drops
    /// (with a warning) past the high-water mark or after `close`.
    pub fn send(&self, frames: Vec<Vec<u8>>) {
        match self.tx.try_send(frames) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("publish queue past high-water mark, message dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("publish on closed socket, message dropped");
            }
        }
    }

    /// Stop the IO task.  Idempotent.
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
    }
}

enum SessionEnd {
    Shutdown,
    Reconnect,
}

async fn io_task(
    addr: String,
    mut rx: mpsc::Receiver<Vec<Vec<u8>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = RECONNECT_MIN;
    loop {
        if *shutdown.borrow() {
            break;
        }
        let stream = tokio::select! {
            _ = wait_shutdown(&mut shutdown) => break,
            conn = TcpStream::connect(&addr) => conn,
        };
        match stream {
            Ok(stream) => {
                debug!(%addr, "publisher connected");
                backoff = RECONNECT_MIN;
                match session(stream, &mut rx, &mut shutdown).await {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Reconnect => {
                        warn!(%addr, "publisher connection lost, reconnecting");
                    }
                }
            }
            Err(e) => {
                trace!(%addr, error = %e, "publisher connect failed, backing off");
                tokio::select! {
                    _ = wait_shutdown(&mut shutdown) => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(RECONNECT_MAX);
            }
        }
    }
    debug!(%addr, "publisher IO task stopped");
}

async fn session(
    stream: TcpStream,
    rx: &mut mpsc::Receiver<Vec<Vec<u8>>>,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let (read_half, mut write_half) = stream.into_split();

    // Subscription frames arrive on a dedicated reader task; `read_message`
    // is not cancel-safe so it never goes directly into the select below.
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<WireMessage>(64);
    let mut reader = tokio::spawn(async move {
        let mut read_half = read_half;
        loop {
            match read_message(&mut read_half).await {
                Ok(msg) => {
                    if cmd_tx.send(msg).await.is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    // Per-connection subscription state; the proxy replays the full set to
    // every newly connected publisher.
    let mut subs: HashSet<Vec<u8>> = HashSet::new();

    let end = loop {
        tokio::select! {
            _ = wait_shutdown(shutdown) => break SessionEnd::Shutdown,
            _ = &mut reader => break SessionEnd::Reconnect,
            maybe = rx.recv() => match maybe {
                None => break SessionEnd::Shutdown,
                Some(frames) => {
                    let wanted = frames
                        .first()
                        .is_some_and(|topic| matches_any(&subs, topic));
                    if !wanted {
                        trace!("no subscriber for topic, message filtered at publisher");
                        continue;
                    }
                    if write_data(&mut write_half, &frames).await.is_err() {
                        break SessionEnd::Reconnect;
                    }
                }
            },
            cmd = cmd_rx.recv() => match cmd {
                Some(WireMessage::Subscribe(prefix)) => {
                    trace!(prefix = %String::from_utf8_lossy(&prefix), "subscription learned");
                    subs.insert(prefix);
                }
                Some(WireMessage::Unsubscribe(prefix)) => {
                    subs.remove(&prefix);
                }
                // Publishers have no inbound data path.
                Some(WireMessage::Data(_)) => {}
                None => break SessionEnd::Reconnect,
            },
        }
    };

    reader.abort();
    end
}
