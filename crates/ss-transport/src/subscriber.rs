//! SUB socket: connects to the proxy's XPUB-side endpoint.
//!
//! Subscriptions are sent upstream as command frames and replayed after
//! every reconnect.  Inbound data messages land in a bounded channel;
//! `recv` is cancel-safe, so listener loops built on it can be cancelled
//! between messages without losing stream framing.

use std::collections::HashSet;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

use crate::frame::{WireMessage, read_message, write_subscription};
use crate::{RECONNECT_MAX, RECONNECT_MIN, TransportError, tcp_addr, wait_shutdown};

/// Handle to a connected subscriber.
pub struct SubSocket {
    ctl_tx: mpsc::UnboundedSender<(Vec<u8>, bool)>,
    data_rx: mpsc::Receiver<Vec<Vec<u8>>>,
    shutdown: watch::Sender<bool>,
}

impl SubSocket {
    /// Start a subscriber for `endpoint` (`tcp://host:port`).
    pub fn connect(endpoint: &str, hwm: usize) -> Result<Self, TransportError> {
        let addr = tcp_addr(endpoint)?;
        let (ctl_tx, ctl_rx) = mpsc::unbounded_channel();
        let (data_tx, data_rx) = mpsc::channel(hwm.max(1));
        let (shutdown, shutdown_rx) = watch::channel(false);
        tokio::spawn(io_task(addr, ctl_rx, data_tx, shutdown_rx));
        Ok(SubSocket {
            ctl_tx,
            data_rx,
            shutdown,
        })
    }

    /// Subscribe to a topic prefix (empty prefix = everything).
    pub fn subscribe(&self, prefix: &[u8]) {
        let _ = self.ctl_tx.send((prefix.to_vec(), true));
    }

    /// Drop a topic prefix subscription.
    pub fn unsubscribe(&self, prefix: &[u8]) {
        let _ = self.ctl_tx.send((prefix.to_vec(), false));
    }

    /// Receive the next multipart message (always at least two frames;
    /// shorter messages are discarded at the transport with a warning).
    /// Returns `None` once the socket has been closed.  Cancel-safe.
    pub async fn recv(&mut self) -> Option<Vec<Vec<u8>>> {
        self.data_rx.recv().await
    }

    /// Stop the IO task.  Idempotent; pending `recv` calls drain whatever
    /// was already queued, then observe `None`.
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
    mut ctl_rx: mpsc::UnboundedReceiver<(Vec<u8>, bool)>,
    data_tx: mpsc::Sender<Vec<Vec<u8>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    // Desired subscription set, maintained across reconnects.
    let mut desired: HashSet<Vec<u8>> = HashSet::new();
    let mut backoff = RECONNECT_MIN;

    loop {
        if *shutdown.borrow() {
            break;
        }
        let stream = tokio::select! {
            _ = wait_shutdown(&mut shutdown) => break,
            // Keep absorbing subscription changes while disconnected.
            cmd = ctl_rx.recv() => {
                match cmd {
                    Some((prefix, on)) => apply(&mut desired, prefix, on),
                    None => break,
                }
                continue;
            }
            conn = TcpStream::connect(&addr) => conn,
        };
        match stream {
            Ok(stream) => {
                debug!(%addr, subscriptions = desired.len(), "subscriber connected");
                backoff = RECONNECT_MIN;
                let end = session(
                    stream,
                    &mut desired,
                    &mut ctl_rx,
                    data_tx.clone(),
                    &mut shutdown,
                )
                .await;
                match end {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Reconnect => {
                        warn!(%addr, "subscriber connection lost, reconnecting");
                    }
                }
            }
            Err(e) => {
                trace!(%addr, error = %e, "subscriber connect failed, backing off");
                tokio::select! {
                    _ = wait_shutdown(&mut shutdown) => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(RECONNECT_MAX);
            }
        }
    }
    debug!(%addr, "subscriber IO task stopped");
}

fn apply(desired: &mut HashSet<Vec<u8>>, prefix: Vec<u8>, on: bool) {
    if on {
        desired.insert(prefix);
    } else {
        desired.remove(&prefix);
    }
}

async fn session(
    stream: TcpStream,
    desired: &mut HashSet<Vec<u8>>,
    ctl_rx: &mut mpsc::UnboundedReceiver<(Vec<u8>, bool)>,
    data_tx: mpsc::Sender<Vec<Vec<u8>>>,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let (read_half, mut write_half) = stream.into_split();

    // Replay the subscription set on every (re)connect.
    for prefix in desired.iter() {
        if write_subscription(&mut write_half, prefix, true)
            .await
            .is_err()
        {
            return SessionEnd::Reconnect;
        }
    }

    let mut reader = tokio::spawn(async move {
        let mut read_half = read_half;
        loop {
            match read_message(&mut read_half).await {
                Ok(WireMessage::Data(frames)) => {
                    if frames.len() < 2 {
                        warn!(frames = frames.len(), "short multipart discarded");
                        continue;
                    }
                    if let Err(mpsc::error::TrySendError::Full(_)) = data_tx.try_send(frames) {
                        warn!("subscriber queue past high-water mark, message dropped");
                    }
                }
                // Subscription frames never flow downstream to a SUB.
                Ok(_) => {}
                Err(_) => break,
            }
        }
    });

    let end = loop {
        tokio::select! {
            _ = wait_shutdown(shutdown) => break SessionEnd::Shutdown,
            _ = &mut reader => break SessionEnd::Reconnect,
            cmd = ctl_rx.recv() => match cmd {
                Some((prefix, on)) => {
                    apply(desired, prefix.clone(), on);
                    if write_subscription(&mut write_half, &prefix, on).await.is_err() {
                        break SessionEnd::Reconnect;
                    }
                }
                None => break SessionEnd::Shutdown,
            },
        }
    };

    reader.abort();
    end
}
