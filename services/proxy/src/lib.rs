//! SkillScale XPUB/XSUB forwarding broker.
//!
//! A single process bridging two listeners: publishers connect to the
//! XSUB-side endpoint and send `[topic, payload]` multiparts; subscribers
//! connect to the XPUB-side endpoint and send subscription frames.  Every
//! data message is forwarded verbatim to each subscriber whose prefix set
//! matches the topic frame, over a bounded per-subscriber queue (overflow
//! drops the message for that subscriber and logs it).
//!
//! Subscription propagation is verbose: each subscribe a subscriber newly
//! adds is forwarded to every connected publisher, even when another
//! subscriber already holds the same prefix, so late-joining publishers
//! learn the full set the moment they connect.  Unsubscribes travel
//! upstream once the last holder of a prefix drops it (including by
//! disconnect).  Payloads are never parsed.
//!
//! The broker does not attempt internal recovery: a fatal listener error
//! terminates [`Proxy::run`] with an error and the binary exits non-zero.

use std::collections::{HashMap, HashSet};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use ss_transport::frame::{WireMessage, read_message, write_data, write_subscription};
use ss_transport::{TransportError, tcp_addr};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Broker tuning options.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Endpoint publishers connect to.
    pub xsub_bind: String,
    /// Endpoint subscribers connect to.
    pub xpub_bind: String,
    /// Per-queue bound, in messages.
    pub hwm: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        ProxyConfig {
            xsub_bind: "tcp://127.0.0.1:5444".to_owned(),
            xpub_bind: "tcp://127.0.0.1:5555".to_owned(),
            hwm: 50_000,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Broker events
// ---------------------------------------------------------------------------

enum Event {
    Publish(Vec<Vec<u8>>),
    PublisherJoined {
        id: u64,
        ctl_tx: mpsc::Sender<(Vec<u8>, bool)>,
    },
    PublisherLeft {
        id: u64,
    },
    SubscriberJoined {
        id: u64,
        data_tx: mpsc::Sender<Vec<Vec<u8>>>,
    },
    SubscriberCtl {
        id: u64,
        prefix: Vec<u8>,
        on: bool,
    },
    SubscriberLeft {
        id: u64,
    },
}

// ---------------------------------------------------------------------------
// Proxy
// ---------------------------------------------------------------------------

/// A bound but not yet running broker.
pub struct Proxy {
    xsub_listener: TcpListener,
    xpub_listener: TcpListener,
    hwm: usize,
    shutdown: watch::Sender<bool>,
}

/// Clonable stop handle for a running [`Proxy`].
#[derive(Clone)]
pub struct ProxyHandle {
    shutdown: watch::Sender<bool>,
}

impl ProxyHandle {
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

impl Proxy {
    /// Bind both listeners.  Use port 0 in either endpoint to let the OS
    /// choose (the resolved endpoints are available from the accessors).
    pub async fn bind(config: &ProxyConfig) -> Result<Self, ProxyError> {
        let xsub_listener = TcpListener::bind(tcp_addr(&config.xsub_bind)?).await?;
        let xpub_listener = TcpListener::bind(tcp_addr(&config.xpub_bind)?).await?;
        let (shutdown, _) = watch::channel(false);
        Ok(Proxy {
            xsub_listener,
            xpub_listener,
            hwm: config.hwm.max(1),
            shutdown,
        })
    }

    /// Resolved endpoint publishers connect to.
    pub fn xsub_endpoint(&self) -> String {
        format!(
            "tcp://{}",
            self.xsub_listener
                .local_addr()
                .expect("local_addr always succeeds after bind")
        )
    }

    /// Resolved endpoint subscribers connect to.
    pub fn xpub_endpoint(&self) -> String {
        format!(
            "tcp://{}",
            self.xpub_listener
                .local_addr()
                .expect("local_addr always succeeds after bind")
        )
    }

    pub fn handle(&self) -> ProxyHandle {
        ProxyHandle {
            shutdown: self.shutdown.clone(),
        }
    }

    /// Run the accept loops and the forwarding core until shutdown or a
    /// fatal listener error.
    pub async fn run(self) -> Result<(), ProxyError> {
        info!(
            xsub = %self.xsub_endpoint(),
            xpub = %self.xpub_endpoint(),
            hwm = self.hwm,
            "proxy running"
        );

        let (event_tx, event_rx) = mpsc::channel::<Event>(self.hwm);
        let mut shutdown_rx = self.shutdown.subscribe();
        let broker = tokio::spawn(broker_loop(event_rx));
        let mut next_id: u64 = 1;

        let result = loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break Ok(());
                    }
                }
                accepted = self.xsub_listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let id = next_id;
                        next_id += 1;
                        debug!(%peer, id, "publisher connected");
                        tokio::spawn(publisher_conn(id, stream, event_tx.clone()));
                    }
                    Err(e) => break Err(ProxyError::Io(e)),
                },
                accepted = self.xpub_listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let id = next_id;
                        next_id += 1;
                        debug!(%peer, id, "subscriber connected");
                        tokio::spawn(subscriber_conn(id, stream, event_tx.clone(), self.hwm));
                    }
                    Err(e) => break Err(ProxyError::Io(e)),
                },
            }
        };

        // Connection tasks still hold event senders; killing the broker
        // closes the channel, which unwinds them on their next send.
        drop(event_tx);
        broker.abort();
        let _ = broker.await;
        info!("proxy stopped");
        result
    }
}

// ---------------------------------------------------------------------------
// Forwarding core (single task)
// ---------------------------------------------------------------------------

struct SubscriberState {
    data_tx: mpsc::Sender<Vec<Vec<u8>>>,
    prefixes: HashSet<Vec<u8>>,
}

async fn broker_loop(mut event_rx: mpsc::Receiver<Event>) {
    let mut publishers: HashMap<u64, mpsc::Sender<(Vec<u8>, bool)>> = HashMap::new();
    let mut subscribers: HashMap<u64, SubscriberState> = HashMap::new();
    // Refcount per prefix across all subscribers; unsubscribe goes
    // upstream when a count reaches zero.
    let mut sub_counts: HashMap<Vec<u8>, usize> = HashMap::new();

    while let Some(event) = event_rx.recv().await {
        match event {
            Event::Publish(frames) => {
                let Some(topic) = frames.first() else { continue };
                for (id, sub) in &subscribers {
                    if !sub.prefixes.iter().any(|p| topic.starts_with(p.as_slice())) {
                        continue;
                    }
                    if let Err(mpsc::error::TrySendError::Full(_)) =
                        sub.data_tx.try_send(frames.clone())
                    {
                        warn!(subscriber = id, "subscriber queue full, message dropped");
                    }
                }
            }
            Event::PublisherJoined { id, ctl_tx } => {
                // Verbose propagation: a late joiner gets the whole set.
                for prefix in sub_counts.keys() {
                    let _ = ctl_tx.send((prefix.clone(), true)).await;
                }
                publishers.insert(id, ctl_tx);
            }
            Event::PublisherLeft { id } => {
                publishers.remove(&id);
            }
            Event::SubscriberJoined { id, data_tx } => {
                subscribers.insert(
                    id,
                    SubscriberState {
                        data_tx,
                        prefixes: HashSet::new(),
                    },
                );
            }
            Event::SubscriberCtl { id, prefix, on } => {
                let Some(sub) = subscribers.get_mut(&id) else { continue };
                if on {
                    if !sub.prefixes.insert(prefix.clone()) {
                        continue; // duplicate subscribe on one socket
                    }
                    *sub_counts.entry(prefix.clone()).or_insert(0) += 1;
                    debug!(
                        subscriber = id,
                        prefix = %String::from_utf8_lossy(&prefix),
                        "subscribe forwarded upstream"
                    );
                    for ctl_tx in publishers.values() {
                        let _ = ctl_tx.send((prefix.clone(), true)).await;
                    }
                } else {
                    if !sub.prefixes.remove(&prefix) {
                        continue;
                    }
                    if release_prefix(&mut sub_counts, &prefix) {
                        for ctl_tx in publishers.values() {
                            let _ = ctl_tx.send((prefix.clone(), false)).await;
                        }
                    }
                }
            }
            Event::SubscriberLeft { id } => {
                let Some(sub) = subscribers.remove(&id) else { continue };
                for prefix in sub.prefixes {
                    if release_prefix(&mut sub_counts, &prefix) {
                        for ctl_tx in publishers.values() {
                            let _ = ctl_tx.send((prefix.clone(), false)).await;
                        }
                    }
                }
            }
        }
    }
}

/// Decrement a prefix refcount; true when the last holder dropped it.
fn release_prefix(sub_counts: &mut HashMap<Vec<u8>, usize>, prefix: &[u8]) -> bool {
    match sub_counts.get_mut(prefix) {
        Some(count) if *count > 1 => {
            *count -= 1;
            false
        }
        Some(_) => {
            sub_counts.remove(prefix);
            true
        }
        None => false,
    }
}

// ---------------------------------------------------------------------------
// Per-connection tasks
// ---------------------------------------------------------------------------

/// XSUB side: read data messages from one publisher, write subscription
/// frames back down the same connection.
async fn publisher_conn(id: u64, stream: TcpStream, event_tx: mpsc::Sender<Event>) {
    let (mut read_half, mut write_half) = stream.into_split();
    let (ctl_tx, mut ctl_rx) = mpsc::channel::<(Vec<u8>, bool)>(1024);

    if event_tx
        .send(Event::PublisherJoined { id, ctl_tx })
        .await
        .is_err()
    {
        return;
    }

    let writer = tokio::spawn(async move {
        while let Some((prefix, on)) = ctl_rx.recv().await {
            if write_subscription(&mut write_half, &prefix, on)
                .await
                .is_err()
            {
                break;
            }
        }
    });

    loop {
        match read_message(&mut read_half).await {
            Ok(WireMessage::Data(frames)) => {
                if event_tx.send(Event::Publish(frames)).await.is_err() {
                    break;
                }
            }
            Ok(_) => {
                warn!(id, "subscription frame from a publisher ignored");
            }
            Err(_) => break,
        }
    }

    let _ = event_tx.send(Event::PublisherLeft { id }).await;
    writer.abort();
    debug!(id, "publisher disconnected");
}

/// XPUB side: read subscription frames from one subscriber, write matched
/// data messages back down the same connection.
async fn subscriber_conn(id: u64, stream: TcpStream, event_tx: mpsc::Sender<Event>, hwm: usize) {
    let (mut read_half, mut write_half) = stream.into_split();
    let (data_tx, mut data_rx) = mpsc::channel::<Vec<Vec<u8>>>(hwm);

    if event_tx
        .send(Event::SubscriberJoined { id, data_tx })
        .await
        .is_err()
    {
        return;
    }

    let writer = tokio::spawn(async move {
        while let Some(frames) = data_rx.recv().await {
            if write_data(&mut write_half, &frames).await.is_err() {
                break;
            }
        }
    });

    loop {
        match read_message(&mut read_half).await {
            Ok(WireMessage::Subscribe(prefix)) => {
                if event_tx
                    .send(Event::SubscriberCtl {
                        id,
                        prefix,
                        on: true,
                    })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Ok(WireMessage::Unsubscribe(prefix)) => {
                if event_tx
                    .send(Event::SubscriberCtl {
                        id,
                        prefix,
                        on: false,
                    })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Ok(WireMessage::Data(_)) => {
                warn!(id, "data message from a subscriber ignored");
            }
            Err(_) => break,
        }
    }

    let _ = event_tx.send(Event::SubscriberLeft { id }).await;
    writer.abort();
    debug!(id, "subscriber disconnected");
}
