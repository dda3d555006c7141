//! In-flight request bookkeeping.
//!
//! Each outstanding request owns a single-shot waiter; the listener
//! resolves or rejects it, the invoking task may remove it on timeout, and
//! the sweep cancels entries that outlived the stale cut-off.  Every entry
//! completes exactly once — a resolved entry leaves the table immediately,
//! so duplicate resolutions fall through as no-ops.
//!
//! The table is shared between the listener and any number of invoking
//! tasks; the mutex is never held across an await point.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::debug;

/// Terminal state delivered to a waiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkillReply {
    Success(String),
    Error(String),
}

struct PendingEntry {
    topic: String,
    intent: String,
    tx: oneshot::Sender<SkillReply>,
    created_at: Instant,
}

/// The request id was already in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicateRequestId;

/// Thread-safe map from request id to in-flight waiter.
#[derive(Default)]
pub struct PendingTable {
    inner: Mutex<HashMap<String, PendingEntry>>,
}

impl PendingTable {
    pub fn new() -> Self {
        PendingTable::default()
    }

    /// Register a waiter.  Fails when `request_id` is already active.
    pub fn add(
        &self,
        request_id: &str,
        topic: &str,
        intent: &str,
    ) -> Result<oneshot::Receiver<SkillReply>, DuplicateRequestId> {
        let mut map = self.inner.lock().expect("pending lock");
        if map.contains_key(request_id) {
            return Err(DuplicateRequestId);
        }
        let (tx, rx) = oneshot::channel();
        map.insert(
            request_id.to_owned(),
            PendingEntry {
                topic: topic.to_owned(),
                intent: intent.to_owned(),
                tx,
                created_at: Instant::now(),
            },
        );
        Ok(rx)
    }

    /// Deliver a success; true when a waiter was found.
    pub fn resolve(&self, request_id: &str, content: String) -> bool {
        self.complete(request_id, SkillReply::Success(content))
    }

    /// Deliver an error; true when a waiter was found.
    pub fn reject(&self, request_id: &str, error: String) -> bool {
        self.complete(request_id, SkillReply::Error(error))
    }

    fn complete(&self, request_id: &str, reply: SkillReply) -> bool {
        let entry = self.inner.lock().expect("pending lock").remove(request_id);
        match entry {
            Some(entry) => {
                // A receiver dropped mid-flight (timed-out invoke) makes
                // this send fail; the entry is gone either way.
                let _ = entry.tx.send(reply);
                true
            }
            None => false,
        }
    }

    /// Drop an entry without completing it (timeout path).  The waiter
    /// observes cancellation.
    pub fn remove(&self, request_id: &str) -> bool {
        self.inner
            .lock()
            .expect("pending lock")
            .remove(request_id)
            .is_some()
    }

    /// Cancel and remove entries older than `max_age`; returns how many.
    pub fn sweep(&self, max_age: Duration) -> usize {
        let mut map = self.inner.lock().expect("pending lock");
        let before = map.len();
        map.retain(|request_id, entry| {
            let stale = entry.created_at.elapsed() > max_age;
            if stale {
                debug!(
                    request_id = %request_id,
                    topic = %entry.topic,
                    intent = %crate::truncate(&entry.intent, 60),
                    "stale pending request cancelled"
                );
            }
            !stale
        });
        before - map.len()
    }

    /// Cancel everything (client shutdown); returns how many.
    pub fn cancel_all(&self) -> usize {
        let mut map = self.inner.lock().expect("pending lock");
        let count = map.len();
        map.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("pending lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
