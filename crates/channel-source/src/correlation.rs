//! Correlation table and reply routing.
//!
//! Every outbound request that expects a reply registers a pending entry under
//! its request ID before the request goes out. The reply router resolves or
//! rejects that entry when a `success`/`error` message with the same ID
//! arrives, and removes it. Replies with no live entry are dropped and
//! counted.

use crate::{SourceError, SourceResult};
use channel_protocol_types::{ErrorInfo, Message};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// What a pending caller eventually receives.
pub type ReplyOutcome = Result<Option<Value>, ErrorInfo>;

/// Pending continuations keyed by request ID.
#[derive(Default)]
pub struct CorrelationTable {
    entries: Mutex<HashMap<String, oneshot::Sender<ReplyOutcome>>>,
    dangling_replies: AtomicU64,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending entry and get the receiver the caller waits on.
    ///
    /// Fails if an entry for `id` is still live.
    pub fn register(&self, id: &str) -> SourceResult<oneshot::Receiver<ReplyOutcome>> {
        let mut entries = self.entries.lock();
        if entries.contains_key(id) {
            return Err(SourceError::DuplicateRequest(id.to_string()));
        }
        let (tx, rx) = oneshot::channel();
        entries.insert(id.to_string(), tx);
        Ok(rx)
    }

    /// Resolve the entry for `id`. Returns false if there was none.
    pub fn resolve(&self, id: &str, result: Option<Value>) -> bool {
        self.settle(id, Ok(result))
    }

    /// Reject the entry for `id`. Returns false if there was none.
    pub fn reject(&self, id: &str, error: ErrorInfo) -> bool {
        self.settle(id, Err(error))
    }

    /// Route a reply message to its pending entry.
    ///
    /// Non-reply messages are ignored. Unknown IDs are counted as dangling.
    pub fn route(&self, message: Message) -> bool {
        match message {
            Message::Success { id, result } => {
                let routed = self.resolve(&id, result);
                if !routed {
                    self.note_dangling(&id, "success");
                }
                routed
            }
            Message::Error { id, error } => {
                let routed = self.reject(&id, error);
                if !routed {
                    self.note_dangling(&id, "error");
                }
                routed
            }
            other => {
                debug!(id = %other.id(), "Ignoring non-reply message in reply router");
                false
            }
        }
    }

    /// Drop the entry for `id` without settling it.
    pub fn cancel(&self, id: &str) -> bool {
        self.entries.lock().remove(id).is_some()
    }

    /// Drop every entry. Waiting callers observe a closed channel.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let count = entries.len();
        entries.clear();
        count
    }

    /// Number of requests still waiting for a reply.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.lock().contains_key(id)
    }

    /// Replies dropped because no entry was waiting for them.
    pub fn dangling_replies(&self) -> u64 {
        self.dangling_replies.load(Ordering::Relaxed)
    }

    fn settle(&self, id: &str, outcome: ReplyOutcome) -> bool {
        let entry = self.entries.lock().remove(id);
        match entry {
            Some(tx) => {
                if tx.send(outcome).is_err() {
                    debug!(request_id = %id, "Caller stopped waiting before the reply arrived");
                }
                true
            }
            None => false,
        }
    }

    fn note_dangling(&self, id: &str, tag: &str) {
        let total = self.dangling_replies.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            request_id = %id,
            reply = tag,
            dangling_total = total,
            "Dropping reply with no pending request"
        );
    }
}
