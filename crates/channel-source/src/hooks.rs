//! Lifecycle listeners and their two dispatch modes.
//!
//! Listeners are registered per [`HookEvent`] and always run in registration
//! order. `fulfill_in_series` stops at the first listener that supplies a
//! value (or fails); `settle_in_series` runs every listener and only logs
//! failures.

use crate::SourceResult;
use channel_protocol_types::{ErrorInfo, Query, RequestKind, Transform};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Named points in the lifecycle of a proxied or locally applied request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    BeforeSync,
    Sync,
    SyncFail,
    BeforeWrite,
    Write,
    WriteFail,
    BeforeRead,
    Read,
    ReadFail,
}

impl HookEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::BeforeSync => "before_sync",
            HookEvent::Sync => "sync",
            HookEvent::SyncFail => "sync_fail",
            HookEvent::BeforeWrite => "before_write",
            HookEvent::Write => "write",
            HookEvent::WriteFail => "write_fail",
            HookEvent::BeforeRead => "before_read",
            HookEvent::Read => "read",
            HookEvent::ReadFail => "read_fail",
        }
    }
}

/// The transform or query a listener is being told about.
#[derive(Debug, Clone)]
pub enum HookSubject {
    Transform(Arc<Transform>),
    Query(Arc<Query>),
}

impl HookSubject {
    pub fn id(&self) -> &str {
        match self {
            HookSubject::Transform(transform) => &transform.id,
            HookSubject::Query(query) => &query.id,
        }
    }

    pub fn transform(&self) -> Option<&Transform> {
        match self {
            HookSubject::Transform(transform) => Some(transform),
            HookSubject::Query(_) => None,
        }
    }

    pub fn query(&self) -> Option<&Query> {
        match self {
            HookSubject::Query(query) => Some(query),
            HookSubject::Transform(_) => None,
        }
    }
}

/// Arguments handed to every listener.
#[derive(Debug, Clone)]
pub struct HookArgs {
    /// Which request kind triggered the hook.
    pub kind: RequestKind,
    pub subject: HookSubject,
    /// Result produced so far (set for after-hooks).
    pub result: Option<Value>,
    /// Failure being reported (set for fail-hooks).
    pub error: Option<ErrorInfo>,
}

impl HookArgs {
    pub fn for_transform(kind: RequestKind, transform: Arc<Transform>) -> Self {
        Self {
            kind,
            subject: HookSubject::Transform(transform),
            result: None,
            error: None,
        }
    }

    pub fn for_query(kind: RequestKind, query: Arc<Query>) -> Self {
        Self {
            kind,
            subject: HookSubject::Query(query),
            result: None,
            error: None,
        }
    }

    pub fn with_result(mut self, result: Option<Value>) -> Self {
        self.result = result;
        self
    }

    pub fn with_error(mut self, error: ErrorInfo) -> Self {
        self.error = Some(error);
        self
    }
}

/// Scratch value filled in by "before" listeners for one proxied request.
#[derive(Debug, Default)]
pub struct Hints {
    pub data: Option<Value>,
}

impl Hints {
    pub fn take(&mut self) -> Option<Value> {
        self.data.take()
    }
}

/// Boxed listener future.
pub type ListenerFuture = Pin<Box<dyn Future<Output = SourceResult<Option<Value>>> + Send>>;

/// Listener function type.
pub type ListenerFn = Arc<dyn Fn(HookArgs) -> ListenerFuture + Send + Sync>;

/// Handle returned by [`Listeners::on`], used to remove a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Ordered listener lists keyed by lifecycle event.
#[derive(Default)]
pub struct Listeners {
    by_event: RwLock<HashMap<HookEvent, Vec<(ListenerId, ListenerFn)>>>,
    next_id: AtomicU64,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener at the end of the event's list.
    pub fn on<F, Fut>(&self, event: HookEvent, listener: F) -> ListenerId
    where
        F: Fn(HookArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SourceResult<Option<Value>>> + Send + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let boxed: ListenerFn =
            Arc::new(move |args: HookArgs| -> ListenerFuture { Box::pin(listener(args)) });
        self.by_event
            .write()
            .entry(event)
            .or_default()
            .push((id, boxed));
        id
    }

    /// Remove a previously registered listener.
    pub fn off(&self, event: HookEvent, id: ListenerId) -> bool {
        let mut by_event = self.by_event.write();
        match by_event.get_mut(&event) {
            Some(list) => {
                let before = list.len();
                list.retain(|(listener_id, _)| *listener_id != id);
                list.len() != before
            }
            None => false,
        }
    }

    pub fn count(&self, event: HookEvent) -> usize {
        self.by_event
            .read()
            .get(&event)
            .map(|list| list.len())
            .unwrap_or(0)
    }

    // Snapshot so no lock is held across listener awaits.
    fn snapshot(&self, event: HookEvent) -> Vec<ListenerFn> {
        self.by_event
            .read()
            .get(&event)
            .map(|list| list.iter().map(|(_, f)| f.clone()).collect())
            .unwrap_or_default()
    }

    /// Run listeners in order until one supplies a value.
    ///
    /// The supplied value is stored in `hints`. Returns `Ok(true)` if some
    /// listener fulfilled, `Ok(false)` if none did, and the first listener
    /// error otherwise.
    pub async fn fulfill_in_series(
        &self,
        event: HookEvent,
        args: HookArgs,
        hints: &mut Hints,
    ) -> SourceResult<bool> {
        for listener in self.snapshot(event) {
            if let Some(value) = listener(args.clone()).await? {
                debug!(event = event.as_str(), id = %args.subject.id(), "Listener fulfilled");
                hints.data = Some(value);
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Run every listener regardless of outcome. Returns the failure count.
    pub async fn settle_in_series(&self, event: HookEvent, args: HookArgs) -> usize {
        let mut failures = 0;
        for listener in self.snapshot(event) {
            if let Err(e) = listener(args.clone()).await {
                failures += 1;
                warn!(
                    event = event.as_str(),
                    id = %args.subject.id(),
                    error = %e,
                    "Listener failed"
                );
            }
        }
        failures
    }
}
