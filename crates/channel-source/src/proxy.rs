//! Inbound proxy: executes requests forwarded by peers against the local store.
//!
//! Each request runs its "before" listeners first. The first listener that
//! supplies a value provides the result and the store is not consulted;
//! otherwise the store handles it. The "after" or "fail" listeners are then
//! notified and, for every kind except `sync`, the outcome is sent back under
//! the original request ID.

use crate::hooks::{HookArgs, HookEvent, Hints, Listeners};
use crate::queue::Descriptor;
use crate::store::LocalStore;
use crate::transport::ChannelSender;
use crate::SourceResult;
use channel_protocol_types::{Message, Query, RequestKind, Transform};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Before, after and fail events for one transform request kind.
struct TransformEvents {
    before: HookEvent,
    after: HookEvent,
    fail: HookEvent,
}

const SYNC_EVENTS: TransformEvents = TransformEvents {
    before: HookEvent::BeforeSync,
    after: HookEvent::Sync,
    fail: HookEvent::SyncFail,
};

const WRITE_EVENTS: TransformEvents = TransformEvents {
    before: HookEvent::BeforeWrite,
    after: HookEvent::Write,
    fail: HookEvent::WriteFail,
};

pub(crate) struct InboundProxy {
    store: Arc<dyn LocalStore>,
    listeners: Arc<Listeners>,
    proxied: AtomicU64,
}

impl InboundProxy {
    pub(crate) fn new(store: Arc<dyn LocalStore>, listeners: Arc<Listeners>) -> Self {
        Self {
            store,
            listeners,
            proxied: AtomicU64::new(0),
        }
    }

    /// Requests from peers processed so far.
    pub(crate) fn proxied_requests(&self) -> u64 {
        self.proxied.load(Ordering::Relaxed)
    }

    /// Settle one queued descriptor. Never fails; failures become replies or logs.
    pub(crate) async fn process(&self, descriptor: Descriptor, replies: &ChannelSender) {
        match descriptor {
            Descriptor::Proxy(message) => {
                self.proxied.fetch_add(1, Ordering::Relaxed);
                self.proxy(message, replies).await;
            }
            Descriptor::LocalSync { transform, done } => {
                let outcome = self.sync(transform).await;
                if done.send(outcome).is_err() {
                    debug!("Local replicate caller went away before apply finished");
                }
            }
        }
    }

    async fn proxy(&self, message: Message, replies: &ChannelSender) {
        match message {
            Message::Sync { transform } => {
                let id = transform.id.clone();
                if let Err(e) = self.sync(Arc::new(transform)).await {
                    warn!(transform_id = %id, error = %e, "Failed to apply synced transform");
                }
            }
            Message::Push { transform } => {
                self.write(RequestKind::Push, Arc::new(transform), replies)
                    .await
            }
            Message::Update { transform } => {
                self.write(RequestKind::Update, Arc::new(transform), replies)
                    .await
            }
            Message::Pull { query } => self.read(RequestKind::Pull, Arc::new(query), replies).await,
            Message::Query { query } => {
                self.read(RequestKind::Query, Arc::new(query), replies)
                    .await
            }
            reply => {
                debug!(id = %reply.id(), "Reply reached the request queue, ignoring");
            }
        }
    }

    async fn sync(&self, transform: Arc<Transform>) -> SourceResult<Option<Value>> {
        if self.store.contains_transform(&transform.id).await {
            debug!(transform_id = %transform.id, "Transform already applied, skipping sync");
            return Ok(None);
        }
        self.run_transform(RequestKind::Sync, transform, &SYNC_EVENTS)
            .await
    }

    async fn write(&self, kind: RequestKind, transform: Arc<Transform>, replies: &ChannelSender) {
        let id = transform.id.clone();
        let reply = if self.store.contains_transform(&id).await {
            debug!(transform_id = %id, kind = kind.as_str(), "Transform already applied, acknowledging");
            Message::success(&id, None)
        } else {
            match self.run_transform(kind, transform, &WRITE_EVENTS).await {
                Ok(result) => Message::success(&id, result),
                Err(e) => Message::error(&id, e.to_error_info()),
            }
        };
        send_reply(replies, reply);
    }

    async fn read(&self, kind: RequestKind, query: Arc<Query>, replies: &ChannelSender) {
        let id = query.id.clone();
        let args = HookArgs::for_query(kind, query.clone());

        let outcome: SourceResult<Option<Value>> = async {
            let mut hints = Hints::default();
            if self
                .listeners
                .fulfill_in_series(HookEvent::BeforeRead, args.clone(), &mut hints)
                .await?
            {
                Ok(hints.take())
            } else {
                Ok(Some(self.store.evaluate(&query).await?))
            }
        }
        .await;

        let reply = match outcome {
            Ok(result) => {
                self.listeners
                    .settle_in_series(HookEvent::Read, args.with_result(result.clone()))
                    .await;
                Message::success(&id, result)
            }
            Err(e) => {
                let info = e.to_error_info();
                debug!(query_id = %id, kind = kind.as_str(), error = %e, "Proxied read failed");
                self.listeners
                    .settle_in_series(HookEvent::ReadFail, args.with_error(info.clone()))
                    .await;
                Message::error(&id, info)
            }
        };
        send_reply(replies, reply);
    }

    /// Before listeners, then the store if none fulfilled, then after or fail
    /// listeners.
    async fn run_transform(
        &self,
        kind: RequestKind,
        transform: Arc<Transform>,
        events: &TransformEvents,
    ) -> SourceResult<Option<Value>> {
        let args = HookArgs::for_transform(kind, transform.clone());

        let outcome: SourceResult<Option<Value>> = async {
            let mut hints = Hints::default();
            if self
                .listeners
                .fulfill_in_series(events.before, args.clone(), &mut hints)
                .await?
            {
                Ok(hints.take())
            } else {
                self.store.apply(&transform).await
            }
        }
        .await;

        match outcome {
            Ok(result) => {
                self.listeners
                    .settle_in_series(events.after, args.with_result(result.clone()))
                    .await;
                Ok(result)
            }
            Err(e) => {
                debug!(
                    transform_id = %transform.id,
                    kind = kind.as_str(),
                    error = %e,
                    "Transform failed"
                );
                self.listeners
                    .settle_in_series(events.fail, args.with_error(e.to_error_info()))
                    .await;
                Err(e)
            }
        }
    }
}

fn send_reply(replies: &ChannelSender, reply: Message) {
    if let Err(e) = replies.send(&reply) {
        warn!(id = %reply.id(), error = %e, "Failed to send reply");
    }
}
