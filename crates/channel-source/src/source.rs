//! The channel source: one node's end of the shared broadcast channel.
//!
//! Outbound calls register with the correlation table and suspend until the
//! matching reply arrives. One inbound loop reads the channel: replies go
//! straight to the correlation table, requests go onto the request queue.

use crate::correlation::CorrelationTable;
use crate::hooks::Listeners;
use crate::proxy::InboundProxy;
use crate::queue::{self, Descriptor, RequestQueue};
use crate::store::LocalStore;
use crate::transport::{BroadcastHub, ChannelReceiver, ChannelSender};
use crate::{SourceError, SourceResult};
use channel_protocol_types::{Message, Query, RequestKind, Transform, DEFAULT_CHANNEL_NAME};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Channel source configuration.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Broadcast channel shared by every node of this source.
    pub channel_name: String,
    /// How long a forwarded call waits for its reply. `None` waits forever.
    pub request_timeout: Option<Duration>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            channel_name: DEFAULT_CHANNEL_NAME.to_string(),
            request_timeout: None,
        }
    }
}

impl SourceConfig {
    pub fn with_channel_name(mut self, channel_name: impl Into<String>) -> Self {
        self.channel_name = channel_name.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

/// Point-in-time counters for one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SourceStats {
    pub pending_requests: usize,
    pub dangling_replies: u64,
    pub proxied_requests: u64,
    pub is_active: bool,
}

/// Handles owned while the source is active.
struct Running {
    sender: ChannelSender,
    queue: RequestQueue,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

enum Lifecycle {
    Idle,
    Active(Running),
    Closed,
}

struct SourceInner {
    config: SourceConfig,
    hub: BroadcastHub,
    store: Arc<dyn LocalStore>,
    listeners: Arc<Listeners>,
    correlation: Arc<CorrelationTable>,
    proxy: Arc<InboundProxy>,
    lifecycle: Mutex<Lifecycle>,
}

/// A data source backed by a broadcast channel.
///
/// Cheap to clone; clones share the same node.
#[derive(Clone)]
pub struct ChannelSource {
    inner: Arc<SourceInner>,
}

/// Removes a correlation entry if the caller stops waiting before the reply.
struct PendingRequest<'a> {
    correlation: &'a CorrelationTable,
    id: String,
    armed: bool,
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.correlation.cancel(&self.id);
        }
    }
}

impl ChannelSource {
    /// Create an inactive source over `store`.
    pub fn new(config: SourceConfig, hub: BroadcastHub, store: Arc<dyn LocalStore>) -> Self {
        let listeners = Arc::new(Listeners::new());
        let proxy = Arc::new(InboundProxy::new(store.clone(), listeners.clone()));
        Self {
            inner: Arc::new(SourceInner {
                config,
                hub,
                store,
                listeners,
                correlation: Arc::new(CorrelationTable::new()),
                proxy,
                lifecycle: Mutex::new(Lifecycle::Idle),
            }),
        }
    }

    /// Listener registry consulted when proxying requests.
    pub fn listeners(&self) -> &Listeners {
        &self.inner.listeners
    }

    pub fn config(&self) -> &SourceConfig {
        &self.inner.config
    }

    pub fn channel_name(&self) -> &str {
        &self.inner.config.channel_name
    }

    pub fn is_active(&self) -> bool {
        matches!(*self.inner.lifecycle.lock(), Lifecycle::Active(_))
    }

    /// Open the channel and start the inbound loop and the request queue worker.
    ///
    /// Must be called from within a Tokio runtime. Activating an active
    /// source is a no-op; a deactivated source may be activated again.
    pub fn activate(&self) {
        let mut lifecycle = self.inner.lifecycle.lock();
        if matches!(*lifecycle, Lifecycle::Active(_)) {
            debug!(channel = %self.channel_name(), "Channel source already active");
            return;
        }

        let (sender, receiver) = self.inner.hub.open(self.channel_name());
        let (queue, queue_rx) = RequestQueue::new();
        let (shutdown_tx, _) = broadcast::channel(1);

        let worker = tokio::spawn(queue::run_worker(
            queue_rx,
            self.inner.proxy.clone(),
            sender.clone(),
            shutdown_tx.subscribe(),
        ));
        let inbound = tokio::spawn(run_inbound(
            receiver,
            self.inner.correlation.clone(),
            queue.clone(),
            shutdown_tx.subscribe(),
        ));

        info!(channel = %self.channel_name(), "Channel source activated");
        *lifecycle = Lifecycle::Active(Running {
            sender,
            queue,
            shutdown_tx,
            tasks: vec![inbound, worker],
        });
    }

    /// Close the channel and stop both loops.
    ///
    /// Callers still waiting on a reply fail with [`SourceError::ChannelClosed`].
    /// Safe to call on a source that was never activated, or twice.
    pub async fn deactivate(&self) {
        let running = {
            let mut lifecycle = self.inner.lifecycle.lock();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Closed) {
                Lifecycle::Active(running) => running,
                previous @ (Lifecycle::Idle | Lifecycle::Closed) => {
                    *lifecycle = previous;
                    return;
                }
            }
        };

        let _ = running.shutdown_tx.send(());
        running.sender.close();
        for task in running.tasks {
            task.abort();
            let _ = task.await;
        }

        let abandoned = self.inner.correlation.clear();
        self.inner.hub.cleanup(self.channel_name());
        info!(
            channel = %self.channel_name(),
            abandoned_requests = abandoned,
            "Channel source deactivated"
        );
    }

    /// Send a transform to every peer without waiting, then apply it locally.
    ///
    /// Does nothing if the transform log already has the transform.
    pub async fn replicate(&self, transform: Transform) -> SourceResult<()> {
        let (sender, queue) = self.running_handles()?;

        if self.inner.store.contains_transform(&transform.id).await {
            debug!(transform_id = %transform.id, "Transform already applied, not replicating");
            return Ok(());
        }

        sender.send(&Message::Sync {
            transform: transform.clone(),
        })?;

        let (done, applied) = oneshot::channel();
        queue.enqueue(Descriptor::LocalSync {
            transform: Arc::new(transform),
            done,
        })?;
        applied.await.map_err(|_| SourceError::ChannelClosed)??;
        Ok(())
    }

    /// Forward a `push` or `update` and wait for the peer's outcome.
    ///
    /// Returns `None` without sending anything when the transform log already
    /// has the transform.
    pub async fn forward_write(
        &self,
        kind: RequestKind,
        transform: Transform,
    ) -> SourceResult<Option<Value>> {
        if !matches!(kind, RequestKind::Push | RequestKind::Update) {
            return Err(SourceError::Protocol(format!(
                "{} is not an acknowledged write",
                kind.as_str()
            )));
        }

        self.running_handles()?;
        if self.inner.store.contains_transform(&transform.id).await {
            debug!(transform_id = %transform.id, kind = kind.as_str(), "Transform already applied");
            return Ok(None);
        }

        let message = Message::for_transform(kind, transform).ok_or_else(|| {
            SourceError::Protocol(format!("{} does not carry a transform", kind.as_str()))
        })?;
        self.request(message).await
    }

    /// Forward a `pull` and wait for the peer's result.
    pub async fn forward_read(&self, query: Query) -> SourceResult<Option<Value>> {
        self.request(Message::Pull { query }).await
    }

    /// Forward a `query` and wait for the peer's result.
    ///
    /// A reply without a result yields `Value::Null`.
    pub async fn forward_query(&self, query: Query) -> SourceResult<Value> {
        let result = self.request(Message::Query { query }).await?;
        Ok(result.unwrap_or(Value::Null))
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            pending_requests: self.inner.correlation.len(),
            dangling_replies: self.inner.correlation.dangling_replies(),
            proxied_requests: self.inner.proxy.proxied_requests(),
            is_active: self.is_active(),
        }
    }

    fn running_handles(&self) -> SourceResult<(ChannelSender, RequestQueue)> {
        match &*self.inner.lifecycle.lock() {
            Lifecycle::Active(running) => Ok((running.sender.clone(), running.queue.clone())),
            Lifecycle::Idle => Err(SourceError::NotActivated),
            Lifecycle::Closed => Err(SourceError::ChannelClosed),
        }
    }

    async fn request(&self, message: Message) -> SourceResult<Option<Value>> {
        let (sender, _) = self.running_handles()?;
        let correlation = &self.inner.correlation;
        let id = message.id().to_string();

        // Register before sending so a fast reply always finds its entry.
        let reply = correlation.register(&id)?;
        let mut pending = PendingRequest {
            correlation,
            id: id.clone(),
            armed: true,
        };
        sender.send(&message)?;
        debug!(request_id = %id, "Forwarded request, awaiting reply");

        let outcome = match self.inner.config.request_timeout {
            Some(limit) => match tokio::time::timeout(limit, reply).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(request_id = %id, timeout_ms = limit.as_millis() as u64, "Request timed out");
                    return Err(SourceError::Timeout(id));
                }
            },
            None => reply.await,
        };
        pending.armed = false;

        match outcome {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(info)) => Err(SourceError::Remote(info)),
            Err(_) => Err(SourceError::ChannelClosed),
        }
    }
}

/// Read the channel until shutdown, splitting replies from requests.
async fn run_inbound(
    mut receiver: ChannelReceiver,
    correlation: Arc<CorrelationTable>,
    queue: RequestQueue,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("Inbound loop shutting down");
                break;
            }
            maybe_message = receiver.recv() => {
                let Some(message) = maybe_message else {
                    debug!("Channel closed, inbound loop exiting");
                    break;
                };
                if message.is_reply() {
                    correlation.route(message);
                } else if queue.enqueue(Descriptor::Proxy(message)).is_err() {
                    warn!("Request queue stopped, inbound loop exiting");
                    break;
                }
            }
        }
    }
}
