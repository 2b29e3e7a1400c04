//! Strictly ordered request queue.
//!
//! Everything that touches the local store goes through one FIFO queue with a
//! single worker: proxied requests from peers and this node's own replicated
//! transforms. The worker fully awaits each descriptor before pulling the
//! next one.

use crate::proxy::InboundProxy;
use crate::transport::ChannelSender;
use crate::{SourceError, SourceResult};
use channel_protocol_types::{Message, Transform};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info};

/// A unit of work for the queue worker.
pub(crate) enum Descriptor {
    /// Request received from a peer.
    Proxy(Message),
    /// Transform replicated by this node, applied locally.
    LocalSync {
        transform: Arc<Transform>,
        done: oneshot::Sender<SourceResult<Option<Value>>>,
    },
}

impl Descriptor {
    fn id(&self) -> &str {
        match self {
            Descriptor::Proxy(message) => message.id(),
            Descriptor::LocalSync { transform, .. } => &transform.id,
        }
    }
}

/// Enqueue handle. Cloneable; the worker owns the receiving end.
#[derive(Clone)]
pub(crate) struct RequestQueue {
    sender: mpsc::UnboundedSender<Descriptor>,
}

impl RequestQueue {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<Descriptor>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Append a descriptor. Fails once the worker has stopped.
    pub(crate) fn enqueue(&self, descriptor: Descriptor) -> SourceResult<()> {
        self.sender
            .send(descriptor)
            .map_err(|_| SourceError::ChannelClosed)
    }
}

/// Worker loop: pull one descriptor, settle it, repeat.
pub(crate) async fn run_worker(
    mut receiver: mpsc::UnboundedReceiver<Descriptor>,
    proxy: Arc<InboundProxy>,
    replies: ChannelSender,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => {
                info!(channel = %replies.channel_name(), "Request queue shutting down");
                break;
            }
            maybe_descriptor = receiver.recv() => {
                match maybe_descriptor {
                    Some(descriptor) => {
                        debug!(id = %descriptor.id(), "Processing queued request");
                        proxy.process(descriptor, &replies).await;
                    }
                    None => break,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_fails_after_worker_is_gone() {
        let (queue, receiver) = RequestQueue::new();
        drop(receiver);

        let result = queue.enqueue(Descriptor::Proxy(Message::success("x", None)));
        assert!(matches!(result, Err(SourceError::ChannelClosed)));
    }

    #[tokio::test]
    async fn descriptors_come_out_in_arrival_order() {
        let (queue, mut receiver) = RequestQueue::new();
        for id in ["a", "b", "c"] {
            queue
                .enqueue(Descriptor::Proxy(Message::success(id, None)))
                .unwrap();
        }

        let mut seen = Vec::new();
        while let Ok(descriptor) = receiver.try_recv() {
            seen.push(descriptor.id().to_string());
        }
        assert_eq!(seen, vec!["a", "b", "c"]);
    }
}
