//! In-process broadcast medium and channel endpoints.
//!
//! A [`BroadcastHub`] hands out named channels. Every endpoint opened on the
//! same name sees every message sent by every other endpoint, but never its
//! own: the hub fans each message out to every registered endpoint except
//! the one that sent it.
//!
//! Each endpoint has its own unbounded inbox, so a slow receiver never
//! loses messages.
//!
//! Messages travel as JSON text, so whatever reaches a receiver has gone
//! through the same encode/decode path a cross-process medium would use.

use crate::{SourceError, SourceResult};
use channel_protocol_types::Message;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

type Inbox = mpsc::UnboundedSender<Arc<str>>;
type Channels = Arc<Mutex<HashMap<String, HashMap<Uuid, Inbox>>>>;

/// Named broadcast channels shared by every node in the process.
#[derive(Clone, Default)]
pub struct BroadcastHub {
    channels: Channels,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an endpoint on the named channel, creating the channel if needed.
    pub fn open(&self, channel_name: &str) -> (ChannelSender, ChannelReceiver) {
        let origin = Uuid::new_v4();
        let (inbox, receiver) = mpsc::unbounded_channel();
        self.channels
            .lock()
            .entry(channel_name.to_string())
            .or_default()
            .insert(origin, inbox);

        let closed = Arc::new(AtomicBool::new(false));
        debug!(channel = %channel_name, origin = %origin, "Opened channel endpoint");

        let endpoint = Endpoint {
            channels: self.channels.clone(),
            channel_name: channel_name.to_string(),
            origin,
            closed,
        };
        (
            ChannelSender {
                endpoint: endpoint.clone(),
            },
            ChannelReceiver { endpoint, receiver },
        )
    }

    /// Number of open endpoints listening on a channel.
    pub fn listener_count(&self, channel_name: &str) -> usize {
        self.channels
            .lock()
            .get(channel_name)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    /// Remove a channel once nobody listens on it anymore.
    pub fn cleanup(&self, channel_name: &str) {
        let mut channels = self.channels.lock();
        if channels.get(channel_name).is_some_and(HashMap::is_empty) {
            channels.remove(channel_name);
        }
    }
}

/// State shared by both halves of one endpoint.
#[derive(Clone)]
struct Endpoint {
    channels: Channels,
    channel_name: String,
    origin: Uuid,
    closed: Arc<AtomicBool>,
}

impl Endpoint {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Drop this endpoint's inbox from the hub. The receiver then drains and ends.
    fn deregister(&self) {
        if let Some(endpoints) = self.channels.lock().get_mut(&self.channel_name) {
            endpoints.remove(&self.origin);
        }
    }
}

/// Sending half of a channel endpoint.
#[derive(Clone)]
pub struct ChannelSender {
    endpoint: Endpoint,
}

impl ChannelSender {
    /// Deliver a message to every other endpoint on the channel.
    ///
    /// A message nobody else is listening for is not an error; the medium
    /// simply drops it.
    pub fn send(&self, message: &Message) -> SourceResult<()> {
        if self.is_closed() {
            return Err(SourceError::ChannelClosed);
        }

        let payload: Arc<str> = message.to_json()?.into();
        let channels = self.endpoint.channels.lock();
        let peers = channels
            .get(&self.endpoint.channel_name)
            .into_iter()
            .flatten()
            .filter(|(origin, _)| **origin != self.endpoint.origin);

        let mut delivered = 0usize;
        for (_, inbox) in peers {
            // A peer whose receiver is gone deregisters itself on drop.
            if inbox.send(payload.clone()).is_ok() {
                delivered += 1;
            }
        }
        debug!(
            channel = %self.endpoint.channel_name,
            id = %message.id(),
            delivered,
            "Sent message"
        );
        Ok(())
    }

    /// Close this endpoint. Both halves stop working; closing twice is a no-op.
    pub fn close(&self) {
        if !self.endpoint.closed.swap(true, Ordering::SeqCst) {
            self.endpoint.deregister();
            debug!(
                channel = %self.endpoint.channel_name,
                origin = %self.endpoint.origin,
                "Closed channel endpoint"
            );
        }
    }

    pub fn is_closed(&self) -> bool {
        self.endpoint.is_closed()
    }

    pub fn channel_name(&self) -> &str {
        &self.endpoint.channel_name
    }
}

/// Receiving half of a channel endpoint.
pub struct ChannelReceiver {
    endpoint: Endpoint,
    receiver: mpsc::UnboundedReceiver<Arc<str>>,
}

impl ChannelReceiver {
    /// Receive the next message from another endpoint.
    ///
    /// Skips payloads that fail to decode. Returns `None` once the endpoint
    /// is closed.
    pub async fn recv(&mut self) -> Option<Message> {
        loop {
            if self.endpoint.is_closed() {
                return None;
            }

            let payload = self.receiver.recv().await?;
            if self.endpoint.is_closed() {
                return None;
            }
            match Message::from_json(&payload) {
                Ok(message) => return Some(message),
                Err(e) => {
                    warn!(
                        channel = %self.endpoint.channel_name,
                        error = %e,
                        "Failed to decode channel message"
                    );
                }
            }
        }
    }
}

impl Drop for ChannelReceiver {
    fn drop(&mut self) {
        self.endpoint.deregister();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn peers_receive_but_sender_does_not() {
        let hub = BroadcastHub::new();
        let (a_tx, mut a_rx) = hub.open("test");
        let (_b_tx, mut b_rx) = hub.open("test");

        a_tx.send(&Message::success("m1", None)).unwrap();

        let received = b_rx.recv().await.unwrap();
        assert_eq!(received.id(), "m1");

        let own = tokio::time::timeout(Duration::from_millis(50), a_rx.recv()).await;
        assert!(own.is_err(), "sender should not hear its own message");
    }

    #[tokio::test]
    async fn channels_are_isolated_by_name() {
        let hub = BroadcastHub::new();
        let (a_tx, _a_rx) = hub.open("one");
        let (_b_tx, mut b_rx) = hub.open("two");

        a_tx.send(&Message::success("m1", None)).unwrap();

        let result = tokio::time::timeout(Duration::from_millis(50), b_rx.recv()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn closed_sender_rejects_sends() {
        let hub = BroadcastHub::new();
        let (tx, _rx) = hub.open("test");

        tx.close();
        tx.close();

        assert!(tx.is_closed());
        assert!(matches!(
            tx.send(&Message::success("m1", None)),
            Err(SourceError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn closed_receiver_yields_none() {
        let hub = BroadcastHub::new();
        let (tx, mut rx) = hub.open("test");

        tx.close();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn close_wakes_a_waiting_receiver() {
        let hub = BroadcastHub::new();
        let (tx, mut rx) = hub.open("test");

        let waiting = tokio::spawn(async move { rx.recv().await });
        tokio::task::yield_now().await;
        tx.close();

        let result = tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn idle_receiver_keeps_every_message() {
        let hub = BroadcastHub::new();
        let (a_tx, _a_rx) = hub.open("test");
        let (_b_tx, mut b_rx) = hub.open("test");

        for i in 0..1_000 {
            a_tx.send(&Message::success(&format!("m{i}"), None)).unwrap();
        }

        for i in 0..1_000 {
            assert_eq!(b_rx.recv().await.unwrap().id(), format!("m{i}"));
        }
    }

    #[test]
    fn cleanup_removes_unused_channels() {
        let hub = BroadcastHub::new();
        {
            let (_tx, _rx) = hub.open("test");
            assert_eq!(hub.listener_count("test"), 1);
        }
        hub.cleanup("test");
        assert_eq!(hub.listener_count("test"), 0);
    }
}
