//! Test harness for multi-node channel source tests.
//!
//! Provides:
//! - TestNode: a channel source plus the memory store behind it
//! - Probe: a raw endpoint on the same channel for sending and observing messages
//! - Record helpers building transforms and queries over `planet` records

use crate::{BroadcastHub, ChannelReceiver, ChannelSender, ChannelSource, MemoryStore, SourceConfig};
use channel_protocol_types::{
    Message, Query, QueryExpression, Record, RecordIdentity, RecordOperation, Transform,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// How long "nothing happens" assertions wait.
pub const QUIET_PERIOD: Duration = Duration::from_millis(75);

/// A node: channel source plus its local store.
pub struct TestNode {
    pub source: ChannelSource,
    pub store: Arc<MemoryStore>,
}

impl TestNode {
    /// Create and activate a node on the default channel.
    pub fn start(hub: &BroadcastHub) -> Self {
        Self::start_with(hub, SourceConfig::default(), MemoryStore::new())
    }

    pub fn start_with(hub: &BroadcastHub, config: SourceConfig, store: MemoryStore) -> Self {
        let store = Arc::new(store);
        let source = ChannelSource::new(config, hub.clone(), store.clone());
        source.activate();
        Self { source, store }
    }

    /// Round-trip a query through the peer's request queue.
    ///
    /// When it returns, every request this node sent to `peer` before the call
    /// has been fully processed.
    pub async fn barrier(&self) {
        self.source
            .forward_query(find_planets())
            .await
            .expect("barrier query failed");
    }
}

/// A main and a worker node sharing one hub.
pub struct TestNetwork {
    pub hub: BroadcastHub,
    pub main: TestNode,
    pub worker: TestNode,
}

impl TestNetwork {
    pub fn new() -> Self {
        let hub = BroadcastHub::new();
        let main = TestNode::start(&hub);
        let worker = TestNode::start(&hub);
        Self { hub, main, worker }
    }

    /// Network whose worker store takes `delay` per call.
    pub fn with_slow_worker(delay: Duration) -> Self {
        let hub = BroadcastHub::new();
        let main = TestNode::start(&hub);
        let worker = TestNode::start_with(
            &hub,
            SourceConfig::default(),
            MemoryStore::with_access_delay(delay),
        );
        Self { hub, main, worker }
    }

    pub async fn shutdown(self) {
        self.main.source.deactivate().await;
        self.worker.source.deactivate().await;
    }
}

/// Raw endpoint on a channel, outside any channel source.
pub struct Probe {
    pub sender: ChannelSender,
    pub receiver: ChannelReceiver,
}

impl Probe {
    pub fn open(hub: &BroadcastHub, channel_name: &str) -> Self {
        let (sender, receiver) = hub.open(channel_name);
        Self { sender, receiver }
    }

    pub fn send(&self, message: Message) {
        self.sender.send(&message).expect("probe send failed");
    }

    pub async fn next(&mut self) -> Message {
        tokio::time::timeout(Duration::from_secs(2), self.receiver.recv())
            .await
            .expect("probe timed out waiting for a message")
            .expect("probe channel closed")
    }

    /// Assert that no message arrives for [`QUIET_PERIOD`].
    pub async fn assert_silent(&mut self) {
        let received = tokio::time::timeout(QUIET_PERIOD, self.receiver.recv()).await;
        assert!(
            received.is_err(),
            "expected no message, got {:?}",
            received.ok().flatten()
        );
    }
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

pub fn add_planet(transform_id: &str, planet: &str) -> Transform {
    Transform::with_id(
        transform_id,
        vec![RecordOperation::AddRecord {
            record: Record::new("planet", planet).with_attribute("name", json!(planet)),
        }],
    )
}

pub fn rename_planet(transform_id: &str, planet: &str, name: &str) -> Transform {
    Transform::with_id(
        transform_id,
        vec![RecordOperation::ReplaceAttribute {
            record: planet_identity(planet),
            attribute: "name".into(),
            value: json!(name),
        }],
    )
}

pub fn planet_identity(planet: &str) -> RecordIdentity {
    RecordIdentity::new("planet", planet)
}

pub fn find_planet(planet: &str) -> Query {
    Query::new(QueryExpression::FindRecord {
        record: planet_identity(planet),
    })
}

pub fn find_planets() -> Query {
    Query::new(QueryExpression::FindRecords {
        record_type: "planet".into(),
    })
}
