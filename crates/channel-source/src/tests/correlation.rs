//! Reply correlation across concurrent requests.
//!
//! Behaviors covered:
//! - Concurrent requests each resolve with their own reply
//! - Replies with no pending request are dropped and counted
//! - With two peers answering, the first reply wins and the second dangles
//! - A burst of requests larger than any channel buffer all resolve
//! - A live request ID cannot be reused

use super::harness::{add_planet, eventually, find_planet, Probe, TestNetwork, TestNode};
use crate::{BroadcastHub, Pullable, Pushable, SourceError, DEFAULT_CHANNEL_NAME};
use channel_protocol_types::{error_codes, ErrorInfo, Message, RequestKind};
use serde_json::json;
use std::time::Duration;
use tokio::task::JoinSet;

#[tokio::test]
async fn concurrent_pulls_resolve_with_their_own_records() {
    let net = TestNetwork::new();
    let planets = ["mercury", "venus", "earth", "mars", "jupiter"];
    for planet in planets {
        net.main
            .source
            .push(add_planet(&format!("add-{planet}"), planet))
            .await
            .unwrap();
    }

    let mut pulls = JoinSet::new();
    for planet in planets {
        let source = net.main.source.clone();
        pulls.spawn(async move { (planet, source.pull(find_planet(planet)).await) });
    }

    let mut resolved = 0;
    while let Some(joined) = pulls.join_next().await {
        let (planet, result) = joined.unwrap();
        let record = result.unwrap().unwrap();
        assert_eq!(record["id"], json!(planet));
        resolved += 1;
    }
    assert_eq!(resolved, planets.len());
    assert_eq!(net.main.source.stats().pending_requests, 0);

    net.shutdown().await;
}

#[tokio::test]
async fn concurrent_mixed_outcomes_reach_the_right_callers() {
    let net = TestNetwork::new();
    net.main.source.push(add_planet("seed", "earth")).await.unwrap();

    let main = net.main.source.clone();
    let found = tokio::spawn(async move { main.pull(find_planet("earth")).await });
    let main = net.main.source.clone();
    let missing = tokio::spawn(async move { main.pull(find_planet("pluto")).await });

    let found = found.await.unwrap().unwrap();
    let missing = missing.await.unwrap().unwrap_err();

    assert_eq!(found.unwrap()["id"], json!("earth"));
    assert!(matches!(missing, SourceError::Remote(info) if info.code == error_codes::NOT_FOUND));
    net.shutdown().await;
}

#[tokio::test]
async fn request_burst_behind_a_slow_worker_loses_nothing() {
    const BURST: usize = 400;
    let net = TestNetwork::with_slow_worker(Duration::from_millis(1));

    let mut pushes = JoinSet::new();
    for i in 0..BURST {
        let source = net.main.source.clone();
        pushes.spawn(async move {
            source
                .push(add_planet(&format!("burst-{i}"), &format!("planet-{i}")))
                .await
        });
    }

    let mut resolved = 0;
    while let Some(joined) = tokio::time::timeout(Duration::from_secs(30), pushes.join_next())
        .await
        .expect("push burst stalled")
    {
        assert!(joined.unwrap().unwrap().is_none());
        resolved += 1;
    }

    assert_eq!(resolved, BURST);
    assert_eq!(net.worker.store.applied_count(), BURST);
    assert_eq!(net.main.source.stats().pending_requests, 0);
    net.shutdown().await;
}

#[tokio::test]
async fn dangling_reply_is_dropped_and_counted() {
    let hub = BroadcastHub::new();
    let main = TestNode::start(&hub);
    let worker = TestNode::start(&hub);
    let probe = Probe::open(&hub, DEFAULT_CHANNEL_NAME);

    probe.send(Message::success("never-sent", Some(json!(1))));
    probe.send(Message::error(
        "also-never-sent",
        ErrorInfo::new(error_codes::INTERNAL_ERROR, "stray"),
    ));

    let source = main.source.clone();
    assert!(eventually(|| source.stats().dangling_replies == 2).await);

    // The node keeps working afterwards.
    let result = main.source.push(add_planet("t1", "earth")).await.unwrap();
    assert!(result.is_none());
    assert_eq!(main.source.stats().pending_requests, 0);

    main.source.deactivate().await;
    worker.source.deactivate().await;
}

#[tokio::test]
async fn second_peer_reply_dangles() {
    let hub = BroadcastHub::new();
    let main = TestNode::start(&hub);
    let first = TestNode::start(&hub);
    let second = TestNode::start(&hub);

    main.source.push(add_planet("t1", "earth")).await.unwrap();

    let source = main.source.clone();
    assert!(eventually(|| source.stats().dangling_replies == 1).await);
    assert_eq!(source.stats().pending_requests, 0);
    assert_eq!(first.source.stats().proxied_requests, 1);
    assert_eq!(second.source.stats().proxied_requests, 1);

    for node in [main, first, second] {
        node.source.deactivate().await;
    }
}

#[tokio::test]
async fn live_request_id_cannot_be_reused() {
    let hub = BroadcastHub::new();
    // No peers, so the first push waits indefinitely.
    let main = TestNode::start(&hub);

    let source = main.source.clone();
    let waiting = tokio::spawn(async move {
        source
            .forward_write(RequestKind::Push, add_planet("dup", "earth"))
            .await
    });
    let source = main.source.clone();
    assert!(eventually(|| source.stats().pending_requests == 1).await);

    let err = main
        .source
        .forward_write(RequestKind::Update, add_planet("dup", "earth"))
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::DuplicateRequest(id) if id == "dup"));
    assert_eq!(main.source.stats().pending_requests, 1);

    main.source.deactivate().await;
    let first = waiting.await.unwrap();
    assert!(matches!(first, Err(SourceError::ChannelClosed)));
}

#[tokio::test]
async fn abandoned_call_releases_its_request_id() {
    let hub = BroadcastHub::new();
    let main = TestNode::start(&hub);

    let source = main.source.clone();
    let waiting = tokio::spawn(async move { source.push(add_planet("t1", "earth")).await });
    let source = main.source.clone();
    assert!(eventually(|| source.stats().pending_requests == 1).await);

    waiting.abort();
    let _ = waiting.await;

    assert_eq!(main.source.stats().pending_requests, 0);
    main.source.deactivate().await;
}
