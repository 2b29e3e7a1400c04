//! Multi-node tests for the channel source.
//!
//! Every test builds nodes over one in-process [`BroadcastHub`](crate::BroadcastHub):
//!
//! - `harness.rs`      - Nodes, a raw probe endpoint and record helpers
//! - `round_trip.rs`   - push/update/pull/query between two nodes
//! - `idempotence.rs`  - Transform log short-circuits and `sync` replication
//! - `hooks.rs`        - Before/after/fail listeners on the proxying node
//! - `correlation.rs`  - Concurrent requests, dangling and duplicate replies
//! - `serialization.rs` - The request queue keeps store access one at a time
//! - `lifecycle.rs`    - activate/deactivate, channel names, request timeout

mod correlation;
pub(crate) mod harness;
