//! Data source backed by a shared broadcast channel.
//!
//! This crate provides:
//! - ChannelSource: outbound `sync`/`push`/`update`/`pull`/`query` with reply correlation
//! - CorrelationTable: pending requests keyed by request ID
//! - Listeners: before/after/fail hooks run around proxied requests
//! - LocalStore: the data authority requests are proxied into, plus MemoryStore
//! - BroadcastHub: in-process broadcast medium where senders never hear themselves

mod capabilities;
mod correlation;
mod error;
mod hooks;
mod proxy;
mod queue;
mod source;
mod store;
mod transport;

pub use capabilities::{Pullable, Pushable, Queryable, Syncable, Updatable};
pub use correlation::{CorrelationTable, ReplyOutcome};
pub use error::{SourceError, SourceResult};
pub use hooks::{
    HookArgs, HookEvent, HookSubject, Hints, ListenerFn, ListenerFuture, ListenerId, Listeners,
};
pub use source::{ChannelSource, SourceConfig, SourceStats};
pub use channel_protocol_types::DEFAULT_CHANNEL_NAME;
pub use store::{LocalStore, MemoryStore};
pub use transport::{BroadcastHub, ChannelReceiver, ChannelSender};

pub use channel_protocol_types as protocol;

#[cfg(test)]
mod tests;
