//! Capability roles a data source can play.
//!
//! Orchestration code depends on these traits rather than on
//! [`ChannelSource`] so a channel source can stand in for any other source.

use crate::source::ChannelSource;
use crate::SourceResult;
use async_trait::async_trait;
use channel_protocol_types::{Query, RequestKind, Transform};
use serde_json::Value;

/// Fire-and-forget replication.
#[async_trait]
pub trait Syncable {
    async fn sync(&self, transform: Transform) -> SourceResult<()>;
}

/// Acknowledged writes that add data.
#[async_trait]
pub trait Pushable {
    async fn push(&self, transform: Transform) -> SourceResult<Option<Value>>;
}

/// Acknowledged writes that change existing data.
#[async_trait]
pub trait Updatable {
    async fn update(&self, transform: Transform) -> SourceResult<Option<Value>>;
}

/// Acknowledged reads.
#[async_trait]
pub trait Pullable {
    async fn pull(&self, query: Query) -> SourceResult<Option<Value>>;
}

/// Queries that return data.
#[async_trait]
pub trait Queryable {
    async fn query(&self, query: Query) -> SourceResult<Value>;
}

#[async_trait]
impl Syncable for ChannelSource {
    async fn sync(&self, transform: Transform) -> SourceResult<()> {
        self.replicate(transform).await
    }
}

#[async_trait]
impl Pushable for ChannelSource {
    async fn push(&self, transform: Transform) -> SourceResult<Option<Value>> {
        self.forward_write(RequestKind::Push, transform).await
    }
}

#[async_trait]
impl Updatable for ChannelSource {
    async fn update(&self, transform: Transform) -> SourceResult<Option<Value>> {
        self.forward_write(RequestKind::Update, transform).await
    }
}

#[async_trait]
impl Pullable for ChannelSource {
    async fn pull(&self, query: Query) -> SourceResult<Option<Value>> {
        self.forward_read(query).await
    }
}

#[async_trait]
impl Queryable for ChannelSource {
    async fn query(&self, query: Query) -> SourceResult<Value> {
        self.forward_query(query).await
    }
}
