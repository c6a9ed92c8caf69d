//! Upstream pub/sub store
//!
//! The relay only needs four things from the external store: start a
//! listener stream, subscribe a channel, unsubscribe a channel and publish
//! an encoded payload. [`Upstream`] captures that; [`RedisUpstream`] speaks
//! RESP to a Redis server and [`MemoryUpstream`] keeps everything in
//! process (standalone runs and tests).

pub mod memory;
pub mod redis;
pub mod resp;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::utils::error::UpstreamError;

pub use memory::{MemoryUpstream, UpstreamCall};
pub use redis::RedisUpstream;

/// Something the upstream store pushed at us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    /// A published payload. A delivery may address several channels.
    Message { channels: Vec<String>, body: String },
    Subscribed { channel: String, count: i64 },
    Unsubscribed { channel: String, count: i64 },
    /// The listener connection is gone; every upstream subscription is lost.
    Disconnect,
}

/// Stream of events produced by one [`Upstream::listen`] call.
pub type UpstreamEvents = mpsc::UnboundedReceiver<UpstreamEvent>;

#[async_trait]
pub trait Upstream: Send + Sync + 'static {
    /// Open the listener stream. The bus calls this once per connection
    /// generation, before the first subscribe.
    async fn listen(&self) -> Result<UpstreamEvents, UpstreamError>;

    async fn subscribe(&self, channel: &str) -> Result<(), UpstreamError>;

    async fn unsubscribe(&self, channel: &str) -> Result<(), UpstreamError>;

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), UpstreamError>;
}
