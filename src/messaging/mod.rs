//! Publish/subscribe collaborators used by messaging steps
//!
//! Steps only see the [`MessageBus`] and [`Subscription`] traits; the
//! backing technology is chosen from the harness configuration.

mod memory;
mod redis_bus;

pub use memory::MemoryBus;
pub use redis_bus::RedisBus;

use async_trait::async_trait;

use crate::common::Result;

/// Something messages can be published to and subscribed from
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Backend name for log messages
    fn name(&self) -> &str;

    /// Publish one payload to a channel
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()>;

    /// Subscribe to a channel
    ///
    /// Returns once the subscription is live: anything published after this
    /// returns is delivered to the subscription.
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>>;
}

/// A live subscription to one channel
#[async_trait]
pub trait Subscription: Send {
    /// Next payload; `None` once the subscription has ended
    async fn next(&mut self) -> Option<Result<Vec<u8>>>;

    /// End the subscription
    async fn unsubscribe(self: Box<Self>) -> Result<()>;
}
