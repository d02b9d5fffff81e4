//! Redis pub/sub backend

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use redis::AsyncCommands;

use super::{MessageBus, Subscription};
use crate::common::{Error, Result};

/// Message bus backed by a Redis server
pub struct RedisBus {
    client: redis::Client,
}

impl RedisBus {
    /// Create a bus for the given `redis://` URL
    ///
    /// No connection is made until the first publish or subscribe.
    pub fn open(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::Configuration(format!("Invalid redis URL '{}': {}", url, e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MessageBus for RedisBus {
    fn name(&self) -> &str {
        "redis"
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()> {
        let mut conn = self.client.get_async_connection().await?;
        let receivers: i64 = conn.publish(channel, payload).await?;
        tracing::debug!("Published to '{}' ({} receivers)", channel, receivers);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>> {
        let mut pubsub = self.client.get_async_connection().await?.into_pubsub();
        pubsub.subscribe(channel).await?;
        tracing::debug!("Subscribed to '{}'", channel);

        Ok(Box::new(RedisSubscription {
            channel: channel.to_string(),
            messages: Box::pin(pubsub.into_on_message()),
        }))
    }
}

struct RedisSubscription {
    channel: String,
    messages: Pin<Box<dyn Stream<Item = redis::Msg> + Send>>,
}

#[async_trait]
impl Subscription for RedisSubscription {
    async fn next(&mut self) -> Option<Result<Vec<u8>>> {
        let msg = self.messages.next().await?;
        Some(msg.get_payload::<Vec<u8>>().map_err(Error::from))
    }

    async fn unsubscribe(self: Box<Self>) -> Result<()> {
        // The pub/sub connection is dedicated to this subscription; dropping
        // it closes the connection, which ends the subscription server-side.
        tracing::debug!("Unsubscribed from '{}'", self.channel);
        drop(self.messages);
        Ok(())
    }
}
