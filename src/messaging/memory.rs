//! In-process message bus
//!
//! Each channel is a tokio broadcast channel created by its first
//! subscriber, so every subscriber sees every message published after it
//! subscribed. Publishing to a channel nobody ever subscribed to creates
//! nothing.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{MessageBus, Subscription};
use crate::common::{Error, Result};

/// Buffered messages per channel before slow subscribers start lagging
const CHANNEL_CAPACITY: usize = 1024;

/// Message bus living entirely inside the current process
#[derive(Default)]
pub struct MemoryBus {
    channels: Mutex<HashMap<String, broadcast::Sender<Vec<u8>>>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<Vec<u8>>>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<Vec<u8>> {
        self.channels()
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    fn existing(&self, channel: &str) -> Option<broadcast::Sender<Vec<u8>>> {
        self.channels().get(channel).cloned()
    }

    /// Number of live subscribers on a channel
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.existing(channel)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    fn name(&self) -> &str {
        "memory"
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()> {
        // A send with no subscribers is not an error: pub/sub drops it
        let delivered = match self.existing(channel) {
            Some(sender) => sender.send(payload).unwrap_or(0),
            None => 0,
        };
        tracing::debug!("Published to '{}' ({} subscribers)", channel, delivered);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>> {
        Ok(Box::new(MemorySubscription {
            channel: channel.to_string(),
            receiver: self.sender(channel).subscribe(),
        }))
    }
}

struct MemorySubscription {
    channel: String,
    receiver: broadcast::Receiver<Vec<u8>>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Option<Result<Vec<u8>>> {
        match self.receiver.recv().await {
            Ok(payload) => Some(Ok(payload)),
            Err(broadcast::error::RecvError::Closed) => None,
            Err(broadcast::error::RecvError::Lagged(skipped)) => Some(Err(Error::Execution(
                format!(
                    "Subscriber on '{}' lagged and lost {} messages",
                    self.channel, skipped
                ),
            ))),
        }
    }

    async fn unsubscribe(self: Box<Self>) -> Result<()> {
        tracing::debug!("Unsubscribed from '{}'", self.channel);
        Ok(())
    }
}
