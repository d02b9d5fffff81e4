use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::{require, Step};
use crate::common::{Error, Result};
use crate::context::{Context, Disposable, MessageQueue};
use crate::messaging::{MessageBus, Subscription};

/// Subscribes to a channel and collects every message into a queue
///
/// The queue is stored in the context under `queue_key`. Messages are
/// collected by a background listener that runs until teardown. When the
/// step is not concurrent, `execute` additionally blocks until
/// `expected_count` messages have arrived.
pub struct SubscribeStep {
    name: String,
    channel: String,
    queue_key: String,
    expected_count: usize,
    timeout: Duration,
    bus: Arc<dyn MessageBus>,
    run_concurrently: bool,
}

impl SubscribeStep {
    pub fn new(
        channel: impl Into<String>,
        queue_key: impl Into<String>,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        let channel = channel.into();
        Self {
            name: format!("subscribe to '{}'", channel),
            channel,
            queue_key: queue_key.into(),
            expected_count: 1,
            timeout: Duration::from_secs(30),
            bus,
            run_concurrently: false,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn concurrently(mut self, run_concurrently: bool) -> Self {
        self.run_concurrently = run_concurrently;
        self
    }

    pub fn expecting(mut self, count: usize) -> Self {
        self.expected_count = count;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Step for SubscribeStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn run_concurrently(&self) -> bool {
        self.run_concurrently
    }

    fn validate(&self, _ctx: &Context) -> Result<()> {
        require("subscribe", "channel", &self.channel)?;
        require("subscribe", "queue", &self.queue_key)?;
        if !self.run_concurrently && self.expected_count == 0 {
            return Err(Error::Configuration(
                "subscribe: 'expected_count' must be at least 1 for a blocking subscription"
                    .to_string(),
            ));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &Context) -> Result<()> {
        let subscription = self.bus.subscribe(&self.channel).await?;
        let queue = MessageQueue::new();
        ctx.set(&self.queue_key, queue.clone())?;

        let listener = Listener::spawn(self.channel.clone(), subscription, queue.clone());
        ctx.register_disposable(Box::new(listener));
        ctx.log_info(format!(
            "Subscribed to '{}' via {}, collecting into '{}'",
            self.channel,
            self.bus.name(),
            self.queue_key
        ));

        if self.run_concurrently {
            return Ok(());
        }

        if queue.wait_len(self.expected_count, self.timeout).await {
            ctx.log_info(format!(
                "Received {} message(s) on '{}'",
                queue.len(),
                self.channel
            ));
            return Ok(());
        }
        match queue.error() {
            Some(reason) => Err(Error::Execution(format!(
                "Listener on '{}' failed: {}",
                self.channel, reason
            ))),
            None => Err(Error::Timeout(self.timeout)),
        }
    }
}

/// Background task moving messages from a subscription into a queue
struct Listener {
    channel: String,
    queue: MessageQueue,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<Box<dyn Subscription>>,
}

impl Listener {
    fn spawn(channel: String, mut subscription: Box<dyn Subscription>, queue: MessageQueue) -> Self {
        let (stop, mut stopped) = oneshot::channel::<()>();
        let producer = queue.clone();
        let name = channel.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    item = subscription.next() => match item {
                        Some(Ok(payload)) => {
                            tracing::debug!("Listener on '{}' received {} bytes", name, payload.len());
                            producer.push(payload);
                        }
                        Some(Err(e)) => {
                            tracing::warn!("Listener on '{}' failed: {}", name, e);
                            producer.fail(e.to_string());
                            break;
                        }
                        None => {
                            // Only the stop signal may end a subscription
                            tracing::warn!("Subscription to '{}' ended unexpectedly", name);
                            producer.fail(format!("subscription to '{}' ended unexpectedly", name));
                            break;
                        }
                    }
                }
            }
            subscription
        });

        Self {
            channel,
            queue,
            stop: Some(stop),
            task,
        }
    }
}

#[async_trait]
impl Disposable for Listener {
    fn describe(&self) -> String {
        format!("subscription to '{}'", self.channel)
    }

    async fn release(self: Box<Self>) -> Result<()> {
        let Listener {
            channel,
            queue,
            stop,
            task,
        } = *self;
        if let Some(stop) = stop {
            // The listener may already have ended on its own
            let _ = stop.send(());
        }
        let subscription = task.await.map_err(|e| {
            Error::release_failed(&format!("subscription to '{}'", channel), e)
        })?;
        queue.close();
        subscription.unsubscribe().await
    }
}
