use std::sync::Arc;

use async_trait::async_trait;

use super::{require, Step};
use crate::common::Result;
use crate::context::Context;
use crate::loaders::{load_bytes, DataLoader};
use crate::messaging::MessageBus;

/// Publishes one payload to a channel
pub struct PublishStep {
    name: String,
    channel: String,
    data: Box<dyn DataLoader>,
    bus: Arc<dyn MessageBus>,
    run_concurrently: bool,
}

impl PublishStep {
    pub fn new(channel: impl Into<String>, data: Box<dyn DataLoader>, bus: Arc<dyn MessageBus>) -> Self {
        let channel = channel.into();
        Self {
            name: format!("publish to '{}'", channel),
            channel,
            data,
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
}

#[async_trait]
impl Step for PublishStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn run_concurrently(&self) -> bool {
        self.run_concurrently
    }

    fn validate(&self, ctx: &Context) -> Result<()> {
        require("publish", "channel", &self.channel)?;
        self.data.validate(ctx)
    }

    async fn execute(&self, ctx: &Context) -> Result<()> {
        let payload = load_bytes(self.data.as_ref(), ctx).await?;
        let size = payload.len();
        self.bus.publish(&self.channel, payload).await?;
        ctx.log_info(format!(
            "Published {} bytes from {} to '{}' via {}",
            size,
            self.data.describe(),
            self.channel,
            self.bus.name()
        ));
        Ok(())
    }
}
