use std::time::Duration;

use async_trait::async_trait;

use super::Step;
use crate::common::Result;
use crate::context::Context;

/// Waits for a fixed amount of time
pub struct DelayStep {
    name: String,
    run_concurrently: bool,
    duration: Duration,
}

impl DelayStep {
    pub fn new(duration: Duration) -> Self {
        Self {
            name: format!("delay {}ms", duration.as_millis()),
            run_concurrently: false,
            duration,
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
impl Step for DelayStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn run_concurrently(&self) -> bool {
        self.run_concurrently
    }

    fn validate(&self, _ctx: &Context) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, ctx: &Context) -> Result<()> {
        tokio::time::sleep(self.duration).await;
        ctx.log_info(format!("Waited {}ms", self.duration.as_millis()));
        Ok(())
    }
}
