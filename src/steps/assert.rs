use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{require, Step};
use crate::common::{Error, Result};
use crate::context::Context;
use crate::loaders::{load_bytes, DataLoader};

/// How an actual payload is compared with the expected one
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    #[default]
    Exact,
    Contains,
}

impl MatchMode {
    fn check(&self, what: &str, expected: &[u8], actual: &[u8]) -> Result<()> {
        let ok = match self {
            MatchMode::Exact => expected == actual,
            MatchMode::Contains => {
                expected.is_empty() || actual.windows(expected.len()).any(|w| w == expected)
            }
        };
        if ok {
            return Ok(());
        }
        let relation = match self {
            MatchMode::Exact => "equal to",
            MatchMode::Contains => "containing",
        };
        Err(Error::TestAssertion(format!(
            "{}: expected value {} '{}', got '{}'",
            what,
            relation,
            String::from_utf8_lossy(expected),
            String::from_utf8_lossy(actual)
        )))
    }
}

/// Dequeues one message collected by a subscription and compares it
pub struct AssertQueueStep {
    name: String,
    run_concurrently: bool,
    queue_key: String,
    expect: Box<dyn DataLoader>,
    mode: MatchMode,
    timeout: Duration,
}

impl AssertQueueStep {
    pub fn new(queue_key: impl Into<String>, expect: Box<dyn DataLoader>) -> Self {
        let queue_key = queue_key.into();
        Self {
            name: format!("assert next message in '{}'", queue_key),
            run_concurrently: false,
            queue_key,
            expect,
            mode: MatchMode::Exact,
            timeout: Duration::from_secs(30),
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

    pub fn mode(mut self, mode: MatchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Step for AssertQueueStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn run_concurrently(&self) -> bool {
        self.run_concurrently
    }

    fn validate(&self, ctx: &Context) -> Result<()> {
        require("assert_queue", "queue", &self.queue_key)?;
        self.expect.validate(ctx)
    }

    async fn execute(&self, ctx: &Context) -> Result<()> {
        let queue = ctx.get_queue(&self.queue_key)?.ok_or_else(|| {
            Error::Execution(format!("No queue stored under '{}'", self.queue_key))
        })?;

        // Background failures are only visible through the queue
        if let Some(reason) = queue.error() {
            return Err(Error::Execution(format!(
                "Listener for '{}' failed: {}",
                self.queue_key, reason
            )));
        }

        let expected = load_bytes(self.expect.as_ref(), ctx).await?;
        let actual = match queue.pop_timeout(self.timeout).await {
            Some(actual) => actual,
            None => {
                return Err(match queue.error() {
                    Some(reason) => Error::Execution(format!(
                        "Listener for '{}' failed: {}",
                        self.queue_key, reason
                    )),
                    None if queue.is_closed() => Error::TestAssertion(format!(
                        "Queue '{}' was closed before a message arrived",
                        self.queue_key
                    )),
                    None => Error::TestAssertion(format!(
                        "No message arrived in '{}' within {:?}",
                        self.queue_key, self.timeout
                    )),
                })
            }
        };

        self.mode.check(&self.queue_key, &expected, &actual)?;
        ctx.log_info(format!(
            "Dequeued expected message from '{}' ({} bytes)",
            self.queue_key,
            actual.len()
        ));
        Ok(())
    }
}

/// Compares a payload stored in the context
pub struct AssertValueStep {
    name: String,
    run_concurrently: bool,
    key: String,
    expect: Box<dyn DataLoader>,
    mode: MatchMode,
}

impl AssertValueStep {
    pub fn new(key: impl Into<String>, expect: Box<dyn DataLoader>) -> Self {
        let key = key.into();
        Self {
            name: format!("assert value of '{}'", key),
            run_concurrently: false,
            key,
            expect,
            mode: MatchMode::Exact,
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

    pub fn mode(mut self, mode: MatchMode) -> Self {
        self.mode = mode;
        self
    }
}

#[async_trait]
impl Step for AssertValueStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn run_concurrently(&self) -> bool {
        self.run_concurrently
    }

    fn validate(&self, ctx: &Context) -> Result<()> {
        require("assert_value", "key", &self.key)?;
        self.expect.validate(ctx)
    }

    async fn execute(&self, ctx: &Context) -> Result<()> {
        let actual = ctx
            .get_payload(&self.key)?
            .ok_or_else(|| Error::TestAssertion(format!("'{}' is not set", self.key)))?;
        let expected = load_bytes(self.expect.as_ref(), ctx).await?;
        self.mode.check(&self.key, &expected, &actual)?;
        ctx.log_info(format!("Value of '{}' matches", self.key));
        Ok(())
    }
}
