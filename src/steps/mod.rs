//! Step contract and the built-in steps
//!
//! A step is validated before it runs and executed at most once per run.
//! Steps never reference each other: everything they share goes through
//! the [`Context`].

mod assert;
mod data;
mod delay;
mod process;
mod publish;
mod subscribe;

pub use assert::{AssertQueueStep, AssertValueStep, MatchMode};
pub use data::LoadDataStep;
pub use delay::DelayStep;
pub use process::ProcessStartStep;
pub use publish::PublishStep;
pub use subscribe::SubscribeStep;

use async_trait::async_trait;

use crate::common::{Error, Result};
use crate::context::Context;

/// One unit of work in a test case
#[async_trait]
pub trait Step: Send + Sync {
    /// Human-readable name used in logs and reports
    fn name(&self) -> &str;

    /// Whether the runner may start this step without waiting for it
    ///
    /// A concurrent step's `execute` returns once its background activity
    /// is established; the activity itself keeps running until teardown.
    fn run_concurrently(&self) -> bool {
        false
    }

    /// Check configuration before any side effect happens
    ///
    /// Must not modify the context and may be called any number of times.
    fn validate(&self, ctx: &Context) -> Result<()>;

    /// Perform the step's effect
    async fn execute(&self, ctx: &Context) -> Result<()>;
}

/// Fail validation when a required string is empty
pub(crate) fn require(step: &str, field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::missing_field(step, field));
    }
    Ok(())
}
