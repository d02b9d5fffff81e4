//! Registry of resources released at the end of a run

use async_trait::async_trait;

use crate::common::{Error, Result};

/// A resource a step opened and that must be released at teardown
#[async_trait]
pub trait Disposable: Send {
    /// Short description used in logs and release errors
    fn describe(&self) -> String;

    /// Release the resource
    async fn release(self: Box<Self>) -> Result<()>;
}

/// Identifier handed out by [`super::Context::register_disposable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DisposableId(pub(crate) u64);

impl std::fmt::Display for DisposableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A release that did not succeed during teardown
#[derive(Debug)]
pub struct ReleaseFailure {
    pub id: DisposableId,
    pub resource: String,
    pub error: Error,
}

impl std::fmt::Display for ReleaseFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.resource, self.id, self.error)
    }
}

pub(crate) struct Registered {
    pub id: DisposableId,
    pub handle: Box<dyn Disposable>,
}
