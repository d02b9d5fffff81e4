//! stepharness - declarative step-based integration testing
//!
//! Test cases are sequences of steps grouped into setup, execution and
//! validation phases. Steps share data through a [`Context`], which also
//! owns every resource a step opens and releases them when the run ends.

pub mod cli;
pub mod commands;
pub mod common;
pub mod context;
pub mod loaders;
pub mod messaging;
pub mod process;
pub mod services;
pub mod steps;
pub mod testing;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use context::{Context, ContextValue, Disposable, MessageQueue};
pub use services::Services;
pub use steps::Step;
pub use testing::{Phase, RunStatus, TestCase, TestReport, TestRunner};
