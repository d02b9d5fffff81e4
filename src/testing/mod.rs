//! Test cases and the runner
//!
//! Test cases are YAML documents with three phases of steps. They are loaded
//! into [`TestCase`] values, with imports already resolved, and run by a
//! [`TestRunner`] that reports the outcome as a [`TestReport`].

mod case;
mod config;
mod runner;

pub use case::{TestCase, ValidationFailure};
pub use config::*;
pub use runner::{RunStatus, StepFailure, StepRecord, StepState, TestReport, TestRunner};
