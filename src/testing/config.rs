//! Test case document types
//!
//! Defines the data structures for deserializing YAML test cases.

use serde::Deserialize;
use std::path::PathBuf;

use crate::loaders::DataConfig;
use crate::steps::MatchMode;

/// A complete test case as written in a YAML file
#[derive(Deserialize, Debug, Clone)]
pub struct TestCaseDefinition {
    /// Name of the test case
    pub name: String,
    /// Optional description of what the test verifies
    pub description: Option<String>,
    /// Steps establishing preconditions
    #[serde(default)]
    pub setup: Vec<StepDefinition>,
    /// Steps performing the actions under test
    #[serde(default)]
    pub execution: Vec<StepDefinition>,
    /// Steps checking the outcome
    #[serde(default)]
    pub validation: Vec<StepDefinition>,
}

impl TestCaseDefinition {
    pub fn steps(&self, phase: Phase) -> &[StepDefinition] {
        match phase {
            Phase::Setup => &self.setup,
            Phase::Execution => &self.execution,
            Phase::Validation => &self.validation,
        }
    }
}

/// A single step entry
#[derive(Deserialize, Debug, Clone)]
pub struct StepDefinition {
    /// Display name (defaults to a description of the action)
    pub name: Option<String>,
    /// Start the step without waiting for it
    #[serde(default)]
    pub run_concurrently: bool,
    #[serde(flatten)]
    pub kind: StepKind,
}

/// The action a step performs
///
/// Required strings default to empty so that a missing value is reported
/// by validation rather than as a parse error.
#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum StepKind {
    /// Publish a payload to a channel
    Publish {
        #[serde(default)]
        channel: String,
        data: DataConfig,
    },
    /// Collect messages from a channel into a context queue
    Subscribe {
        #[serde(default)]
        channel: String,
        /// Context key for the message queue
        #[serde(default)]
        queue: String,
        /// Messages to wait for when not running concurrently (default: 1)
        expected_count: Option<usize>,
        /// Wait limit in seconds when not running concurrently
        timeout_secs: Option<u64>,
    },
    /// Start an external process
    ProcessStart {
        #[serde(default)]
        path: PathBuf,
        #[serde(default)]
        args: Vec<String>,
        working_dir: Option<PathBuf>,
        /// Wait for the process to exit instead of stopping it at teardown
        #[serde(default)]
        wait: bool,
        expected_exit_code: Option<i32>,
        /// Context key receiving the process id
        pid_key: Option<String>,
    },
    /// Store a payload in the context
    LoadData {
        #[serde(default)]
        key: String,
        data: DataConfig,
        #[serde(default)]
        as_text: bool,
    },
    /// Dequeue one message and compare it
    AssertQueue {
        #[serde(default)]
        queue: String,
        expect: DataConfig,
        #[serde(default)]
        mode: MatchMode,
        timeout_secs: Option<u64>,
    },
    /// Compare a context value
    AssertValue {
        #[serde(default)]
        key: String,
        expect: DataConfig,
        #[serde(default)]
        mode: MatchMode,
    },
    /// Wait a fixed time
    Delay { millis: u64 },
    /// Inline another test case at this position
    Import {
        /// Path to another test case file, relative to this one
        path: Option<PathBuf>,
        /// Embedded test case
        case: Option<Box<TestCaseDefinition>>,
    },
}

/// Test case phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Setup,
    Execution,
    Validation,
}

impl Phase {
    /// All phases in execution order
    pub const ALL: [Phase; 3] = [Phase::Setup, Phase::Execution, Phase::Validation];

    pub(crate) fn index(self) -> usize {
        match self {
            Phase::Setup => 0,
            Phase::Execution => 1,
            Phase::Validation => 2,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Setup => write!(f, "setup"),
            Self::Execution => write!(f, "execution"),
            Self::Validation => write!(f, "validation"),
        }
    }
}
