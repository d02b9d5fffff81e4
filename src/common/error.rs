//! Error types for the test harness
//!
//! Every failure a step, loader or test case can produce maps onto one
//! variant here. The runner uses [`Error::category`] to decide how a failure
//! is reported.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the harness
#[derive(Error, Debug)]
pub enum Error {
    // === Test Case Errors ===
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to parse test case: {0}")]
    Parse(String),

    #[error("Import cycle detected: {0}")]
    Cycle(String),

    // === Step Errors ===
    #[error("Step execution failed: {0}")]
    Execution(String),

    #[error("Data load failed: {0}")]
    Load(String),

    #[error("Test assertion failed: {0}")]
    TestAssertion(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    // === Context Errors ===
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Context value '{key}' is {found}, expected {expected}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    // === Teardown Errors ===
    #[error("Failed to release {resource}: {reason}")]
    ResourceRelease { resource: String, reason: String },

    // === Harness Configuration Errors ===
    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad classification used when reporting a failed run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad or missing configuration, detected before any effect ran
    Configuration,
    /// A step's action failed while running
    Execution,
    /// A data loader could not produce its payload
    Load,
    /// An expectation on collected data did not hold
    Assertion,
    /// A registered resource could not be released
    ResourceRelease,
    /// The persisted test case could not be read or parsed
    Parse,
    /// Test case imports form a cycle
    Cycle,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Execution => write!(f, "execution"),
            Self::Load => write!(f, "load"),
            Self::Assertion => write!(f, "assertion"),
            Self::ResourceRelease => write!(f, "resource release"),
            Self::Parse => write!(f, "parse"),
            Self::Cycle => write!(f, "cycle"),
        }
    }
}

impl Error {
    /// Create a configuration error for a required field left empty
    pub fn missing_field(step: &str, field: &str) -> Self {
        Self::Configuration(format!("{}: '{}' must not be empty", step, field))
    }

    /// Create a resource release error
    pub fn release_failed(resource: &str, reason: impl std::fmt::Display) -> Self {
        Self::ResourceRelease {
            resource: resource.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a type mismatch error for a context value
    pub fn type_mismatch(key: &str, expected: &'static str, found: &'static str) -> Self {
        Self::TypeMismatch {
            key: key.to_string(),
            expected,
            found,
        }
    }

    /// Classify the error for reporting
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Configuration(_) | Error::InvalidArgument(_) | Error::ConfigParse(_) => {
                ErrorCategory::Configuration
            }
            Error::Parse(_) | Error::Yaml(_) => ErrorCategory::Parse,
            Error::Cycle(_) => ErrorCategory::Cycle,
            Error::Load(_) | Error::FileRead { .. } => ErrorCategory::Load,
            Error::TestAssertion(_) | Error::TypeMismatch { .. } => ErrorCategory::Assertion,
            Error::ResourceRelease { .. } => ErrorCategory::ResourceRelease,
            Error::Execution(_)
            | Error::Timeout(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::Internal(_) => ErrorCategory::Execution,
        }
    }
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::Execution(format!("Redis error: {}", e))
    }
}
