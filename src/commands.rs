//! CLI command definitions
//!
//! Defines the clap commands for the stepharness CLI.

use clap::Subcommand;
use std::path::PathBuf;

use crate::common::paths;

/// Default file name inside the log directory
const LOG_FILE_NAME: &str = "stepharness.log";

#[derive(Subcommand)]
pub enum Commands {
    /// Run one or more YAML test cases
    Run {
        /// Paths to test case files
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Print the run log of every test case
        #[arg(long, short)]
        verbose: bool,

        /// Configuration file (default: the platform config directory)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Also write logs to a file (default: the platform log directory)
        #[arg(long, num_args = 0..=1)]
        log_file: Option<Option<PathBuf>>,
    },

    /// Load and validate test cases without running them
    Validate {
        /// Paths to test case files
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Configuration file (default: the platform config directory)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Show the configuration that runs would use
    Check {
        /// Configuration file (default: the platform config directory)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

impl Commands {
    /// Log file requested on the command line, if any
    ///
    /// A bare `--log-file` selects the platform log directory. Returns `None`
    /// when that directory cannot be determined or created.
    pub fn log_file(&self) -> Option<PathBuf> {
        match self {
            Commands::Run {
                log_file: Some(Some(path)),
                ..
            } => Some(path.clone()),
            Commands::Run {
                log_file: Some(None),
                ..
            } => paths::ensure_log_dir()
                .ok()
                .flatten()
                .map(|dir| dir.join(LOG_FILE_NAME)),
            _ => None,
        }
    }
}
