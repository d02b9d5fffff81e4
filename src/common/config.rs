//! Configuration file handling

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use super::paths::config_path;
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Messaging backend settings
    #[serde(default)]
    pub messaging: MessagingConfig,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,
}

/// Messaging backend used by publish/subscribe steps
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessagingBackend {
    /// In-process broadcast bus (no external service)
    #[default]
    Memory,
    /// Redis pub/sub
    Redis,
}

/// Messaging configuration
#[derive(Debug, Deserialize)]
pub struct MessagingConfig {
    /// Which backend to use
    #[serde(default)]
    pub backend: MessagingBackend,

    /// Connection URL for the redis backend
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            backend: MessagingBackend::default(),
            redis_url: default_redis_url(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1/".to_string()
}

/// Timeout settings
#[derive(Debug, Deserialize)]
pub struct Timeouts {
    /// Default wait when dequeuing from a subscription queue
    #[serde(default = "default_dequeue")]
    pub dequeue_secs: u64,

    /// Default wait for the first message of a blocking subscription
    #[serde(default = "default_subscribe")]
    pub subscribe_secs: u64,

    /// Grace period between SIGTERM and kill when releasing a process
    #[serde(default = "default_process_grace")]
    pub process_grace_millis: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            dequeue_secs: default_dequeue(),
            subscribe_secs: default_subscribe(),
            process_grace_millis: default_process_grace(),
        }
    }
}

fn default_dequeue() -> u64 {
    30
}
fn default_subscribe() -> u64 {
    30
}
fn default_process_grace() -> u64 {
    2_000
}

impl Timeouts {
    pub fn dequeue(&self) -> Duration {
        Duration::from_secs(self.dequeue_secs)
    }

    pub fn subscribe(&self) -> Duration {
        Duration::from_secs(self.subscribe_secs)
    }

    pub fn process_grace(&self) -> Duration {
        Duration::from_millis(self.process_grace_millis)
    }
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }
}
