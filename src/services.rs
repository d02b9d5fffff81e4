//! Collaborators handed to steps when a test case is built

use std::sync::Arc;

use crate::common::config::{Config, MessagingBackend, Timeouts};
use crate::common::Result;
use crate::loaders::{ByteSource, FsSource};
use crate::messaging::{MemoryBus, MessageBus, RedisBus};
use crate::process::{OsProcessLauncher, ProcessLauncher};

/// Everything a step may talk to outside the context
#[derive(Clone)]
pub struct Services {
    pub bus: Arc<dyn MessageBus>,
    pub launcher: Arc<dyn ProcessLauncher>,
    pub files: Arc<dyn ByteSource>,
    pub timeouts: Arc<Timeouts>,
}

impl Services {
    /// Build the collaborators selected by the harness configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let bus: Arc<dyn MessageBus> = match config.messaging.backend {
            MessagingBackend::Memory => Arc::new(MemoryBus::new()),
            MessagingBackend::Redis => Arc::new(RedisBus::open(&config.messaging.redis_url)?),
        };
        let timeouts = Timeouts {
            dequeue_secs: config.timeouts.dequeue_secs,
            subscribe_secs: config.timeouts.subscribe_secs,
            process_grace_millis: config.timeouts.process_grace_millis,
        };

        Ok(Self {
            bus,
            launcher: Arc::new(OsProcessLauncher::new(timeouts.process_grace())),
            files: Arc::new(FsSource),
            timeouts: Arc::new(timeouts),
        })
    }

    /// In-process services: memory bus, local processes and files
    pub fn in_memory() -> Self {
        Self {
            bus: Arc::new(MemoryBus::new()),
            launcher: Arc::new(OsProcessLauncher::default()),
            files: Arc::new(FsSource),
            timeouts: Arc::new(Timeouts::default()),
        }
    }

    pub fn with_bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus = bus;
        self
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn with_files(mut self, files: Arc<dyn ByteSource>) -> Self {
        self.files = files;
        self
    }
}
