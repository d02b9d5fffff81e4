//! Child process collaborator used by process steps

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};

use crate::common::{Error, Result};

/// What to start
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

/// Starts processes
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn start(&self, spec: &ProcessSpec) -> Result<Box<dyn ProcessHandle>>;
}

/// A started process
#[async_trait]
pub trait ProcessHandle: Send {
    /// OS process id, if the process is still known to the OS
    fn id(&self) -> Option<u32>;

    /// Wait for the process to exit and return its exit code
    ///
    /// The code is `None` when the process was ended by a signal.
    async fn wait(&mut self) -> Result<Option<i32>>;

    /// Stop the process; stopping an exited process is not an error
    async fn kill(&mut self) -> Result<()>;
}

/// Launches real OS processes through tokio
pub struct OsProcessLauncher {
    /// Time a process gets to exit after SIGTERM before it is killed
    grace: Duration,
}

impl OsProcessLauncher {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }
}

impl Default for OsProcessLauncher {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

/// Resolve a bare program name through PATH, leave paths untouched
pub fn resolve_program(program: &Path) -> Result<PathBuf> {
    if program.components().count() > 1 || program.is_absolute() {
        return Ok(program.to_path_buf());
    }
    which::which(program).map_err(|e| {
        Error::Execution(format!(
            "Program '{}' not found in PATH: {}",
            program.display(),
            e
        ))
    })
}

#[async_trait]
impl ProcessLauncher for OsProcessLauncher {
    async fn start(&self, spec: &ProcessSpec) -> Result<Box<dyn ProcessHandle>> {
        let program = resolve_program(&spec.program)?;

        let mut cmd = Command::new(&program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn().map_err(|e| {
            Error::Execution(format!("Failed to start {}: {}", program.display(), e))
        })?;

        tracing::debug!("Started {} (pid {:?})", program.display(), child.id());

        Ok(Box::new(OsProcess {
            child,
            grace: self.grace,
        }))
    }
}

struct OsProcess {
    child: Child,
    grace: Duration,
}

impl OsProcess {
    fn has_exited(&mut self) -> Result<bool> {
        Ok(self.child.try_wait()?.is_some())
    }

    /// Ask the process to terminate and wait for it within the grace period
    #[cfg(unix)]
    async fn terminate_gracefully(&mut self) -> Result<bool> {
        let Some(pid) = self.child.id() else {
            return Ok(true);
        };

        // SIGTERM first so the process can clean up after itself
        let result = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
        if result != 0 {
            return Ok(false);
        }

        match tokio::time::timeout(self.grace, self.child.wait()).await {
            Ok(status) => {
                status?;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    #[cfg(not(unix))]
    async fn terminate_gracefully(&mut self) -> Result<bool> {
        Ok(false)
    }
}

#[async_trait]
impl ProcessHandle for OsProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> Result<Option<i32>> {
        let status = self.child.wait().await?;
        Ok(status.code())
    }

    async fn kill(&mut self) -> Result<()> {
        if self.has_exited()? {
            return Ok(());
        }
        if self.terminate_gracefully().await? {
            return Ok(());
        }
        self.child.kill().await?;
        Ok(())
    }
}
