use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use super::Step;
use crate::common::{Error, Result};
use crate::context::{Context, Disposable};
use crate::process::{ProcessHandle, ProcessLauncher, ProcessSpec};

/// Starts an external process
///
/// By default the process keeps running and is stopped at teardown. With
/// `wait` set, the step waits for it to exit and checks the exit code.
pub struct ProcessStartStep {
    name: String,
    spec: ProcessSpec,
    wait: bool,
    expected_exit_code: Option<i32>,
    pid_key: Option<String>,
    launcher: Arc<dyn ProcessLauncher>,
    run_concurrently: bool,
}

impl ProcessStartStep {
    pub fn new(path: impl Into<PathBuf>, launcher: Arc<dyn ProcessLauncher>) -> Self {
        let program = path.into();
        Self {
            name: format!("start {}", program.display()),
            spec: ProcessSpec {
                program,
                args: Vec::new(),
                working_dir: None,
            },
            wait: false,
            expected_exit_code: None,
            pid_key: None,
            launcher,
            run_concurrently: false,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn args(mut self, args: Vec<String>) -> Self {
        self.spec.args = args;
        self
    }

    pub fn working_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.spec.working_dir = dir;
        self
    }

    pub fn wait_for_exit(mut self, wait: bool, expected_exit_code: Option<i32>) -> Self {
        self.wait = wait;
        self.expected_exit_code = expected_exit_code;
        self
    }

    pub fn pid_key(mut self, key: Option<String>) -> Self {
        self.pid_key = key;
        self
    }

    pub fn concurrently(mut self, run_concurrently: bool) -> Self {
        self.run_concurrently = run_concurrently;
        self
    }
}

#[async_trait]
impl Step for ProcessStartStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn run_concurrently(&self) -> bool {
        self.run_concurrently
    }

    fn validate(&self, _ctx: &Context) -> Result<()> {
        if self.spec.program.as_os_str().is_empty() {
            return Err(Error::missing_field("process_start", "path"));
        }
        if self.expected_exit_code.is_some() && !self.wait {
            return Err(Error::Configuration(
                "process_start: 'expected_exit_code' requires 'wait: true'".to_string(),
            ));
        }
        if matches!(&self.pid_key, Some(key) if key.is_empty()) {
            return Err(Error::missing_field("process_start", "pid_key"));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &Context) -> Result<()> {
        let mut handle = self.launcher.start(&self.spec).await?;
        let program = self.spec.program.display().to_string();
        let pid = handle.id();

        if let (Some(key), Some(pid)) = (&self.pid_key, pid) {
            ctx.set(key, i64::from(pid))?;
        }

        if !self.wait {
            let description = match pid {
                Some(pid) => format!("process {} (pid {})", program, pid),
                None => format!("process {}", program),
            };
            ctx.log_info(format!("Started {}", description));
            ctx.register_disposable(Box::new(RunningProcess {
                description,
                handle,
            }));
            return Ok(());
        }

        let code = handle.wait().await?;
        let expected = self.expected_exit_code.unwrap_or(0);
        if code != Some(expected) {
            return Err(Error::Execution(format!(
                "{} exited with code {:?}, expected {}",
                program, code, expected
            )));
        }
        ctx.log_info(format!("{} exited with code {}", program, expected));
        Ok(())
    }
}

struct RunningProcess {
    description: String,
    handle: Box<dyn ProcessHandle>,
}

#[async_trait]
impl Disposable for RunningProcess {
    fn describe(&self) -> String {
        self.description.clone()
    }

    async fn release(self: Box<Self>) -> Result<()> {
        let RunningProcess {
            description,
            mut handle,
        } = *self;
        handle
            .kill()
            .await
            .map_err(|e| Error::release_failed(&description, e))
    }
}
