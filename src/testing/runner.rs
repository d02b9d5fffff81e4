//! Test runner implementation
//!
//! Drives a [`TestCase`] through setup, execution and validation against a
//! single [`Context`], then disposes the context. Disposal happens exactly
//! once per run, whether the phases complete, fail or panic.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use colored::Colorize;
use futures_util::FutureExt;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::common::{Error, Result};
use crate::context::{Context, LogEntry, ReleaseFailure};
use crate::steps::Step;

use super::case::TestCase;
use super::config::Phase;

/// Lifecycle of a step within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Created,
    Validated,
    Executing,
    Completed,
    Failed,
}

impl std::fmt::Display for StepState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Validated => write!(f, "validated"),
            Self::Executing => write!(f, "executing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Where a step sits in the case and how far it got
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub phase: Phase,
    pub index: usize,
    pub name: String,
    pub state: StepState,
}

/// The step that ended a run
#[derive(Debug)]
pub struct StepFailure {
    pub phase: Phase,
    pub index: usize,
    pub step: String,
    pub error: Error,
}

impl std::fmt::Display for StepFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} step {} '{}' failed ({}): {}",
            self.phase,
            self.index + 1,
            self.step,
            self.error.category(),
            self.error
        )
    }
}

/// Overall outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Passed,
    /// A step failed
    Failed,
    /// Every step passed but some resources could not be released
    LeakedResources,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
            Self::LeakedResources => write!(f, "leaked resources"),
        }
    }
}

/// Result of a test run
#[derive(Debug)]
pub struct TestReport {
    pub name: String,
    pub run_id: Uuid,
    pub status: RunStatus,
    pub failure: Option<StepFailure>,
    pub release_failures: Vec<ReleaseFailure>,
    /// Every step of the case in run order
    pub steps: Vec<StepRecord>,
    pub log: Vec<LogEntry>,
    pub duration: Duration,
}

impl TestReport {
    pub fn passed(&self) -> bool {
        self.status == RunStatus::Passed
    }

    /// Steps that executed to completion
    pub fn steps_run(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.state == StepState::Completed)
            .count()
    }

    pub fn steps_total(&self) -> usize {
        self.steps.len()
    }
}

/// Step records of a run, addressable by phase and index
struct Trail {
    records: Vec<StepRecord>,
    offsets: [usize; 3],
}

impl Trail {
    fn new(case: &TestCase) -> Self {
        let mut records = Vec::with_capacity(case.step_count());
        let mut offsets = [0; 3];
        for phase in Phase::ALL {
            offsets[phase.index()] = records.len();
            for (index, step) in case.steps(phase).iter().enumerate() {
                records.push(StepRecord {
                    phase,
                    index,
                    name: step.name().to_string(),
                    state: StepState::Created,
                });
            }
        }
        Self { records, offsets }
    }

    fn set(&mut self, phase: Phase, index: usize, state: StepState) {
        if let Some(record) = self.records.get_mut(self.offsets[phase.index()] + index) {
            record.state = state;
        }
    }
}

/// A concurrent step whose `execute` has not been joined yet
type Pending = (usize, JoinHandle<Result<()>>);

/// Releases the context of a run that is dropped before its teardown
///
/// Holds the concurrent steps of the current phase so they can be aborted
/// along with the run.
struct TeardownGuard {
    ctx: Option<Arc<Context>>,
    pending: Vec<Pending>,
}

impl TeardownGuard {
    fn new(ctx: &Arc<Context>) -> Self {
        Self {
            ctx: Some(Arc::clone(ctx)),
            pending: Vec::new(),
        }
    }

    fn disarm(&mut self) {
        self.ctx = None;
    }
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        for (_, handle) in &pending {
            handle.abort();
        }

        let Some(ctx) = self.ctx.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::error!(
                run = %ctx.run_id(),
                "Run dropped outside a runtime, {} resource(s) not released",
                ctx.pending_disposables()
            );
            return;
        };

        tracing::warn!(run = %ctx.run_id(), "Run cancelled, releasing resources in the background");
        runtime.spawn(async move {
            // Aborted steps must stop registering before the registry drains
            for (_, handle) in pending {
                let _ = handle.await;
            }
            for failure in ctx.dispose().await {
                tracing::warn!(run = %ctx.run_id(), "{}", failure);
            }
        });
    }
}

/// Runs test cases
///
/// The runner holds no per-run state and can be reused.
#[derive(Debug, Clone, Default)]
pub struct TestRunner {
    echo: bool,
}

impl TestRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Print progress to stdout while running
    pub fn echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Run a test case against a fresh context
    pub async fn run(&self, case: &TestCase) -> TestReport {
        self.run_with_context(case, Arc::new(Context::new())).await
    }

    /// Run a test case against a caller-provided context
    ///
    /// The context is disposed before this returns. If the returned future
    /// is dropped first, pending concurrent steps are aborted and the context
    /// is disposed on a background task.
    pub async fn run_with_context(&self, case: &TestCase, ctx: Arc<Context>) -> TestReport {
        let started = Instant::now();
        tracing::info!(run = %ctx.run_id(), "Running test case '{}'", case.name);

        if self.echo {
            println!(
                "\n{} {}",
                "Running Test:".blue().bold(),
                case.name.white().bold()
            );
            if let Some(desc) = &case.description {
                println!("  {}", desc.dimmed());
            }
        }

        let mut guard = TeardownGuard::new(&ctx);
        let mut trail = Trail::new(case);
        let mut failure = None;
        for phase in Phase::ALL {
            if case.steps(phase).is_empty() {
                continue;
            }
            if self.echo {
                println!("\n{}", format!("{}:", title(phase)).cyan());
            }
            if let Err(f) = self
                .run_phase(case, phase, &ctx, &mut trail, &mut guard.pending)
                .await
            {
                failure = Some(f);
                break;
            }
        }

        let release_failures = self.teardown(&ctx).await;
        guard.disarm();

        let status = match (&failure, release_failures.is_empty()) {
            (Some(_), _) => RunStatus::Failed,
            (None, false) => RunStatus::LeakedResources,
            (None, true) => RunStatus::Passed,
        };
        tracing::info!(run = %ctx.run_id(), "Test case '{}' {}", case.name, status);

        TestReport {
            name: case.name.clone(),
            run_id: ctx.run_id(),
            status,
            failure,
            release_failures,
            steps: trail.records,
            log: ctx.log_entries(),
            duration: started.elapsed(),
        }
    }

    async fn run_phase(
        &self,
        case: &TestCase,
        phase: Phase,
        ctx: &Arc<Context>,
        trail: &mut Trail,
        pending: &mut Vec<Pending>,
    ) -> std::result::Result<(), StepFailure> {
        let steps = case.steps(phase);

        // Execution checks its whole list before anything runs
        if phase == Phase::Execution {
            for (index, step) in steps.iter().enumerate() {
                self.validate_step(phase, index, step.as_ref(), ctx, trail)?;
            }
        }

        for (index, step) in steps.iter().enumerate() {
            if phase != Phase::Execution {
                if let Err(f) = self.validate_step(phase, index, step.as_ref(), ctx, trail) {
                    abort_pending(std::mem::take(pending), phase, trail).await;
                    return Err(f);
                }
            }

            trail.set(phase, index, StepState::Executing);
            tracing::debug!(%phase, index, "Executing '{}'", step.name());

            if step.run_concurrently() {
                if self.echo {
                    println!("  {} {}", "~".yellow(), step.name().dimmed());
                }
                let task_step = Arc::clone(step);
                let task_ctx = Arc::clone(ctx);
                pending.push((
                    index,
                    tokio::spawn(async move { task_step.execute(&task_ctx).await }),
                ));
                continue;
            }

            let result = AssertUnwindSafe(step.execute(ctx))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(panicked(step.name(), payload)));
            match result {
                Ok(()) => self.complete(phase, index, step.as_ref(), trail),
                Err(error) => {
                    let failure = self.fail(phase, index, step.as_ref(), error, ctx, trail);
                    abort_pending(std::mem::take(pending), phase, trail).await;
                    return Err(failure);
                }
            }
        }

        // Concurrent steps must be established before the next phase.
        // Each handle stays in `pending` while awaited so a cancelled run
        // can still abort it.
        while let Some((index, handle)) = pending.first_mut() {
            let index = *index;
            let joined = handle.await;
            pending.remove(0);
            let step = steps[index].as_ref();
            let result = match joined {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err(panicked(step.name(), e.into_panic())),
                Err(e) => Err(Error::Execution(format!("'{}' was cancelled: {}", step.name(), e))),
            };
            match result {
                Ok(()) => self.complete(phase, index, step, trail),
                Err(error) => {
                    let failure = self.fail(phase, index, step, error, ctx, trail);
                    abort_pending(std::mem::take(pending), phase, trail).await;
                    return Err(failure);
                }
            }
        }

        Ok(())
    }

    fn validate_step(
        &self,
        phase: Phase,
        index: usize,
        step: &dyn Step,
        ctx: &Context,
        trail: &mut Trail,
    ) -> std::result::Result<(), StepFailure> {
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| step.validate(ctx)))
            .unwrap_or_else(|payload| Err(panicked(step.name(), payload)));
        match result {
            Ok(()) => {
                trail.set(phase, index, StepState::Validated);
                Ok(())
            }
            Err(error) => Err(self.fail(phase, index, step, error, ctx, trail)),
        }
    }

    fn complete(&self, phase: Phase, index: usize, step: &dyn Step, trail: &mut Trail) {
        trail.set(phase, index, StepState::Completed);
        if self.echo {
            println!("  {} {}", "✓".green(), step.name());
        }
    }

    fn fail(
        &self,
        phase: Phase,
        index: usize,
        step: &dyn Step,
        error: Error,
        ctx: &Context,
        trail: &mut Trail,
    ) -> StepFailure {
        trail.set(phase, index, StepState::Failed);
        ctx.log_error(format!(
            "{} step {} '{}' failed: {}",
            phase,
            index + 1,
            step.name(),
            error
        ));
        if self.echo {
            println!("  {} {}: {}", "✗".red(), step.name(), error);
        }
        StepFailure {
            phase,
            index,
            step: step.name().to_string(),
            error,
        }
    }

    async fn teardown(&self, ctx: &Context) -> Vec<ReleaseFailure> {
        let count = ctx.pending_disposables();
        let failures = ctx.dispose().await;

        if self.echo && count > 0 {
            println!("\n{}", "Teardown:".cyan());
            if failures.is_empty() {
                println!("  {} Released {} resource(s)", "✓".green(), count);
            }
            for failure in &failures {
                println!("  {} {}", "✗".red(), failure);
            }
        }
        failures
    }
}

/// Abort concurrent steps that are still being established, and wait for them
async fn abort_pending(pending: Vec<Pending>, phase: Phase, trail: &mut Trail) {
    for (_, handle) in &pending {
        handle.abort();
    }
    for (index, handle) in pending {
        // A task may finish before the abort reaches it
        let state = match handle.await {
            Ok(Ok(())) => StepState::Completed,
            _ => StepState::Failed,
        };
        trail.set(phase, index, state);
    }
}

fn panicked(step: &str, payload: Box<dyn Any + Send>) -> Error {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    };
    Error::Execution(format!("'{}' panicked: {}", step, message))
}

fn title(phase: Phase) -> &'static str {
    match phase {
        Phase::Setup => "Setup",
        Phase::Execution => "Execution",
        Phase::Validation => "Validation",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Disposable;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    type Events = Arc<Mutex<Vec<String>>>;

    /// Records validate/execute calls and optionally misbehaves
    struct Scripted {
        name: &'static str,
        events: Events,
        concurrent: bool,
        invalid: bool,
        fails: bool,
        panics: bool,
        sleep: Duration,
        disposable: Option<Arc<AtomicUsize>>,
    }

    impl Scripted {
        fn new(name: &'static str, events: &Events) -> Self {
            Self {
                name,
                events: Arc::clone(events),
                concurrent: false,
                invalid: false,
                fails: false,
                panics: false,
                sleep: Duration::ZERO,
                disposable: None,
            }
        }

        fn record(&self, what: &str) {
            self.events
                .lock()
                .unwrap()
                .push(format!("{} {}", what, self.name));
        }
    }

    #[async_trait]
    impl Step for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        fn run_concurrently(&self) -> bool {
            self.concurrent
        }

        fn validate(&self, _ctx: &Context) -> Result<()> {
            self.record("validate");
            if self.invalid {
                return Err(Error::missing_field("scripted", "value"));
            }
            Ok(())
        }

        async fn execute(&self, ctx: &Context) -> Result<()> {
            if let Some(counter) = &self.disposable {
                ctx.register_disposable(Box::new(Counted(Arc::clone(counter))));
            }
            tokio::time::sleep(self.sleep).await;
            if self.panics {
                panic!("step exploded");
            }
            self.record("execute");
            if self.fails {
                return Err(Error::Execution("step failed".to_string()));
            }
            Ok(())
        }
    }

    struct Counted(Arc<AtomicUsize>);

    #[async_trait]
    impl Disposable for Counted {
        fn describe(&self) -> String {
            "counted".to_string()
        }

        async fn release(self: Box<Self>) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Stuck;

    #[async_trait]
    impl Disposable for Stuck {
        fn describe(&self) -> String {
            "stuck".to_string()
        }

        async fn release(self: Box<Self>) -> Result<()> {
            Err(Error::release_failed("stuck", "refused"))
        }
    }

    fn events() -> Events {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn taken(events: &Events) -> Vec<String> {
        events.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_synchronous_steps_run_in_declared_order() {
        let ev = events();
        let case = TestCase::new("ordered")
            .with_step(Phase::Setup, Scripted::new("s1", &ev))
            .with_step(Phase::Execution, Scripted::new("e1", &ev))
            .with_step(Phase::Execution, Scripted::new("e2", &ev))
            .with_step(Phase::Validation, Scripted::new("v1", &ev));

        let report = TestRunner::new().run(&case).await;
        assert!(report.passed(), "{:?}", report.failure);
        assert_eq!(report.steps_run(), 4);
        assert_eq!(report.steps_total(), 4);
        assert_eq!(
            taken(&ev),
            vec![
                "validate s1",
                "execute s1",
                "validate e1",
                "validate e2",
                "execute e1",
                "execute e2",
                "validate v1",
                "execute v1",
            ]
        );
    }

    #[tokio::test]
    async fn test_invalid_execution_step_prevents_every_execute() {
        let ev = events();
        let released = Arc::new(AtomicUsize::new(0));
        let mut setup = Scripted::new("s1", &ev);
        setup.disposable = Some(Arc::clone(&released));
        let mut bad = Scripted::new("e2", &ev);
        bad.invalid = true;

        let case = TestCase::new("invalid")
            .with_step(Phase::Setup, setup)
            .with_step(Phase::Execution, Scripted::new("e1", &ev))
            .with_step(Phase::Execution, bad)
            .with_step(Phase::Validation, Scripted::new("v1", &ev));

        let report = TestRunner::new().run(&case).await;
        assert_eq!(report.status, RunStatus::Failed);
        let failure = report.failure.as_ref().unwrap();
        assert_eq!(failure.phase, Phase::Execution);
        assert_eq!(failure.index, 1);
        assert!(matches!(failure.error, Error::Configuration(_)));

        let events = taken(&ev);
        assert!(!events.contains(&"execute e1".to_string()));
        assert!(!events.iter().any(|e| e.ends_with("v1")));
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert_eq!(report.steps[1].state, StepState::Validated);
        assert_eq!(report.steps[2].state, StepState::Failed);
        assert_eq!(report.steps[3].state, StepState::Created);
    }

    #[tokio::test]
    async fn test_panic_becomes_failure_and_teardown_runs_once() {
        let ev = events();
        let released = Arc::new(AtomicUsize::new(0));
        let mut step = Scripted::new("boom", &ev);
        step.panics = true;
        step.disposable = Some(Arc::clone(&released));

        let case = TestCase::new("panics").with_step(Phase::Execution, step);
        let report = TestRunner::new().run(&case).await;

        let failure = report.failure.unwrap();
        match failure.error {
            Error::Execution(msg) => assert!(msg.contains("step exploded")),
            other => panic!("Expected execution error, got {other:?}"),
        }
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_step_is_joined_before_next_phase() {
        let ev = events();
        let mut slow = Scripted::new("listener", &ev);
        slow.concurrent = true;
        slow.sleep = Duration::from_millis(50);

        let case = TestCase::new("concurrent")
            .with_step(Phase::Setup, slow)
            .with_step(Phase::Setup, Scripted::new("quick", &ev))
            .with_step(Phase::Execution, Scripted::new("after", &ev));

        let report = TestRunner::new().run(&case).await;
        assert!(report.passed(), "{:?}", report.failure);

        let events = taken(&ev);
        let pos = |e: &str| events.iter().position(|x| x == e).unwrap();
        assert!(pos("execute quick") < pos("execute listener"));
        assert!(pos("execute listener") < pos("execute after"));
    }

    #[tokio::test]
    async fn test_concurrent_failure_is_reported_at_barrier() {
        let ev = events();
        let mut failing = Scripted::new("bg", &ev);
        failing.concurrent = true;
        failing.fails = true;

        let case = TestCase::new("bg fails")
            .with_step(Phase::Execution, Scripted::new("first", &ev))
            .with_step(Phase::Execution, failing)
            .with_step(Phase::Validation, Scripted::new("never", &ev));

        let report = TestRunner::new().run(&case).await;
        let failure = report.failure.unwrap();
        assert_eq!(failure.phase, Phase::Execution);
        assert_eq!(failure.index, 1);
        assert_eq!(failure.step, "bg");
        assert!(!taken(&ev).iter().any(|e| e.ends_with("never")));
    }

    #[tokio::test]
    async fn test_pending_concurrent_step_is_aborted_on_failure() {
        let ev = events();
        let mut hanging = Scripted::new("hanging", &ev);
        hanging.concurrent = true;
        hanging.sleep = Duration::from_secs(60);
        let mut failing = Scripted::new("failing", &ev);
        failing.fails = true;

        let case = TestCase::new("abort")
            .with_step(Phase::Execution, hanging)
            .with_step(Phase::Execution, failing);

        let report = tokio::time::timeout(Duration::from_secs(5), TestRunner::new().run(&case))
            .await
            .expect("runner should not wait for the hanging step");
        assert_eq!(report.failure.unwrap().step, "failing");
        assert_eq!(report.steps[0].state, StepState::Failed);
        assert!(!taken(&ev).contains(&"execute hanging".to_string()));
    }

    #[tokio::test]
    async fn test_setup_failure_skips_later_phases() {
        let ev = events();
        let released = Arc::new(AtomicUsize::new(0));
        let mut opened = Scripted::new("opened", &ev);
        opened.disposable = Some(Arc::clone(&released));
        let mut broken = Scripted::new("broken", &ev);
        broken.fails = true;

        let case = TestCase::new("setup fails")
            .with_step(Phase::Setup, opened)
            .with_step(Phase::Setup, broken)
            .with_step(Phase::Execution, Scripted::new("exercise", &ev))
            .with_step(Phase::Validation, Scripted::new("verify", &ev));

        let report = TestRunner::new().run(&case).await;
        assert_eq!(report.status, RunStatus::Failed);
        let failure = report.failure.as_ref().unwrap();
        assert_eq!(failure.phase, Phase::Setup);
        assert_eq!(failure.step, "broken");

        let events = taken(&ev);
        assert!(!events
            .iter()
            .any(|e| e.ends_with("exercise") || e.ends_with("verify")));
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert_eq!(report.steps[2].state, StepState::Created);
        assert_eq!(report.steps[3].state, StepState::Created);
    }

    #[tokio::test]
    async fn test_cancelled_run_still_releases_resources() {
        let ev = events();
        let released = Arc::new(AtomicUsize::new(0));
        let mut background = Scripted::new("background", &ev);
        background.concurrent = true;
        background.sleep = Duration::from_secs(60);
        let mut hang = Scripted::new("hang", &ev);
        hang.disposable = Some(Arc::clone(&released));
        hang.sleep = Duration::from_secs(60);

        let case = TestCase::new("cancelled")
            .with_step(Phase::Setup, background)
            .with_step(Phase::Setup, hang);
        let ctx = Arc::new(Context::new());
        let runner = TestRunner::new();

        let outcome = tokio::time::timeout(
            Duration::from_millis(100),
            runner.run_with_context(&case, Arc::clone(&ctx)),
        )
        .await;
        assert!(outcome.is_err());

        // Release happens on a background task
        for _ in 0..100 {
            if released.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.pending_disposables(), 0);
        assert!(taken(&ev).iter().all(|e| !e.starts_with("execute")));
    }

    #[tokio::test]
    async fn test_release_failure_without_step_failure_is_leak() {
        let ctx = Arc::new(Context::new());
        ctx.register_disposable(Box::new(Stuck));

        let report = TestRunner::new()
            .run_with_context(&TestCase::new("leaky"), Arc::clone(&ctx))
            .await;
        assert_eq!(report.status, RunStatus::LeakedResources);
        assert!(!report.passed());
        assert_eq!(report.release_failures.len(), 1);
        assert_eq!(ctx.pending_disposables(), 0);
    }

    #[tokio::test]
    async fn test_failure_is_logged() {
        let ev = events();
        let mut failing = Scripted::new("noisy", &ev);
        failing.fails = true;
        let case = TestCase::new("log").with_step(Phase::Validation, failing);

        let report = TestRunner::new().run(&case).await;
        assert!(report
            .log
            .iter()
            .any(|e| e.message.contains("validation step 1 'noisy' failed")));
    }
}
