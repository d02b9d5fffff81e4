//! End-to-end integration tests for stepharness
//!
//! These tests load the YAML test cases under `tests/fixtures`, run them
//! against in-process services and check the reports. The CLI tests run
//! the built binary against the same fixtures.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use stepharness::common::ErrorCategory;
use stepharness::loaders::TextLoader;
use stepharness::messaging::MemoryBus;
use stepharness::steps::{AssertQueueStep, PublishStep, SubscribeStep};
use stepharness::{
    Context, Disposable, Error, Phase, Result, RunStatus, Services, Step, TestCase, TestRunner,
};

/// Test context with the fixtures directory and an observable bus
struct TestContext {
    fixtures_dir: PathBuf,
    bus: Arc<MemoryBus>,
    services: Services,
}

impl TestContext {
    fn new() -> Self {
        let manifest_dir = env!("CARGO_MANIFEST_DIR");
        let fixtures_dir = PathBuf::from(manifest_dir).join("tests").join("fixtures");
        let bus = Arc::new(MemoryBus::new());
        let services = Services::in_memory().with_bus(bus.clone());
        Self {
            fixtures_dir,
            bus,
            services,
        }
    }

    fn fixture(&self, name: &str) -> PathBuf {
        self.fixtures_dir.join(name)
    }

    fn load(&self, name: &str) -> Result<TestCase> {
        TestCase::load(&self.fixture(name), &self.services)
    }
}

/// Counts how often it is released
struct Counted(Arc<AtomicUsize>);

#[async_trait]
impl Disposable for Counted {
    fn describe(&self) -> String {
        "counted resource".to_string()
    }

    async fn release(self: Box<Self>) -> Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// === Scenarios ===

#[tokio::test]
async fn test_single_publish_succeeds_and_logs() {
    let tc = TestContext::new();
    let case = tc.load("publish.yaml").expect("fixture should load");

    let report = TestRunner::new().run(&case).await;
    assert!(report.passed(), "{:?}", report.failure);
    assert_eq!(report.steps_run(), 1);
    assert!(report
        .log
        .iter()
        .any(|e| e.message.contains("Published") && e.message.contains("'t'")));
}

#[tokio::test]
async fn test_concurrent_subscription_receives_publish() {
    let tc = TestContext::new();
    let case = tc.load("handoff.yaml").expect("fixture should load");

    let report = TestRunner::new().run(&case).await;
    assert!(report.passed(), "{:?}", report.failure);
    assert_eq!(report.steps_run(), 3);
    assert_eq!(report.steps[0].name, "listen on t");
    // The listener is gone once the run is over
    assert_eq!(tc.bus.subscriber_count("t"), 0);
}

#[tokio::test]
async fn test_empty_process_path_fails_validation() {
    let tc = TestContext::new();
    let case = tc.load("empty_process.yaml").expect("fixture should load");

    let ctx = Arc::new(Context::new());
    let report = TestRunner::new()
        .run_with_context(&case, Arc::clone(&ctx))
        .await;

    assert_eq!(report.status, RunStatus::Failed);
    let failure = report.failure.as_ref().expect("run should fail");
    assert_eq!(failure.phase, Phase::Execution);
    assert_eq!(failure.error.category(), ErrorCategory::Configuration);
    assert!(failure.error.to_string().contains("path"));
    assert_eq!(report.steps_run(), 0);
    assert!(report.release_failures.is_empty());
    assert_eq!(ctx.pending_disposables(), 0);
}

#[tokio::test]
async fn test_unmatched_rewrite_fails_and_releases_earlier_resources() {
    let tc = TestContext::new();
    let case = tc.load("missing_node.yaml").expect("fixture should load");

    let report = TestRunner::new().run(&case).await;
    let failure = report.failure.as_ref().expect("run should fail");
    assert_eq!(failure.phase, Phase::Execution);
    match &failure.error {
        Error::Load(msg) => assert!(msg.contains("node not found")),
        other => panic!("Expected load error, got {other:?}"),
    }
    assert!(report.release_failures.is_empty());
    assert_eq!(tc.bus.subscriber_count("orders"), 0);
}

// === Properties ===

#[tokio::test]
async fn test_document_rewrite_reaches_subscriber() {
    let tc = TestContext::new();
    let case = tc.load("rewrite.yaml").expect("fixture should load");

    let report = TestRunner::new().run(&case).await;
    assert!(report.passed(), "{:?}", report.failure);
}

#[tokio::test]
async fn test_xml_rewrite_reaches_subscriber() {
    let tc = TestContext::new();
    let case = tc.load("rewrite_xml.yaml").expect("fixture should load");

    let report = TestRunner::new().run(&case).await;
    assert!(report.passed(), "{:?}", report.failure);
}

#[tokio::test]
async fn test_imported_steps_run_where_imported() {
    let tc = TestContext::new();
    let case = tc.load("with_import.yaml").expect("fixture should load");

    let names: Vec<&str> = case
        .steps(Phase::Validation)
        .iter()
        .map(|s| s.name())
        .collect();
    assert_eq!(names, vec!["imported check", "own check"]);

    let report = TestRunner::new().run(&case).await;
    assert!(report.passed(), "{:?}", report.failure);
}

#[test]
fn test_import_cycle_fails_at_load() {
    let tc = TestContext::new();
    match tc.load("cycle_a.yaml") {
        Err(Error::Cycle(chain)) => {
            assert!(chain.contains("cycle_a.yaml"));
            assert!(chain.contains("cycle_b.yaml"));
        }
        Err(other) => panic!("Expected cycle error, got {other:?}"),
        Ok(_) => panic!("Expected cycle error"),
    }
}

#[tokio::test]
async fn test_teardown_runs_exactly_once() {
    let released = Arc::new(AtomicUsize::new(0));
    let ctx = Arc::new(Context::new());
    ctx.register_disposable(Box::new(Counted(Arc::clone(&released))));

    let tc = TestContext::new();
    let case = tc.load("publish.yaml").expect("fixture should load");
    let report = TestRunner::new()
        .run_with_context(&case, Arc::clone(&ctx))
        .await;
    assert!(report.passed());
    assert_eq!(released.load(Ordering::SeqCst), 1);

    // Disposing again releases nothing
    assert!(ctx.dispose().await.is_empty());
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_handoff_built_in_code() {
    let bus = Arc::new(MemoryBus::new());
    let case = TestCase::new("in code")
        .with_step(
            Phase::Setup,
            SubscribeStep::new("jobs", "inbox", bus.clone()).concurrently(true),
        )
        .with_step(
            Phase::Execution,
            PublishStep::new("jobs", Box::new(TextLoader::new("job-1")), bus.clone()),
        )
        .with_step(
            Phase::Validation,
            AssertQueueStep::new("inbox", Box::new(TextLoader::new("job-1"))),
        );

    let report = TestRunner::new().run(&case).await;
    assert!(report.passed(), "{:?}", report.failure);
    assert_eq!(bus.subscriber_count("jobs"), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn test_background_process_is_stopped_at_teardown() {
    let tc = TestContext::new();
    let case = tc.load("background_process.yaml").expect("fixture should load");

    let ctx = Arc::new(Context::new());
    let report = TestRunner::new()
        .run_with_context(&case, Arc::clone(&ctx))
        .await;
    assert!(report.passed(), "{:?}", report.failure);

    let pid = ctx
        .get_integer("sleeper_pid")
        .unwrap()
        .expect("pid should be stored");
    // Signal 0 only checks that the process exists
    let alive = unsafe { libc::kill(pid as i32, 0) } == 0;
    assert!(!alive, "process {pid} still running after teardown");
}

// === CLI ===

fn stepharness_bin() -> &'static Path {
    Path::new(env!("CARGO_BIN_EXE_stepharness"))
}

fn write_config(dir: &Path) -> PathBuf {
    let path = dir.join("config.toml");
    std::fs::write(
        &path,
        "[messaging]\nbackend = \"memory\"\n\n[timeouts]\ndequeue_secs = 5\n",
    )
    .expect("Failed to write config");
    path
}

#[test]
fn test_cli_run_passes() {
    let tc = TestContext::new();
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = write_config(dir.path());

    let output = Command::new(stepharness_bin())
        .arg("run")
        .arg(tc.fixture("publish.yaml"))
        .arg(tc.fixture("handoff.yaml"))
        .arg("--config")
        .arg(&config)
        .env("NO_COLOR", "1")
        .output()
        .expect("Failed to run stepharness");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "stdout:\n{stdout}");
    assert!(stdout.contains("PASSED"));
    assert!(stdout.contains("2 test case(s) passed"));
}

#[test]
fn test_cli_run_fails_with_exit_code() {
    let tc = TestContext::new();
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = write_config(dir.path());

    let output = Command::new(stepharness_bin())
        .arg("run")
        .arg(tc.fixture("empty_process.yaml"))
        .arg("--config")
        .arg(&config)
        .env("NO_COLOR", "1")
        .output()
        .expect("Failed to run stepharness");

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stdout).contains("FAILED"));
}

#[test]
fn test_cli_validate_reports_cycle() {
    let tc = TestContext::new();
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = write_config(dir.path());

    let output = Command::new(stepharness_bin())
        .arg("validate")
        .arg(tc.fixture("cycle_a.yaml"))
        .arg(tc.fixture("publish.yaml"))
        .arg("--config")
        .arg(&config)
        .env("NO_COLOR", "1")
        .output()
        .expect("Failed to run stepharness");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(!output.status.success());
    assert!(stdout.contains("Import cycle detected"), "stdout:\n{stdout}");
    assert!(stdout.contains("publish.yaml (1 steps)"));
}

#[test]
fn test_cli_check_shows_config() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = write_config(dir.path());

    let output = Command::new(stepharness_bin())
        .arg("check")
        .arg("--config")
        .arg(&config)
        .env("NO_COLOR", "1")
        .output()
        .expect("Failed to run stepharness");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.contains("messaging:         memory"));
    assert!(stdout.contains("dequeue timeout:   5s"));
}
