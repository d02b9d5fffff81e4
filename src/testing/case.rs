//! Test case loading and import resolution
//!
//! Imports are resolved while loading: an `import` entry is replaced by the
//! imported case's steps, phase by phase, so the runner only ever sees
//! concrete steps. For every phase the imported steps land where the import
//! sits in the importing case's own step order, which is the same order a
//! run of the imported case at that point would produce.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::common::{Error, Result};
use crate::context::Context;
use crate::services::Services;
use crate::steps::{
    AssertQueueStep, AssertValueStep, DelayStep, LoadDataStep, ProcessStartStep, PublishStep,
    Step, SubscribeStep,
};

use super::config::{Phase, StepDefinition, StepKind, TestCaseDefinition};

/// A loaded test case, ready to run
pub struct TestCase {
    pub name: String,
    pub description: Option<String>,
    phases: [Vec<Arc<dyn Step>>; 3],
}

/// A step that failed validation before the run
#[derive(Debug)]
pub struct ValidationFailure {
    pub phase: Phase,
    pub index: usize,
    pub step: String,
    pub error: Error,
}

impl std::fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} step {} '{}': {}",
            self.phase,
            self.index + 1,
            self.step,
            self.error
        )
    }
}

impl TestCase {
    /// Create an empty test case, for building cases in code
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            phases: Default::default(),
        }
    }

    /// Append a step to a phase
    pub fn with_step(mut self, phase: Phase, step: impl Step + 'static) -> Self {
        self.phases[phase.index()].push(Arc::new(step));
        self
    }

    pub fn steps(&self, phase: Phase) -> &[Arc<dyn Step>] {
        &self.phases[phase.index()]
    }

    pub fn step_count(&self) -> usize {
        self.phases.iter().map(Vec::len).sum()
    }

    /// Load a test case from a YAML file, resolving imports
    pub fn load(path: &Path, services: &Services) -> Result<Self> {
        let path = canonical(path)?;
        let definition = read_definition(&path)?;
        let mut chain = vec![path.clone()];
        let plan = plan(&definition, parent_dir(&path), &mut chain)?;
        Self::build(&definition, plan, services)
    }

    /// Build a test case from an already parsed definition
    ///
    /// Relative paths, including imports, are resolved against `base_dir`.
    pub fn from_definition(
        definition: &TestCaseDefinition,
        base_dir: &Path,
        services: &Services,
    ) -> Result<Self> {
        let mut chain = Vec::new();
        let plan = plan(definition, base_dir, &mut chain)?;
        Self::build(definition, plan, services)
    }

    fn build(definition: &TestCaseDefinition, plan: Plan, services: &Services) -> Result<Self> {
        let mut case = Self::new(definition.name.clone());
        case.description = definition.description.clone();
        for (slot, planned) in case.phases.iter_mut().zip(plan) {
            for step in planned {
                slot.push(build_step(&step.definition, &step.base_dir, services)?);
            }
        }
        Ok(case)
    }

    /// Validate every step without executing anything
    pub fn validate(&self, ctx: &Context) -> Vec<ValidationFailure> {
        let mut failures = Vec::new();
        for phase in Phase::ALL {
            for (index, step) in self.steps(phase).iter().enumerate() {
                if let Err(error) = step.validate(ctx) {
                    failures.push(ValidationFailure {
                        phase,
                        index,
                        step: step.name().to_string(),
                        error,
                    });
                }
            }
        }
        failures
    }
}

/// A step definition together with the directory its paths are relative to
struct PlannedStep {
    definition: StepDefinition,
    base_dir: PathBuf,
}

type Plan = [Vec<PlannedStep>; 3];

fn canonical(path: &Path) -> Result<PathBuf> {
    path.canonicalize().map_err(|e| Error::FileRead {
        path: path.display().to_string(),
        error: e.to_string(),
    })
}

fn parent_dir(path: &Path) -> &Path {
    path.parent().unwrap_or(Path::new("."))
}

fn read_definition(path: &Path) -> Result<TestCaseDefinition> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
        path: path.display().to_string(),
        error: e.to_string(),
    })?;
    serde_yaml::from_str(&content)
        .map_err(|e| Error::Parse(format!("{}: {}", path.display(), e)))
}

/// Flatten a definition and its imports into per-phase step lists
///
/// `chain` holds the files currently being imported, outermost first.
fn plan(definition: &TestCaseDefinition, base_dir: &Path, chain: &mut Vec<PathBuf>) -> Result<Plan> {
    let mut out: Plan = Default::default();

    for phase in Phase::ALL {
        for step in definition.steps(phase) {
            let StepKind::Import { path, case } = &step.kind else {
                out[phase.index()].push(PlannedStep {
                    definition: step.clone(),
                    base_dir: base_dir.to_path_buf(),
                });
                continue;
            };

            let imported = match (path, case) {
                (Some(path), None) => {
                    let path = canonical(&base_dir.join(path))?;
                    if chain.contains(&path) {
                        let cycle = chain
                            .iter()
                            .chain(std::iter::once(&path))
                            .map(|p| p.display().to_string())
                            .collect::<Vec<_>>()
                            .join(" -> ");
                        return Err(Error::Cycle(cycle));
                    }
                    let definition = read_definition(&path)?;
                    chain.push(path.clone());
                    let imported = plan(&definition, parent_dir(&path), chain);
                    chain.pop();
                    imported?
                }
                (None, Some(embedded)) => plan(embedded, base_dir, chain)?,
                (Some(_), Some(_)) => {
                    return Err(Error::Configuration(format!(
                        "{} import in '{}': set either 'path' or 'case', not both",
                        phase, definition.name
                    )))
                }
                (None, None) => {
                    return Err(Error::Configuration(format!(
                        "{} import in '{}': one of 'path' or 'case' is required",
                        phase, definition.name
                    )))
                }
            };

            // Earlier phases are complete, so their imported steps land at
            // the end. Later phases hold none of this case's own steps yet,
            // so theirs land before them. Both are a plain append here.
            for (slot, steps) in out.iter_mut().zip(imported) {
                slot.extend(steps);
            }
        }
    }

    Ok(out)
}

fn build_step(definition: &StepDefinition, base_dir: &Path, services: &Services) -> Result<Arc<dyn Step>> {
    let files = &services.files;
    let concurrent = definition.run_concurrently;

    let step: Arc<dyn Step> = match &definition.kind {
        StepKind::Publish { channel, data } => {
            let step = PublishStep::new(channel.clone(), data.build(base_dir, files)?, Arc::clone(&services.bus))
                .concurrently(concurrent);
            Arc::new(rename(step, definition, |s, name| s.named(name)))
        }
        StepKind::Subscribe {
            channel,
            queue,
            expected_count,
            timeout_secs,
        } => {
            let timeout = timeout_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| services.timeouts.subscribe());
            let step = SubscribeStep::new(channel.clone(), queue.clone(), Arc::clone(&services.bus))
                .expecting(expected_count.unwrap_or(1))
                .timeout(timeout)
                .concurrently(concurrent);
            Arc::new(rename(step, definition, |s, name| s.named(name)))
        }
        StepKind::ProcessStart {
            path,
            args,
            working_dir,
            wait,
            expected_exit_code,
            pid_key,
        } => {
            // Relative program paths with a directory part are relative to
            // the case file; bare names are looked up in PATH at start.
            let program = if path.components().count() > 1 && path.is_relative() {
                base_dir.join(path)
            } else {
                path.clone()
            };
            let step = ProcessStartStep::new(program, Arc::clone(&services.launcher))
                .args(args.clone())
                .working_dir(working_dir.as_ref().map(|d| base_dir.join(d)))
                .wait_for_exit(*wait, *expected_exit_code)
                .pid_key(pid_key.clone())
                .concurrently(concurrent);
            Arc::new(rename(step, definition, |s, name| s.named(name)))
        }
        StepKind::LoadData { key, data, as_text } => {
            let step = LoadDataStep::new(key.clone(), data.build(base_dir, files)?)
                .as_text(*as_text)
                .concurrently(concurrent);
            Arc::new(rename(step, definition, |s, name| s.named(name)))
        }
        StepKind::AssertQueue {
            queue,
            expect,
            mode,
            timeout_secs,
        } => {
            let timeout = timeout_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| services.timeouts.dequeue());
            let step = AssertQueueStep::new(queue.clone(), expect.build(base_dir, files)?)
                .mode(*mode)
                .timeout(timeout)
                .concurrently(concurrent);
            Arc::new(rename(step, definition, |s, name| s.named(name)))
        }
        StepKind::AssertValue { key, expect, mode } => {
            let step = AssertValueStep::new(key.clone(), expect.build(base_dir, files)?)
                .mode(*mode)
                .concurrently(concurrent);
            Arc::new(rename(step, definition, |s, name| s.named(name)))
        }
        StepKind::Delay { millis } => {
            let step = DelayStep::new(Duration::from_millis(*millis)).concurrently(concurrent);
            Arc::new(rename(step, definition, |s, name| s.named(name)))
        }
        StepKind::Import { .. } => {
            return Err(Error::Internal(
                "import steps are resolved before steps are built".to_string(),
            ))
        }
    };
    Ok(step)
}

fn rename<S>(step: S, definition: &StepDefinition, named: impl FnOnce(S, String) -> S) -> S {
    match &definition.name {
        Some(name) => named(step, name.clone()),
        None => step,
    }
}
