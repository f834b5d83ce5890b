// Scripted sandbox and fixtures shared by the worker's unit tests

use crate::sandbox::{ExecutionRequest, Sandbox, SandboxError};
use async_trait::async_trait;
use grader_common::types::{ExecutionResult, Fixture, FunctionArity, Language, ProblemSpec, Submission};
use grader_common::value::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// What the scripted candidate does for one invocation
pub enum Scripted {
    Return(String),
    Crash(String),
    Hang,
    Unavailable,
    Reject(String),
    Delayed(Duration, Box<Scripted>),
}

/// What provisioning does before the candidate runs
pub enum Setup {
    Ready,
    Unavailable,
    Stall(Duration, Box<Setup>),
}

type Script = Box<dyn Fn(&ExecutionRequest) -> Scripted + Send + Sync>;
type SetupScript = Box<dyn Fn() -> Setup + Send + Sync>;

pub struct ScriptedSandbox {
    script: Script,
    setup: SetupScript,
    calls: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
}

struct Running<'a>(&'a AtomicUsize);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedSandbox {
    pub fn new(script: impl Fn(&ExecutionRequest) -> Scripted + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            setup: Box::new(|| Setup::Ready),
            calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_setup(mut self, setup: impl Fn() -> Setup + Send + Sync + 'static) -> Self {
        self.setup = Box::new(setup);
        self
    }

    /// A correct median-of-two-sorted-arrays candidate
    pub fn median() -> Self {
        Self::new(Self::median_step)
    }

    pub fn median_step(request: &ExecutionRequest) -> Scripted {
        let mut merged: Vec<f64> = Vec::new();
        for argument in &request.arguments {
            match argument {
                Value::Seq(items) => merged.extend(items.iter().filter_map(Value::as_f64)),
                other => return Scripted::Crash(format!("TypeError: expected list, got {}", other.kind_name())),
            }
        }
        merged.sort_by(f64::total_cmp);
        let n = merged.len();
        if n == 0 {
            return Scripted::Crash("ValueError: empty input".to_string());
        }
        let median = if n % 2 == 1 {
            merged[n / 2]
        } else {
            (merged[n / 2 - 1] + merged[n / 2]) / 2.0
        };
        Scripted::Return(Value::Float(median).to_string())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most invocations observed in flight at once
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn provision(mut step: Setup) -> Result<(), SandboxError> {
        loop {
            match step {
                Setup::Ready => return Ok(()),
                Setup::Unavailable => {
                    return Err(SandboxError::Unavailable("docker daemon unreachable".to_string()))
                }
                Setup::Stall(delay, next) => {
                    tokio::time::sleep(delay).await;
                    step = *next;
                }
            }
        }
    }

    async fn perform(mut step: Scripted) -> Result<ExecutionResult, SandboxError> {
        loop {
            match step {
                Scripted::Return(raw) => return Ok(ExecutionResult::returned(raw, 1)),
                Scripted::Crash(stderr) => return Ok(ExecutionResult::crashed(stderr, 1, 1)),
                Scripted::Hang => return std::future::pending().await,
                Scripted::Unavailable => {
                    return Err(SandboxError::Unavailable("docker daemon unreachable".to_string()))
                }
                Scripted::Reject(reason) => return Err(SandboxError::Rejected(reason)),
                Scripted::Delayed(delay, next) => {
                    tokio::time::sleep(delay).await;
                    step = *next;
                }
            }
        }
    }
}

#[async_trait]
impl Sandbox for ScriptedSandbox {
    type Prepared = ();

    async fn prepare(&self, _request: &ExecutionRequest) -> Result<(), SandboxError> {
        Self::provision((self.setup)()).await
    }

    async fn run(&self, _prepared: (), request: &ExecutionRequest) -> Result<ExecutionResult, SandboxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _running = Running(&self.running);

        let step = (self.script)(request);
        Self::perform(step).await
    }
}

pub fn median_problem() -> ProblemSpec {
    ProblemSpec {
        id: "median-of-two-sorted-arrays".to_string(),
        entry_point: "find_median_sorted_arrays".to_string(),
        function_arity: FunctionArity::Spread,
        fixtures: vec![
            Fixture::new("[[1,3],[2]]", "2"),
            Fixture::new("[[1,2],[3,4]]", "2.5"),
            Fixture::new("[[0,0],[0,0]]", "0"),
        ],
        time_budget_ms: None,
    }
}

pub fn median_submission() -> Submission {
    Submission {
        problem_id: "median-of-two-sorted-arrays".to_string(),
        language: Language::Python,
        source_code: "def find_median_sorted_arrays(a, b):\n    ...\n".to_string(),
    }
}
