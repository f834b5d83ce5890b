/// Harness verification
///
/// Validates the grading pipeline itself, independent of any sandbox: each
/// `{input, expected}` case goes through Marshaler → invocation of a trusted,
/// compiled-in reference implementation → Normalizer → Comparator, exactly as
/// a sandboxed run would.

use crate::config::DEFAULT_TOLERANCE;
use crate::evaluator::{evaluate_execution, internal_error, prepare_fixture};
use crate::types::{
    ExecutionResult, Fixture, FunctionArity, SubmissionStatus, TestVerdict, VerdictKind,
};
use crate::value::Value;
use serde::Deserialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

/// Exit status reported for a reference implementation that panicked
const PANIC_EXIT_SIGNAL: i64 = 101;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HarnessCase {
    pub input: String,
    pub expected: String,
}

#[derive(Debug, Clone, Copy)]
pub struct HarnessOptions {
    pub arity: FunctionArity,
    pub order_sensitive: bool,
    pub tolerance: f64,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            arity: FunctionArity::Spread,
            order_sensitive: true,
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

/// Outcome of a harness run; always covers every case
#[derive(Debug, Clone)]
pub struct HarnessReport {
    pub verdicts: Vec<TestVerdict>,
}

impl HarnessReport {
    pub fn passed_count(&self) -> usize {
        self.verdicts.iter().filter(|v| v.passed).count()
    }

    pub fn all_passed(&self) -> bool {
        !self.verdicts.is_empty() && self.passed_count() == self.verdicts.len()
    }

    pub fn status(&self) -> SubmissionStatus {
        crate::evaluator::derive_status(&self.verdicts)
    }
}

/// Run every case through the pipeline against `reference`
///
/// `reference` receives the marshaled argument list. An `Err` or a panic is
/// reported as a runtime error for that case only.
pub fn verify<F>(cases: &[HarnessCase], options: &HarnessOptions, reference: F) -> HarnessReport
where
    F: Fn(&[Value]) -> Result<Value, String>,
{
    let verdicts = cases
        .iter()
        .enumerate()
        .map(|(index, case)| {
            let fixture = Fixture {
                input_text: case.input.clone(),
                expected_text: case.expected.clone(),
                order_sensitive: options.order_sensitive,
                tolerance_hint: Some(options.tolerance),
            };
            match prepare_fixture(index, &fixture, options.arity, options.tolerance) {
                Ok(prepared) => {
                    let execution = invoke(&reference, &prepared.arguments);
                    evaluate_execution(&prepared, &execution)
                }
                Err(e) => internal_error(index, &e),
            }
        })
        .collect();

    HarnessReport { verdicts }
}

fn invoke<F>(reference: &F, arguments: &[Value]) -> ExecutionResult
where
    F: Fn(&[Value]) -> Result<Value, String>,
{
    let start = Instant::now();
    let outcome = catch_unwind(AssertUnwindSafe(|| reference(arguments)));
    let duration_ms = start.elapsed().as_millis() as u64;

    match outcome {
        Ok(Ok(value)) => ExecutionResult::returned(value.to_string(), duration_ms),
        Ok(Err(message)) => ExecutionResult::crashed(message, 1, duration_ms),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "reference implementation panicked".to_string());
            ExecutionResult::crashed(message, PANIC_EXIT_SIGNAL, duration_ms)
        }
    }
}

/// Marker printed for a case in harness output
pub fn case_marker(verdict: &TestVerdict) -> &'static str {
    match verdict.kind {
        VerdictKind::Pass => "✓",
        _ => "✗",
    }
}
