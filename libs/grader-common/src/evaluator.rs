/// Test Evaluator - Language-Agnostic Scoring Logic
///
/// **Core Responsibility:**
/// Turn one fixture plus one raw `ExecutionResult` into a `TestVerdict`, and
/// derive the submission status from an ordered list of verdicts.
///
/// **Critical Properties:**
/// - Knows nothing about Docker, Redis or language runtimes
/// - Pure functions: (fixture, execution) → verdict
///
/// **Classification Order:**
/// 1. Fixture authoring defects (unparseable input/expected, arity mismatch) → InternalError
/// 2. Timeout → TimeLimitExceeded
/// 3. Crash / non-zero exit / no result emitted → RuntimeError
/// 4. Unreadable result literal → RuntimeError
/// 5. Comparator mismatch → WrongAnswer, otherwise Pass

use crate::canonical::{canonicalize, normalize_literal, Canonical};
use crate::compare::{effective_tolerance, equal};
use crate::error::{FixtureError, FixtureField};
use crate::marshal::marshal;
use crate::types::{
    ExecutionResult, Fixture, FunctionArity, ProblemSpec, SubmissionStatus, SubmissionVerdict, TestVerdict,
    VerdictKind,
};
use crate::value::Value;
use tracing::debug;

/// Longest stderr excerpt attached to a verdict
const MAX_DIAGNOSTIC_CHARS: usize = 4096;

/// A fixture whose input and expected value have been parsed
#[derive(Debug, Clone)]
pub struct PreparedFixture {
    pub index: usize,
    pub arguments: Vec<Value>,
    pub expected: Canonical,
    pub order_sensitive: bool,
    pub tolerance: f64,
}

/// Marshal the input and normalize the expected value of one fixture
///
/// Done before any execution, so authoring defects never cost sandbox time.
pub fn prepare_fixture(
    index: usize,
    fixture: &Fixture,
    arity: FunctionArity,
    default_tolerance: f64,
) -> Result<PreparedFixture, FixtureError> {
    let arguments = marshal(&fixture.input_text, arity)?;
    let expected = normalize_literal(&fixture.expected_text, fixture.order_sensitive).map_err(
        |source| FixtureError::Parse {
            field: FixtureField::Expected,
            source,
        },
    )?;

    Ok(PreparedFixture {
        index,
        arguments,
        expected,
        order_sensitive: fixture.order_sensitive,
        tolerance: effective_tolerance(fixture.tolerance_hint.unwrap_or(default_tolerance)),
    })
}

/// Verdict for a fixture that could not be prepared
pub fn internal_error(index: usize, error: &FixtureError) -> TestVerdict {
    TestVerdict {
        fixture_index: index,
        passed: false,
        kind: VerdictKind::InternalError,
        actual_canonical: None,
        expected_canonical: None,
        diagnostic: Some(error.to_string()),
        duration_ms: 0,
    }
}

fn excerpt(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MAX_DIAGNOSTIC_CHARS).collect())
}

/// Score one execution against its prepared fixture
pub fn evaluate_execution(prepared: &PreparedFixture, execution: &ExecutionResult) -> TestVerdict {
    let expected_canonical = Some(prepared.expected.to_string());
    let failed = |kind: VerdictKind, diagnostic: Option<String>| TestVerdict {
        fixture_index: prepared.index,
        passed: false,
        kind,
        actual_canonical: None,
        expected_canonical: expected_canonical.clone(),
        diagnostic,
        duration_ms: execution.duration_ms,
    };

    if execution.timed_out {
        return failed(VerdictKind::TimeLimitExceeded, excerpt(&execution.stderr));
    }

    let crashed = execution.exit_signal.is_some_and(|code| code != 0);
    let raw = match (&execution.raw_output, crashed) {
        (Some(raw), false) => raw,
        (None, false) => {
            return failed(
                VerdictKind::RuntimeError,
                excerpt(&execution.stderr)
                    .or_else(|| Some("program exited without emitting a result".to_string())),
            );
        }
        (_, true) => {
            let mut diagnostic = excerpt(&execution.stderr).unwrap_or_default();
            if let Some(code) = execution.exit_signal {
                if !diagnostic.is_empty() {
                    diagnostic.push('\n');
                }
                diagnostic.push_str(&format!("[exit status {}]", code));
            }
            return failed(VerdictKind::RuntimeError, Some(diagnostic));
        }
    };

    let actual = match Value::parse(raw) {
        Ok(value) => canonicalize(&value, prepared.order_sensitive),
        Err(e) => {
            return failed(
                VerdictKind::RuntimeError,
                Some(format!("result is not a readable value: {}", e)),
            );
        }
    };

    let passed = equal(&actual, &prepared.expected, prepared.tolerance);
    debug!(
        fixture = prepared.index,
        passed,
        actual = %actual,
        expected = %prepared.expected,
        "Fixture compared"
    );

    TestVerdict {
        fixture_index: prepared.index,
        passed,
        kind: if passed {
            VerdictKind::Pass
        } else {
            VerdictKind::WrongAnswer
        },
        actual_canonical: Some(actual.to_string()),
        expected_canonical,
        diagnostic: None,
        duration_ms: execution.duration_ms,
    }
}

/// Overall status for verdicts in declaration order
///
/// `Accepted` iff every verdict passed; otherwise the kind of the first
/// failing fixture. An empty list cannot be accepted: a problem without
/// fixtures is an authoring defect.
pub fn derive_status(verdicts: &[TestVerdict]) -> SubmissionStatus {
    if verdicts.is_empty() {
        return SubmissionStatus::InternalError;
    }
    verdicts
        .iter()
        .find(|v| v.kind != VerdictKind::Pass)
        .map(|v| SubmissionStatus::from(v.kind))
        .unwrap_or(SubmissionStatus::Accepted)
}

/// Seal verdicts into a terminal `SubmissionVerdict`
pub fn aggregate(mut verdicts: Vec<TestVerdict>, total_duration_ms: u64) -> SubmissionVerdict {
    verdicts.sort_by_key(|v| v.fixture_index);
    SubmissionVerdict {
        status: derive_status(&verdicts),
        test_verdicts: verdicts,
        total_duration_ms,
    }
}

/// Authoring defects of every fixture in `problem`, in declaration order
pub fn audit_problem(problem: &ProblemSpec, default_tolerance: f64) -> Vec<(usize, FixtureError)> {
    problem
        .fixtures
        .iter()
        .enumerate()
        .filter_map(|(index, fixture)| {
            prepare_fixture(index, fixture, problem.function_arity, default_tolerance)
                .err()
                .map(|e| (index, e))
        })
        .collect()
}
