/// Grader - Orchestrates one submission against one problem
///
/// **Core Responsibility:**
/// Drive every fixture through marshal → execute → normalize → compare and
/// fold the verdicts into a single submission verdict.
///
/// **Fixture lifecycle:**
/// `Pending` → `Executed` (sandbox returned) → `Scored` (verdict attached).
/// A fixture whose literals fail to parse skips execution and is scored
/// `InternalError` directly; the candidate never runs against it.
///
/// **Guarantees:**
/// - Verdicts are reported in fixture declaration order
/// - A hung sandbox is abandoned after budget + grace and scored TLE;
///   provisioning is bounded separately and never charged to the candidate
/// - Cancellation stops scheduling new fixtures and keeps completed verdicts
/// - Sandbox infrastructure failure is an error, never a verdict

use crate::cancel::CancelSignal;
use crate::sandbox::{ExecutionRequest, Sandbox, SandboxError};
use futures_util::stream::{self, StreamExt};
use grader_common::config::{FailurePolicy, GradingConfig};
use grader_common::evaluator::{aggregate, evaluate_execution, internal_error, prepare_fixture, PreparedFixture};
use grader_common::types::{
    ExecutionResult, Fixture, ProblemSpec, Submission, SubmissionVerdict, TestVerdict, VerdictKind,
};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum GradeOutcome {
    Resolved(SubmissionVerdict),
    /// Cancelled before every fixture was scored
    Cancelled {
        completed: Vec<TestVerdict>,
        total_duration_ms: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GradeError {
    #[error("sandbox unavailable at fixture {fixture}: {reason}")]
    SandboxUnavailable { fixture: usize, reason: String },
}

enum FixtureState {
    Pending,
    Executed {
        prepared: PreparedFixture,
        execution: ExecutionResult,
    },
    Scored(TestVerdict),
}

impl FixtureState {
    fn score(self) -> FixtureState {
        match self {
            FixtureState::Executed { prepared, execution } => {
                FixtureState::Scored(evaluate_execution(&prepared, &execution))
            }
            other => other,
        }
    }
}

enum FixtureAbort {
    Cancelled,
    Unavailable { fixture: usize, reason: String },
}

pub struct Grader<S> {
    sandbox: S,
    config: GradingConfig,
}

impl<S: Sandbox> Grader<S> {
    pub fn new(sandbox: S, config: GradingConfig) -> Self {
        Self { sandbox, config }
    }

    pub fn config(&self) -> &GradingConfig {
        &self.config
    }

    #[instrument(
        skip_all,
        fields(problem_id = %problem.id, language = %submission.language, fixtures = problem.fixtures.len())
    )]
    pub async fn grade(
        &self,
        submission: &Submission,
        problem: &ProblemSpec,
        cancel: &CancelSignal,
    ) -> Result<GradeOutcome, GradeError> {
        let start = Instant::now();

        if problem.fixtures.is_empty() {
            error!(problem_id = %problem.id, "Problem has no fixtures; refusing to accept");
            return Ok(GradeOutcome::Resolved(aggregate(Vec::new(), 0)));
        }

        let budget = self.config.time_budget_for(problem);
        let mut states: Vec<FixtureState> =
            problem.fixtures.iter().map(|_| FixtureState::Pending).collect();

        // futures are lazy; buffered() decides how many are polled at once
        let pending: Vec<_> = problem
            .fixtures
            .iter()
            .enumerate()
            .map(|(index, fixture)| self.run_fixture(index, fixture, submission, problem, budget, cancel))
            .collect();
        let runs = stream::iter(pending).buffered(self.config.max_parallel_fixtures.max(1));
        futures_util::pin_mut!(runs);

        let mut cancelled = false;
        while let Some(run) = runs.next().await {
            let (index, state) = match run {
                Ok(run) => run,
                Err(FixtureAbort::Cancelled) => {
                    cancelled = true;
                    break;
                }
                Err(FixtureAbort::Unavailable { fixture, reason }) => {
                    error!(fixture, reason = %reason, "Sandbox unavailable; abandoning submission");
                    return Err(GradeError::SandboxUnavailable { fixture, reason });
                }
            };

            states[index] = state.score();
            if let FixtureState::Scored(verdict) = &states[index] {
                debug!(
                    fixture = index,
                    kind = ?verdict.kind,
                    duration_ms = verdict.duration_ms,
                    "Fixture scored"
                );
                if !verdict.passed && self.config.failure_policy == FailurePolicy::StopOnFirstFailure {
                    info!(fixture = index, kind = ?verdict.kind, "Stopping at first failing fixture");
                    break;
                }
            }
        }

        let verdicts: Vec<TestVerdict> = states
            .into_iter()
            .filter_map(|state| match state {
                FixtureState::Scored(verdict) => Some(verdict),
                _ => None,
            })
            .collect();
        let total_duration_ms = start.elapsed().as_millis() as u64;

        if cancelled {
            warn!(completed = verdicts.len(), "Grading cancelled");
            return Ok(GradeOutcome::Cancelled {
                completed: verdicts,
                total_duration_ms,
            });
        }

        let verdict = aggregate(verdicts, total_duration_ms);
        info!(
            status = ?verdict.status,
            scored = verdict.test_verdicts.len(),
            total_ms = total_duration_ms,
            "Submission graded"
        );
        Ok(GradeOutcome::Resolved(verdict))
    }

    async fn run_fixture(
        &self,
        index: usize,
        fixture: &Fixture,
        submission: &Submission,
        problem: &ProblemSpec,
        budget: Duration,
        cancel: &CancelSignal,
    ) -> Result<(usize, FixtureState), FixtureAbort> {
        if cancel.is_cancelled() {
            return Err(FixtureAbort::Cancelled);
        }

        let prepared = match prepare_fixture(
            index,
            fixture,
            problem.function_arity,
            self.config.default_tolerance,
        ) {
            Ok(prepared) => prepared,
            Err(e) => {
                error!(problem_id = %problem.id, fixture = index, error = %e, "Fixture authoring defect");
                return Ok((index, FixtureState::Scored(internal_error(index, &e))));
            }
        };

        let request = ExecutionRequest {
            language: submission.language,
            source_code: submission.source_code.clone(),
            entry_point: problem.entry_point.clone(),
            arguments: prepared.arguments.clone(),
            time_budget: budget,
        };
        // setup is bounded on its own; a stalled daemon is an outage, not a TLE
        let setup_timeout = self.config.setup_timeout();
        let environment = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FixtureAbort::Cancelled),
            result = tokio::time::timeout(setup_timeout, self.sandbox.prepare(&request)) => match result {
                Ok(Ok(environment)) => environment,
                Ok(Err(e)) => return sandbox_failure(index, e, Duration::ZERO),
                Err(_) => {
                    return Err(FixtureAbort::Unavailable {
                        fixture: index,
                        reason: format!("sandbox setup exceeded {}ms", setup_timeout.as_millis()),
                    });
                }
            },
        };

        let deadline = budget + self.config.grace();
        let started = Instant::now();

        let execution = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FixtureAbort::Cancelled),
            result = tokio::time::timeout(deadline, self.sandbox.run(environment, &request)) => match result {
                Ok(Ok(execution)) => execution,
                Ok(Err(e)) => return sandbox_failure(index, e, started.elapsed()),
                Err(_) => {
                    warn!(fixture = index, deadline_ms = deadline.as_millis() as u64, "Sandbox overran deadline; abandoning");
                    ExecutionResult::timed_out(started.elapsed().as_millis() as u64)
                }
            },
        };

        Ok((index, FixtureState::Executed { prepared, execution }))
    }
}

fn sandbox_failure(
    index: usize,
    error: SandboxError,
    elapsed: Duration,
) -> Result<(usize, FixtureState), FixtureAbort> {
    match error {
        SandboxError::Unavailable(reason) => Err(FixtureAbort::Unavailable { fixture: index, reason }),
        SandboxError::Rejected(reason) => {
            error!(fixture = index, reason = %reason, "Sandbox rejected fixture");
            let mut verdict = internal_verdict(index, reason);
            verdict.duration_ms = elapsed.as_millis() as u64;
            Ok((index, FixtureState::Scored(verdict)))
        }
    }
}

fn internal_verdict(index: usize, diagnostic: String) -> TestVerdict {
    TestVerdict {
        fixture_index: index,
        passed: false,
        kind: VerdictKind::InternalError,
        actual_canonical: None,
        expected_canonical: None,
        diagnostic: Some(diagnostic),
        duration_ms: 0,
    }
}
