/// Job Executor - Persistence glue around the worker pool
///
/// **Responsibility:**
/// - Turn each grading outcome into a stored result or a requeue
/// - Relay cancellation requests from Redis to running jobs
///
/// This module knows nothing about how code executes (the sandbox's job) or
/// how fixtures are scored (the grader's job).

use crate::grader::{GradeError, GradeOutcome};
use crate::pool::{JobOutcome, WorkerPool};
use crate::sandbox::Sandbox;
use chrono::Utc;
use grader_common::evaluator::aggregate;
use grader_common::redis;
use grader_common::types::{JobRequest, JobResult, JobState, SubmissionStatus, SubmissionVerdict};
use ::redis::aio::ConnectionManager;
use ::redis::RedisResult;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// What the sink does with one outcome
#[derive(Debug, Clone, PartialEq)]
pub enum SinkAction {
    Store(JobResult),
    Requeue(JobRequest),
}

/// Decide how to persist an outcome
///
/// Sandbox outages put the job back on the queue until it has been tried
/// `max_attempts` times; after that it resolves as `SystemError`. A job
/// cancelled without a user request (worker shutdown) is requeued as is.
pub fn plan(outcome: JobOutcome, max_attempts: u32, cancel_requested: bool) -> SinkAction {
    let JobOutcome { mut job, outcome } = outcome;

    match outcome {
        Ok(GradeOutcome::Resolved(verdict)) => SinkAction::Store(result(&job, JobState::Resolved, verdict)),
        Ok(GradeOutcome::Cancelled { .. }) if !cancel_requested => SinkAction::Requeue(job),
        Ok(GradeOutcome::Cancelled {
            completed,
            total_duration_ms,
        }) => {
            let mut verdict = aggregate(completed, total_duration_ms);
            // partial verdicts never resolve a submission
            if verdict.status == SubmissionStatus::Accepted {
                verdict.status = SubmissionStatus::InternalError;
            }
            SinkAction::Store(result(&job, JobState::Cancelled, verdict))
        }
        Err(GradeError::SandboxUnavailable { .. }) => {
            job.metadata.attempts += 1;
            if job.metadata.attempts < max_attempts {
                SinkAction::Requeue(job)
            } else {
                let verdict = SubmissionVerdict {
                    status: SubmissionStatus::SystemError,
                    test_verdicts: Vec::new(),
                    total_duration_ms: 0,
                };
                SinkAction::Store(result(&job, JobState::Resolved, verdict))
            }
        }
    }
}

fn result(job: &JobRequest, state: JobState, verdict: SubmissionVerdict) -> JobResult {
    JobResult {
        job_id: job.id,
        state,
        verdict,
        completed_at: Utc::now(),
    }
}

/// Whether a cancelled job was cancelled by its submitter. An unreadable flag
/// counts as shutdown so the job is requeued rather than lost.
fn cancel_requested_by_user(job_id: &Uuid, flag: RedisResult<bool>) -> bool {
    flag.unwrap_or_else(|e| {
        warn!(job_id = %job_id, error = %e, "Failed to read cancel flag; treating as shutdown");
        false
    })
}

/// Persist outcomes until every pool handle is dropped
pub async fn run_result_sink(
    mut outcomes: mpsc::Receiver<JobOutcome>,
    mut redis_conn: ConnectionManager,
    max_attempts: u32,
) {
    while let Some(outcome) = outcomes.recv().await {
        let job_id = outcome.job.id;
        if let Err(e) = &outcome.outcome {
            warn!(job_id = %job_id, error = %e, attempts = outcome.job.metadata.attempts + 1, "Grading abandoned");
        }

        let cancel_requested = match &outcome.outcome {
            Ok(GradeOutcome::Cancelled { .. }) => {
                cancel_requested_by_user(&job_id, redis::is_job_cancelled(&mut redis_conn, &job_id).await)
            }
            _ => false,
        };

        match plan(outcome, max_attempts, cancel_requested) {
            SinkAction::Store(result) => match redis::store_result(&mut redis_conn, &result).await {
                Ok(_) => info!(
                    job_id = %job_id,
                    state = ?result.state,
                    status = ?result.verdict.status,
                    "Result persisted to Redis"
                ),
                Err(e) => error!(job_id = %job_id, error = %e, "Failed to persist result"),
            },
            SinkAction::Requeue(job) => {
                let requeued = async {
                    redis::set_job_state(&mut redis_conn, &job.id, JobState::Queued).await?;
                    redis::requeue_job(&mut redis_conn, &job).await
                };
                match requeued.await {
                    Ok(_) => info!(job_id = %job_id, attempts = job.metadata.attempts, "Job requeued"),
                    Err(e) => error!(job_id = %job_id, error = %e, "Failed to requeue job"),
                }
            }
        }
    }
    info!("Result sink stopped");
}

/// Poll Redis for cancel requests targeting jobs running in `pool`
pub async fn watch_cancellations<S: Sandbox + 'static>(pool: WorkerPool<S>, mut redis_conn: ConnectionManager) {
    let monitor = pool.monitor();
    let mut interval = tokio::time::interval(CANCEL_POLL_INTERVAL);
    loop {
        interval.tick().await;
        for job_id in monitor.active_jobs() {
            match redis::is_job_cancelled(&mut redis_conn, &job_id).await {
                Ok(true) => {
                    if pool.cancel(&job_id) {
                        info!(job_id = %job_id, "Cancellation requested");
                    }
                }
                Ok(false) => {}
                Err(e) => warn!(job_id = %job_id, error = %e, "Failed to check cancellation status"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{median_problem, median_submission};
    use grader_common::types::{JobMetadata, TestVerdict, VerdictKind};

    fn job(attempts: u32) -> JobRequest {
        JobRequest {
            id: Uuid::new_v4(),
            submission: median_submission(),
            problem: median_problem(),
            metadata: JobMetadata {
                attempts,
                queued_at: None,
            },
        }
    }

    fn passing(index: usize) -> TestVerdict {
        TestVerdict {
            fixture_index: index,
            passed: true,
            kind: VerdictKind::Pass,
            actual_canonical: Some("2".to_string()),
            expected_canonical: Some("2".to_string()),
            diagnostic: None,
            duration_ms: 3,
        }
    }

    fn unavailable() -> Result<GradeOutcome, GradeError> {
        Err(GradeError::SandboxUnavailable {
            fixture: 0,
            reason: "daemon down".to_string(),
        })
    }

    #[test]
    fn test_resolved_is_stored() {
        let verdict = aggregate(vec![passing(0)], 3);
        let job = job(0);
        let id = job.id;
        match plan(JobOutcome { job, outcome: Ok(GradeOutcome::Resolved(verdict.clone())) }, 3, false) {
            SinkAction::Store(result) => {
                assert_eq!(result.job_id, id);
                assert_eq!(result.state, JobState::Resolved);
                assert_eq!(result.verdict, verdict);
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn test_cancelled_keeps_partial_verdicts_but_never_accepts() {
        let outcome = Ok(GradeOutcome::Cancelled {
            completed: vec![passing(0)],
            total_duration_ms: 10,
        });
        match plan(JobOutcome { job: job(0), outcome }, 3, true) {
            SinkAction::Store(result) => {
                assert_eq!(result.state, JobState::Cancelled);
                assert_eq!(result.verdict.test_verdicts.len(), 1);
                assert_ne!(result.verdict.status, SubmissionStatus::Accepted);
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn test_shutdown_cancellation_requeues_without_attempt() {
        let outcome = Ok(GradeOutcome::Cancelled {
            completed: vec![passing(0)],
            total_duration_ms: 10,
        });
        match plan(JobOutcome { job: job(1), outcome }, 3, false) {
            SinkAction::Requeue(job) => assert_eq!(job.metadata.attempts, 1),
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn test_unreadable_cancel_flag_counts_as_shutdown() {
        let id = Uuid::new_v4();
        let lost = Err(::redis::RedisError::from((::redis::ErrorKind::IoError, "connection reset")));
        assert!(!cancel_requested_by_user(&id, lost));
        assert!(cancel_requested_by_user(&id, Ok(true)));
        assert!(!cancel_requested_by_user(&id, Ok(false)));

        // and a job cancelled by shutdown goes back on the queue
        let outcome = Ok(GradeOutcome::Cancelled {
            completed: vec![passing(0)],
            total_duration_ms: 10,
        });
        let flag = Err(::redis::RedisError::from((::redis::ErrorKind::IoError, "connection reset")));
        let action = plan(JobOutcome { job: job(0), outcome }, 3, cancel_requested_by_user(&id, flag));
        assert!(matches!(action, SinkAction::Requeue(_)));
    }

    #[test]
    fn test_unavailable_requeues_with_attempt_count() {
        match plan(JobOutcome { job: job(0), outcome: unavailable() }, 3, false) {
            SinkAction::Requeue(job) => assert_eq!(job.metadata.attempts, 1),
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn test_unavailable_exhausted_is_system_error() {
        match plan(JobOutcome { job: job(2), outcome: unavailable() }, 3, false) {
            SinkAction::Store(result) => {
                assert_eq!(result.state, JobState::Resolved);
                assert_eq!(result.verdict.status, SubmissionStatus::SystemError);
                assert!(result.verdict.test_verdicts.is_empty());
            }
            other => panic!("unexpected action {:?}", other),
        }
    }
}
