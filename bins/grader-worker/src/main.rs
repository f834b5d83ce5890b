mod cancel;
mod config;
mod engine;
mod executor;
mod grader;
mod health;
mod pool;
mod sandbox;

#[cfg(test)]
mod testing;

use ::redis::aio::ConnectionManager;
use anyhow::Context;
use cancel::{cancel_pair, CancelSignal};
use chrono::Utc;
use config::{LanguageConfigManager, WorkerSettings};
use engine::DockerSandbox;
use grader::Grader;
use grader_common::config::GradingConfig;
use grader_common::evaluator::aggregate;
use grader_common::redis;
use grader_common::types::{JobRequest, JobResult, JobState, Language};
use pool::WorkerPool;
use sandbox::Sandbox;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, instrument, warn};

const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Grader worker booting...");

    let settings = WorkerSettings::from_env()?;
    let config_manager = LanguageConfigManager::load(&settings.languages_config).map_err(|e| {
        error!("Failed to load language configurations: {}", e);
        e
    })?;
    info!("Loaded language configurations for: {:?}", config_manager.list_languages());

    let language = settings.language;
    let language_config = config_manager.get_config(&language).with_context(|| {
        format!(
            "Language '{}' is not configured; available: {:?}",
            language,
            config_manager.list_languages()
        )
    })?;
    info!(
        language = %language,
        image = %language_config.image,
        queue = %redis::queue_name(&language),
        slots = settings.slots,
        "Worker configured"
    );

    let grading = GradingConfig::from_env();
    info!(
        failure_policy = ?grading.failure_policy,
        time_budget_ms = grading.time_budget_ms,
        grace_ms = grading.grace_ms,
        parallel_fixtures = grading.max_parallel_fixtures,
        "Grading policy"
    );

    let client = ::redis::Client::open(settings.redis_url.as_str())?;
    let mut redis_conn = ::redis::aio::ConnectionManager::new(client).await?;
    info!("Connected to Redis: {}", settings.redis_url);

    let sandbox = DockerSandbox::new(&config_manager)?;
    if let Err(e) = sandbox.warm_up(&language).await {
        warn!(error = %e, "Image warm-up failed; will retry on first job");
    }

    let (pool, outcomes) = WorkerPool::new(Grader::new(sandbox, grading), settings.slots);

    let sink = tokio::spawn(executor::run_result_sink(
        outcomes,
        redis_conn.clone(),
        settings.max_attempts,
    ));
    let watcher = tokio::spawn(executor::watch_cancellations(pool.clone(), redis_conn.clone()));
    let health_server = {
        let monitor = pool.monitor();
        let addr = settings.health_addr;
        tokio::spawn(async move {
            if let Err(e) = health::serve(addr, monitor).await {
                error!(error = %e, "Health server stopped");
            }
        })
    };

    let (shutdown_handle, shutdown) = cancel_pair();
    let signals = tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                warn!("Received shutdown signal, stopping dispatch...");
                shutdown_handle.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
    });

    if let Err(e) = dispatch_loop(&pool, &mut redis_conn, &language, &shutdown).await {
        error!(error = %e, "Dispatch loop failed");
    }
    signals.abort();

    warn!("Cancelling in-flight jobs...");
    pool.cancel_all();
    if !pool.drain(SHUTDOWN_DRAIN_TIMEOUT).await {
        warn!("Timed out waiting for in-flight jobs");
    }

    // Dropping the last pool handle closes the outcome channel
    watcher.abort();
    health_server.abort();
    let _ = watcher.await;
    let _ = health_server.await;
    drop(pool);
    if tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, sink).await.is_err() {
        warn!("Timed out flushing results");
    }

    info!("Worker shutdown complete");
    Ok(())
}

/// Pull jobs while slots are free until `shutdown` is raised
///
/// Shutdown only interrupts the wait for a slot. A job popped from the queue
/// is always either admitted or put back, never dropped mid-flight.
#[instrument(skip(pool, redis_conn, shutdown), fields(language = %language))]
async fn dispatch_loop<S: Sandbox + 'static>(
    pool: &WorkerPool<S>,
    redis_conn: &mut ConnectionManager,
    language: &Language,
    shutdown: &CancelSignal,
) -> anyhow::Result<()> {
    loop {
        let slot = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            slot = pool.reserve() => slot?,
        };

        // BLPOP with 5 second timeout so shutdown is observed promptly
        let job = match redis::pop_job(redis_conn, language, 5.0).await {
            Ok(Some(job)) => job,
            Ok(None) => continue,
            Err(e) => {
                error!(error = %e, "Redis error");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        if shutdown.is_cancelled() {
            match redis::requeue_job(redis_conn, &job).await {
                Ok(()) => info!(job_id = %job.id, "Returned job to queue on shutdown"),
                Err(e) => error!(job_id = %job.id, error = %e, "Failed to return job to queue"),
            }
            break;
        }

        admit(pool, redis_conn, slot, job).await;
    }

    info!("Dispatch stopped");
    Ok(())
}

async fn admit<S: Sandbox + 'static>(
    pool: &WorkerPool<S>,
    redis_conn: &mut ConnectionManager,
    slot: pool::Slot,
    job: JobRequest,
) {
    let job_id = job.id;
    info!(
        job_id = %job_id,
        problem_id = %job.problem.id,
        fixtures = job.problem.fixtures.len(),
        source_size = job.submission.source_code.len(),
        attempt = job.metadata.attempts + 1,
        "Received job"
    );

    if let Ok(true) = redis::is_job_cancelled(redis_conn, &job_id).await {
        info!(job_id = %job_id, "Job cancelled while queued");
        let result = JobResult {
            job_id,
            state: JobState::Cancelled,
            verdict: aggregate(Vec::new(), 0),
            completed_at: Utc::now(),
        };
        if let Err(e) = redis::store_result(redis_conn, &result).await {
            error!(job_id = %job_id, error = %e, "Failed to persist result");
        }
        return;
    }

    if let Err(e) = redis::set_job_state(redis_conn, &job_id, JobState::Running).await {
        warn!(job_id = %job_id, error = %e, "Failed to mark job running");
    }
    pool.spawn(slot, job);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{median_problem, median_submission, ScriptedSandbox};
    use ::redis::AsyncCommands;
    use grader_common::types::JobMetadata;
    use uuid::Uuid;

    async fn connection() -> ConnectionManager {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let client = ::redis::Client::open(url).unwrap();
        ConnectionManager::new(client).await.expect("Redis should be available")
    }

    fn job(language: Language) -> JobRequest {
        let mut submission = median_submission();
        submission.language = language;
        JobRequest {
            id: Uuid::new_v4(),
            submission,
            problem: median_problem(),
            metadata: JobMetadata {
                attempts: 0,
                queued_at: None,
            },
        }
    }

    fn pool() -> (WorkerPool<ScriptedSandbox>, tokio::sync::mpsc::Receiver<pool::JobOutcome>) {
        WorkerPool::new(Grader::new(ScriptedSandbox::median(), GradingConfig::default()), 1)
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_job_popped_during_shutdown_is_returned_to_queue() {
        let mut conn = connection().await;
        let language = Language::Rust;
        let _: () = conn.del(redis::queue_name(&language)).await.unwrap();

        let (pool, _outcomes) = pool();
        let (handle, shutdown) = cancel_pair();
        let dispatcher = tokio::spawn({
            let pool = pool.clone();
            let mut conn = conn.clone();
            async move { dispatch_loop(&pool, &mut conn, &language, &shutdown).await }
        });

        // the dispatcher is parked in BLPOP; shut down, then deliver a job
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.cancel();
        let queued = job(language);
        redis::push_job(&mut conn, &queued).await.unwrap();

        tokio::time::timeout(Duration::from_secs(10), dispatcher)
            .await
            .expect("dispatch should stop after shutdown")
            .unwrap()
            .unwrap();

        assert!(pool.monitor().active_jobs().is_empty());
        let returned = redis::pop_job(&mut conn, &language, 1.0)
            .await
            .unwrap()
            .expect("job should be back on the queue");
        assert_eq!(returned.id, queued.id);
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_shutdown_before_dispatch_pops_nothing() {
        let mut conn = connection().await;
        let language = Language::Rust;
        let _: () = conn.del(redis::queue_name(&language)).await.unwrap();
        let queued = job(language);
        redis::push_job(&mut conn, &queued).await.unwrap();

        let (pool, _outcomes) = pool();
        let (handle, shutdown) = cancel_pair();
        handle.cancel();
        dispatch_loop(&pool, &mut conn, &language, &shutdown).await.unwrap();

        let left: usize = conn.llen(redis::queue_name(&language)).await.unwrap();
        assert_eq!(left, 1);
    }
}
