use crate::types::{JobRequest, JobResult, JobState, Language};
use redis::{AsyncCommands, RedisResult};

/// Redis queue semantics - defines only semantics, not runtime logic
/// Ensures API and worker never drift and Redis keys are deterministic

pub const QUEUE_PREFIX: &str = "grader:queue";
pub const RESULT_PREFIX: &str = "grader:result";
pub const STATE_PREFIX: &str = "grader:state";
pub const CANCEL_PREFIX: &str = "grader:cancel";

/// Results, states and cancel flags expire after 24 hours
pub const RECORD_TTL_SECONDS: u64 = 86400;

/// Generate deterministic queue name for a language
pub fn queue_name(language: &Language) -> String {
    format!("{}:{}", QUEUE_PREFIX, language)
}

/// Generate result key for a job
pub fn result_key(job_id: &uuid::Uuid) -> String {
    format!("{}:{}", RESULT_PREFIX, job_id)
}

/// Generate state key for a job
pub fn state_key(job_id: &uuid::Uuid) -> String {
    format!("{}:{}", STATE_PREFIX, job_id)
}

/// Generate cancellation flag key for a job
pub fn cancel_key(job_id: &uuid::Uuid) -> String {
    format!("{}:{}", CANCEL_PREFIX, job_id)
}

fn encode_error(e: serde_json::Error) -> redis::RedisError {
    redis::RedisError::from((redis::ErrorKind::TypeError, "serialization error", e.to_string()))
}

fn decode_error(e: serde_json::Error) -> redis::RedisError {
    redis::RedisError::from((redis::ErrorKind::TypeError, "deserialization error", e.to_string()))
}

/// Push a job to the language-specific queue
/// Uses RPUSH for FIFO semantics
pub async fn push_job(
    conn: &mut redis::aio::ConnectionManager,
    job: &JobRequest,
) -> RedisResult<()> {
    let queue = queue_name(&job.submission.language);
    let payload = serde_json::to_string(job).map_err(encode_error)?;

    conn.rpush(&queue, payload).await
}

/// Put a job back at the head of its queue after an infrastructure failure
/// Uses LPUSH so the retry runs before newer submissions
pub async fn requeue_job(
    conn: &mut redis::aio::ConnectionManager,
    job: &JobRequest,
) -> RedisResult<()> {
    let queue = queue_name(&job.submission.language);
    let payload = serde_json::to_string(job).map_err(encode_error)?;

    conn.lpush(&queue, payload).await
}

/// Pop a job from the language-specific queue
/// Uses BLPOP with timeout for graceful shutdown
pub async fn pop_job(
    conn: &mut redis::aio::ConnectionManager,
    language: &Language,
    timeout_seconds: f64,
) -> RedisResult<Option<JobRequest>> {
    let queue = queue_name(language);
    let result: Option<(String, String)> = conn.blpop(&queue, timeout_seconds).await?;

    match result {
        Some((_key, payload)) => {
            let job: JobRequest = serde_json::from_str(&payload).map_err(decode_error)?;
            Ok(Some(job))
        }
        None => Ok(None),
    }
}

/// Record the lifecycle state of a job
pub async fn set_job_state(
    conn: &mut redis::aio::ConnectionManager,
    job_id: &uuid::Uuid,
    state: JobState,
) -> RedisResult<()> {
    let payload = serde_json::to_string(&state).map_err(encode_error)?;
    conn.set_ex(state_key(job_id), payload, RECORD_TTL_SECONDS as _).await
}

pub async fn get_job_state(
    conn: &mut redis::aio::ConnectionManager,
    job_id: &uuid::Uuid,
) -> RedisResult<Option<JobState>> {
    let payload: Option<String> = conn.get(state_key(job_id)).await?;
    payload
        .map(|data| serde_json::from_str(&data).map_err(decode_error))
        .transpose()
}

/// Store a job result together with its terminal state
pub async fn store_result(
    conn: &mut redis::aio::ConnectionManager,
    result: &JobResult,
) -> RedisResult<()> {
    let key = result_key(&result.job_id);
    let payload = serde_json::to_string(result).map_err(encode_error)?;

    let _: () = conn.set_ex(&key, payload, RECORD_TTL_SECONDS as _).await?;
    set_job_state(conn, &result.job_id, result.state).await
}

/// Retrieve a job result
pub async fn get_result(
    conn: &mut redis::aio::ConnectionManager,
    job_id: &uuid::Uuid,
) -> RedisResult<Option<JobResult>> {
    let payload: Option<String> = conn.get(result_key(job_id)).await?;

    match payload {
        Some(data) => {
            let result: JobResult = serde_json::from_str(&data).map_err(decode_error)?;
            Ok(Some(result))
        }
        None => Ok(None),
    }
}

/// Request cancellation of a job
/// The worker observes the flag between fixtures and during execution
pub async fn cancel_job(
    conn: &mut redis::aio::ConnectionManager,
    job_id: &uuid::Uuid,
) -> RedisResult<()> {
    conn.set_ex(cancel_key(job_id), "1", RECORD_TTL_SECONDS as _).await
}

pub async fn is_job_cancelled(
    conn: &mut redis::aio::ConnectionManager,
    job_id: &uuid::Uuid,
) -> RedisResult<bool> {
    conn.exists(cancel_key(job_id)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Language;
    use uuid::Uuid;

    #[test]
    fn test_queue_naming() {
        assert_eq!(queue_name(&Language::Python), "grader:queue:python");
        assert_eq!(queue_name(&Language::JavaScript), "grader:queue:javascript");
        assert_eq!(queue_name(&Language::Rust), "grader:queue:rust");
    }

    #[test]
    fn test_result_key_deterministic() {
        let id = Uuid::new_v4();
        let key1 = result_key(&id);
        let key2 = result_key(&id);
        assert_eq!(key1, key2);
        assert!(key1.starts_with("grader:result:"));
    }

    #[test]
    fn test_state_and_cancel_keys_are_distinct() {
        let id = Uuid::new_v4();
        assert!(state_key(&id).starts_with("grader:state:"));
        assert!(cancel_key(&id).starts_with("grader:cancel:"));
        assert!(cancel_key(&id).contains(&id.to_string()));
        assert_ne!(state_key(&id), cancel_key(&id));
    }
}
