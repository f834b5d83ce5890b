// HTTP route handlers for the grader API

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use grader_common::config::MAX_SOURCE_CODE_BYTES;
use grader_common::redis;
use grader_common::types::{
    GradingRequest, GradingResponse, JobMetadata, JobRequest, JobState, Language, Submission,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::language_config::LanguageRegistry;
use crate::problems::ProblemStore;
use crate::AppState;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid request body: {0}")]
    InvalidBody(String),
    #[error("language '{0}' is not enabled")]
    LanguageDisabled(Language),
    #[error("unknown problem '{0}'")]
    UnknownProblem(String),
    #[error("source code is empty")]
    EmptySource,
    #[error("source code of {0} bytes exceeds the {limit} byte limit", limit = MAX_SOURCE_CODE_BYTES)]
    SourceTooLarge(usize),
    #[error("invalid job id format")]
    InvalidJobId,
    #[error("job not found")]
    NotFound,
    #[error("job already resolved")]
    AlreadyResolved,
    #[error("queue failure: {0}")]
    Queue(#[from] ::redis::RedisError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidBody(_)
            | ApiError::LanguageDisabled(_)
            | ApiError::UnknownProblem(_)
            | ApiError::EmptySource
            | ApiError::InvalidJobId => StatusCode::BAD_REQUEST,
            ApiError::SourceTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::AlreadyResolved => StatusCode::CONFLICT,
            ApiError::Queue(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Metric label for rejected submissions
    fn reason(&self) -> &'static str {
        match self {
            ApiError::InvalidBody(_) => "invalid_body",
            ApiError::LanguageDisabled(_) => "language_disabled",
            ApiError::UnknownProblem(_) => "unknown_problem",
            ApiError::EmptySource => "empty_source",
            ApiError::SourceTooLarge(_) => "source_too_large",
            _ => "other",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: String,
}

/// Resolved (or cancelled) job as returned to clients
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultView {
    pub job_id: Uuid,
    pub state: JobState,
    #[serde(flatten)]
    pub result: GradingResponse,
}

/// Validate a grading request and bind it to its problem
pub fn build_job(
    request: GradingRequest,
    problems: &ProblemStore,
    languages: &LanguageRegistry,
) -> Result<JobRequest, ApiError> {
    if !languages.is_enabled(request.language) {
        return Err(ApiError::LanguageDisabled(request.language));
    }
    let problem = problems
        .get(&request.problem_id)
        .ok_or_else(|| ApiError::UnknownProblem(request.problem_id.clone()))?;
    if request.source_code.trim().is_empty() {
        return Err(ApiError::EmptySource);
    }
    if request.source_code.len() > MAX_SOURCE_CODE_BYTES {
        return Err(ApiError::SourceTooLarge(request.source_code.len()));
    }

    Ok(JobRequest {
        id: Uuid::new_v4(),
        submission: Submission::from(request),
        problem: (*problem).clone(),
        metadata: JobMetadata {
            attempts: 0,
            queued_at: Some(Utc::now()),
        },
    })
}

fn parse_job_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::InvalidJobId)
}

/// POST /grade - Queue a submission for grading
pub async fn submit(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<GradingRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let job = payload
        .map_err(|rejection| ApiError::InvalidBody(rejection.body_text()))
        .and_then(|Json(request)| build_job(request, &state.problems, &state.languages))
        .inspect_err(|e| {
            warn!(error = %e, "Submission rejected");
            state.metrics.rejections.with_label_values(&[e.reason()]).inc();
        })?;

    let mut conn = state.redis.clone();
    redis::set_job_state(&mut conn, &job.id, JobState::Queued).await?;
    if let Err(e) = redis::push_job(&mut conn, &job).await {
        error!(job_id = %job.id, error = %e, "Failed to queue job");
        return Err(e.into());
    }

    let language = job.submission.language.to_string();
    state.metrics.submissions.with_label_values(&[language.as_str()]).inc();
    info!(
        job_id = %job.id,
        language = %language,
        problem_id = %job.problem.id,
        fixtures = job.problem.fixtures.len(),
        "Job queued"
    );

    Ok((
        StatusCode::CREATED,
        Json(SubmitResponse {
            job_id: job.id.to_string(),
        }),
    ))
}

/// GET /grade/{job_id} - Query a grading result
pub async fn get_result(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let job_id = parse_job_id(&job_id)?;
    let mut conn = state.redis.clone();

    if let Some(result) = redis::get_result(&mut conn, &job_id).await? {
        let view = ResultView {
            job_id,
            state: result.state,
            result: GradingResponse::from(&result.verdict),
        };
        state
            .metrics
            .result_reads
            .with_label_values(&[format!("{:?}", view.result.status).as_str()])
            .inc();
        info!(job_id = %job_id, status = ?view.result.status, "Job result retrieved");
        return Ok((StatusCode::OK, Json(view)).into_response());
    }

    match redis::get_job_state(&mut conn, &job_id).await? {
        Some(job_state) => Ok((
            StatusCode::ACCEPTED,
            Json(json!({ "job_id": job_id, "state": job_state })),
        )
            .into_response()),
        None => Err(ApiError::NotFound),
    }
}

/// DELETE /grade/{job_id} - Request cancellation
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job_id = parse_job_id(&job_id)?;
    let mut conn = state.redis.clone();

    match redis::get_job_state(&mut conn, &job_id).await? {
        None => return Err(ApiError::NotFound),
        Some(JobState::Resolved) | Some(JobState::Cancelled) => return Err(ApiError::AlreadyResolved),
        Some(_) => {}
    }

    redis::cancel_job(&mut conn, &job_id).await?;
    state.metrics.cancellations.inc();
    info!(job_id = %job_id, "Cancellation requested");

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "job_id": job_id, "message": "Cancellation requested" })),
    ))
}

/// GET /health
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /metrics
pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.render() {
        Ok(text) => (StatusCode::OK, text).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grader_common::types::{Fixture, FunctionArity, ProblemSpec};

    fn problems() -> ProblemStore {
        ProblemStore::from_problems(vec![ProblemSpec {
            id: "median-of-two-sorted-arrays".to_string(),
            entry_point: "find_median_sorted_arrays".to_string(),
            function_arity: FunctionArity::Spread,
            fixtures: vec![Fixture::new("[[1,3],[2]]", "2")],
            time_budget_ms: None,
        }])
        .unwrap()
    }

    fn languages() -> LanguageRegistry {
        LanguageRegistry::from_json(r#"{"languages": [{"name": "python"}]}"#).unwrap()
    }

    fn request(language: Language, problem_id: &str, source: &str) -> GradingRequest {
        GradingRequest {
            problem_id: problem_id.to_string(),
            language,
            source_code: source.to_string(),
        }
    }

    #[test]
    fn test_build_job_binds_problem() {
        let job = build_job(
            request(Language::Python, "median-of-two-sorted-arrays", "def f(): pass"),
            &problems(),
            &languages(),
        )
        .unwrap();
        assert_eq!(job.problem.entry_point, "find_median_sorted_arrays");
        assert_eq!(job.submission.language, Language::Python);
        assert_eq!(job.metadata.attempts, 0);
        assert!(job.metadata.queued_at.is_some());
    }

    #[test]
    fn test_build_job_rejections() {
        let err = build_job(request(Language::Java, "median-of-two-sorted-arrays", "x"), &problems(), &languages())
            .unwrap_err();
        assert!(matches!(err, ApiError::LanguageDisabled(Language::Java)));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = build_job(request(Language::Python, "two-sum", "x"), &problems(), &languages()).unwrap_err();
        assert!(matches!(err, ApiError::UnknownProblem(ref id) if id == "two-sum"));
        assert_eq!(err.reason(), "unknown_problem");

        let err = build_job(
            request(Language::Python, "median-of-two-sorted-arrays", "  \n"),
            &problems(),
            &languages(),
        )
        .unwrap_err();
        assert!(matches!(err, ApiError::EmptySource));
    }

    #[test]
    fn test_build_job_rejects_oversized_source() {
        let source = "x".repeat(MAX_SOURCE_CODE_BYTES + 1);
        let err = build_job(
            request(Language::Python, "median-of-two-sorted-arrays", &source),
            &problems(),
            &languages(),
        )
        .unwrap_err();
        assert!(matches!(err, ApiError::SourceTooLarge(n) if n == MAX_SOURCE_CODE_BYTES + 1));
        assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(err.reason(), "source_too_large");

        let source = "x".repeat(MAX_SOURCE_CODE_BYTES);
        assert!(build_job(
            request(Language::Python, "median-of-two-sorted-arrays", &source),
            &problems(),
            &languages(),
        )
        .is_ok());
    }

    #[test]
    fn test_error_statuses() {
        assert_eq!(parse_job_id("nope").unwrap_err().status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::AlreadyResolved.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_result_view_wire_format() {
        let view = ResultView {
            job_id: Uuid::nil(),
            state: JobState::Resolved,
            result: GradingResponse {
                status: grader_common::types::SubmissionStatus::Accepted,
                per_fixture: vec![],
                total_time_ms: 12,
            },
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["jobId"], Uuid::nil().to_string());
        assert_eq!(json["totalTimeMs"], 12);
        assert!(json["perFixture"].is_array());
    }
}
