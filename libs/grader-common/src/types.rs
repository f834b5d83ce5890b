use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    Java,
    Rust,
}

impl Language {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "python" => Some(Language::Python),
            "javascript" | "js" => Some(Language::JavaScript),
            "java" => Some(Language::Java),
            "rust" => Some(Language::Rust),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::Java => "java",
            Language::Rust => "rust",
        };
        write!(f, "{}", name)
    }
}

/// How a fixture's parsed input maps onto the candidate's parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionArity {
    /// The whole input literal is passed as one argument
    Single,
    /// The input literal is a sequence spread into positional arguments
    Spread,
}

fn default_order_sensitive() -> bool {
    true
}

/// One test case, authored as literal text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    #[serde(rename = "input")]
    pub input_text: String,
    #[serde(rename = "expected")]
    pub expected_text: String,
    #[serde(default = "default_order_sensitive")]
    pub order_sensitive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance_hint: Option<f64>,
}

impl Fixture {
    pub fn new(input_text: impl Into<String>, expected_text: impl Into<String>) -> Self {
        Self {
            input_text: input_text.into(),
            expected_text: expected_text.into(),
            order_sensitive: true,
            tolerance_hint: None,
        }
    }
}

/// Problem definition supplied by the problem catalog. Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemSpec {
    pub id: String,
    /// Name of the candidate function the sandbox runner invokes
    pub entry_point: String,
    pub function_arity: FunctionArity,
    pub fixtures: Vec<Fixture>,
    /// Per-fixture wall-clock budget; the engine default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_budget_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub problem_id: String,
    pub language: Language,
    pub source_code: String,
}

/// Raw outcome of one sandboxed run
///
/// `raw_output` is the literal the runner printed for the function's return
/// value. It is `None` when the candidate crashed; a function that returns
/// nothing yields `Some("null")`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub raw_output: Option<String>,
    pub stderr: String,
    pub exit_signal: Option<i64>,
    pub duration_ms: u64,
    pub timed_out: bool,
}

impl ExecutionResult {
    pub fn returned(raw_output: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            raw_output: Some(raw_output.into()),
            stderr: String::new(),
            exit_signal: Some(0),
            duration_ms,
            timed_out: false,
        }
    }

    pub fn crashed(stderr: impl Into<String>, exit_signal: i64, duration_ms: u64) -> Self {
        Self {
            raw_output: None,
            stderr: stderr.into(),
            exit_signal: Some(exit_signal),
            duration_ms,
            timed_out: false,
        }
    }

    pub fn timed_out(duration_ms: u64) -> Self {
        Self {
            raw_output: None,
            stderr: "[Execution timed out]".to_string(),
            exit_signal: None,
            duration_ms,
            timed_out: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerdictKind {
    Pass,
    WrongAnswer,
    RuntimeError,
    TimeLimitExceeded,
    InternalError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestVerdict {
    pub fixture_index: usize,
    pub passed: bool,
    pub kind: VerdictKind,
    pub actual_canonical: Option<String>,
    pub expected_canonical: Option<String>,
    /// Captured stderr or the authoring defect, when there is one
    pub diagnostic: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmissionStatus {
    Accepted,
    WrongAnswer,
    RuntimeError,
    TimeLimitExceeded,
    InternalError,
    /// Sandbox infrastructure failed; never the candidate's fault
    SystemError,
}

impl From<VerdictKind> for SubmissionStatus {
    fn from(kind: VerdictKind) -> Self {
        match kind {
            VerdictKind::Pass => SubmissionStatus::Accepted,
            VerdictKind::WrongAnswer => SubmissionStatus::WrongAnswer,
            VerdictKind::RuntimeError => SubmissionStatus::RuntimeError,
            VerdictKind::TimeLimitExceeded => SubmissionStatus::TimeLimitExceeded,
            VerdictKind::InternalError => SubmissionStatus::InternalError,
        }
    }
}

/// Terminal verdict for a submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionVerdict {
    pub status: SubmissionStatus,
    /// Ordered by `fixture_index`, in fixture declaration order
    pub test_verdicts: Vec<TestVerdict>,
    pub total_duration_ms: u64,
}

/// Lifecycle of a queued grading job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Resolved,
    Cancelled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetadata {
    /// Number of times the job was requeued after sandbox unavailability
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub queued_at: Option<DateTime<Utc>>,
}

/// Unit of work on the queue: the submission plus the problem it targets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub id: Uuid,
    pub submission: Submission,
    pub problem: ProblemSpec,
    #[serde(default)]
    pub metadata: JobMetadata,
}

/// What the worker persists for a finished (or cancelled) job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: Uuid,
    pub state: JobState,
    pub verdict: SubmissionVerdict,
    pub completed_at: DateTime<Utc>,
}

/// Grading request as accepted over HTTP
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingRequest {
    pub problem_id: String,
    pub language: Language,
    pub source_code: String,
}

impl From<GradingRequest> for Submission {
    fn from(request: GradingRequest) -> Self {
        Submission {
            problem_id: request.problem_id,
            language: request.language,
            source_code: request.source_code,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureReport {
    pub index: usize,
    pub passed: bool,
    pub actual: Option<String>,
    pub expected: Option<String>,
    pub time_ms: u64,
}

/// Grading response as returned over HTTP
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingResponse {
    pub status: SubmissionStatus,
    pub per_fixture: Vec<FixtureReport>,
    pub total_time_ms: u64,
}

impl From<&SubmissionVerdict> for GradingResponse {
    fn from(verdict: &SubmissionVerdict) -> Self {
        GradingResponse {
            status: verdict.status,
            per_fixture: verdict
                .test_verdicts
                .iter()
                .map(|tv| FixtureReport {
                    index: tv.fixture_index,
                    passed: tv.passed,
                    actual: tv.actual_canonical.clone(),
                    expected: tv.expected_canonical.clone(),
                    time_ms: tv.duration_ms,
                })
                .collect(),
            total_time_ms: verdict.total_duration_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_wire_format_defaults() {
        let fixture: Fixture =
            serde_json::from_str(r#"{"input": "[[1,3],[2]]", "expected": "2"}"#).unwrap();
        assert_eq!(fixture.input_text, "[[1,3],[2]]");
        assert_eq!(fixture.expected_text, "2");
        assert!(fixture.order_sensitive);
        assert_eq!(fixture.tolerance_hint, None);
    }

    #[test]
    fn test_grading_request_is_camel_case() {
        let request: GradingRequest = serde_json::from_str(
            r#"{"problemId": "median", "language": "python", "sourceCode": "def f(): pass"}"#,
        )
        .unwrap();
        assert_eq!(request.language, Language::Python);
        let submission: Submission = request.into();
        assert_eq!(submission.problem_id, "median");
    }

    #[test]
    fn test_grading_response_shape() {
        let verdict = SubmissionVerdict {
            status: SubmissionStatus::WrongAnswer,
            test_verdicts: vec![TestVerdict {
                fixture_index: 0,
                passed: false,
                kind: VerdictKind::WrongAnswer,
                actual_canonical: Some("3".to_string()),
                expected_canonical: Some("2".to_string()),
                diagnostic: None,
                duration_ms: 12,
            }],
            total_duration_ms: 15,
        };
        let json = serde_json::to_value(GradingResponse::from(&verdict)).unwrap();
        assert_eq!(json["status"], "WrongAnswer");
        assert_eq!(json["totalTimeMs"], 15);
        assert_eq!(json["perFixture"][0]["timeMs"], 12);
        assert_eq!(json["perFixture"][0]["actual"], "3");
    }

    #[test]
    fn test_language_names() {
        assert_eq!(Language::from_str("Python"), Some(Language::Python));
        assert_eq!(Language::from_str("js"), Some(Language::JavaScript));
        assert_eq!(Language::from_str("cobol"), None);
        assert_eq!(Language::JavaScript.to_string(), "javascript");
    }
}
