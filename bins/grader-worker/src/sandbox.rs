/// Sandbox Executor contract
///
/// **Critical Architectural Boundary:**
/// - A sandbox knows HOW to run candidate code (Docker, microVM, ...)
/// - It does NOT know fixtures, expected values or scoring rules
/// - It receives a typed argument list and returns raw output only
///
/// Implementations must deny network access, confine writes to an ephemeral
/// scratch area, cap memory, and stop the run once `time_budget` elapses.

use async_trait::async_trait;
use grader_common::types::{ExecutionResult, Language};
use grader_common::value::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// One invocation of the candidate function
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub language: Language,
    pub source_code: String,
    pub entry_point: String,
    pub arguments: Vec<Value>,
    pub time_budget: Duration,
}

impl ExecutionRequest {
    /// Arguments rendered as one literal sequence, as handed to the runner
    pub fn arguments_literal(&self) -> String {
        Value::Seq(self.arguments.clone()).to_string()
    }
}

/// Failures that are not the candidate's doing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SandboxError {
    /// Infrastructure is down; the submission may be retried later
    #[error("sandbox unavailable: {0}")]
    Unavailable(String),

    /// The request itself cannot be run (e.g. a payload too large to hand over)
    #[error("sandbox rejected request: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Environment provisioned for one request; dropping it tears it down
    type Prepared: Send;

    /// Provision an isolated environment for `request`. Nothing the candidate
    /// controls has run yet, so time spent here is never charged to it.
    async fn prepare(&self, request: &ExecutionRequest) -> Result<Self::Prepared, SandboxError>;

    /// Run the candidate once in a prepared environment. Returns once the run
    /// finishes or its time budget expires, whichever comes first.
    async fn run(
        &self,
        prepared: Self::Prepared,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult, SandboxError>;
}

#[async_trait]
impl<T: Sandbox + ?Sized> Sandbox for Arc<T> {
    type Prepared = T::Prepared;

    async fn prepare(&self, request: &ExecutionRequest) -> Result<Self::Prepared, SandboxError> {
        (**self).prepare(request).await
    }

    async fn run(
        &self,
        prepared: Self::Prepared,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult, SandboxError> {
        (**self).run(prepared, request).await
    }
}
