// Grading policy configuration shared by the worker and the CLI harness

use crate::types::ProblemSpec;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Absolute tolerance for non-integral numeric comparisons
pub const DEFAULT_TOLERANCE: f64 = 1e-6;
/// Per-fixture wall-clock budget when the problem does not set one
pub const DEFAULT_TIME_BUDGET_MS: u64 = 2000;
/// Extra time granted past the budget before the engine abandons a running
/// sandbox
pub const DEFAULT_GRACE_MS: u64 = 1000;
/// Longest the sandbox may spend provisioning (image, container create/start)
/// before the attempt counts as an outage
pub const DEFAULT_SETUP_TIMEOUT_MS: u64 = 60_000;
/// Largest accepted submission; base64 of this fits one environment string
pub const MAX_SOURCE_CODE_BYTES: usize = 64 * 1024;

/// What the aggregator does after the first non-passing fixture
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    StopOnFirstFailure,
    RunAll,
}

impl FailurePolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "stop_on_first_failure" | "stop" => Some(FailurePolicy::StopOnFirstFailure),
            "run_all" | "all" => Some(FailurePolicy::RunAll),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GradingConfig {
    pub default_tolerance: f64,
    pub failure_policy: FailurePolicy,
    pub time_budget_ms: u64,
    pub grace_ms: u64,
    pub setup_timeout_ms: u64,
    /// Fixtures of one submission allowed in flight at once
    pub max_parallel_fixtures: usize,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            default_tolerance: DEFAULT_TOLERANCE,
            failure_policy: FailurePolicy::default(),
            time_budget_ms: DEFAULT_TIME_BUDGET_MS,
            grace_ms: DEFAULT_GRACE_MS,
            setup_timeout_ms: DEFAULT_SETUP_TIMEOUT_MS,
            max_parallel_fixtures: 1,
        }
    }
}

impl GradingConfig {
    /// Load from `GRADER_*` environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup("GRADER_TOLERANCE") {
            match raw.parse::<f64>() {
                Ok(t) if t.is_finite() && t >= 0.0 => config.default_tolerance = t,
                _ => warn!(value = %raw, "Ignoring invalid GRADER_TOLERANCE"),
            }
        }
        if let Some(raw) = lookup("GRADER_FAILURE_POLICY") {
            match FailurePolicy::parse(&raw) {
                Some(policy) => config.failure_policy = policy,
                None => warn!(value = %raw, "Ignoring invalid GRADER_FAILURE_POLICY"),
            }
        }
        if let Some(raw) = lookup("GRADER_TIME_BUDGET_MS") {
            match raw.parse::<u64>() {
                Ok(ms) if ms > 0 => config.time_budget_ms = ms,
                _ => warn!(value = %raw, "Ignoring invalid GRADER_TIME_BUDGET_MS"),
            }
        }
        if let Some(raw) = lookup("GRADER_GRACE_MS") {
            match raw.parse::<u64>() {
                Ok(ms) => config.grace_ms = ms,
                Err(_) => warn!(value = %raw, "Ignoring invalid GRADER_GRACE_MS"),
            }
        }
        if let Some(raw) = lookup("GRADER_SETUP_TIMEOUT_MS") {
            match raw.parse::<u64>() {
                Ok(ms) if ms > 0 => config.setup_timeout_ms = ms,
                _ => warn!(value = %raw, "Ignoring invalid GRADER_SETUP_TIMEOUT_MS"),
            }
        }
        if let Some(raw) = lookup("GRADER_PARALLEL_FIXTURES") {
            match raw.parse::<usize>() {
                Ok(n) if n > 0 => config.max_parallel_fixtures = n,
                _ => warn!(value = %raw, "Ignoring invalid GRADER_PARALLEL_FIXTURES"),
            }
        }

        config
    }

    /// Wall-clock budget for each fixture of `problem`
    pub fn time_budget_for(&self, problem: &ProblemSpec) -> Duration {
        Duration::from_millis(problem.time_budget_ms.unwrap_or(self.time_budget_ms))
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    pub fn setup_timeout(&self) -> Duration {
        Duration::from_millis(self.setup_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = GradingConfig::from_lookup(lookup(&[]));
        assert_eq!(config, GradingConfig::default());
        assert_eq!(config.default_tolerance, 1e-6);
        assert_eq!(config.failure_policy, FailurePolicy::StopOnFirstFailure);
    }

    #[test]
    fn test_overrides() {
        let config = GradingConfig::from_lookup(lookup(&[
            ("GRADER_TOLERANCE", "0.001"),
            ("GRADER_FAILURE_POLICY", "run-all"),
            ("GRADER_TIME_BUDGET_MS", "500"),
            ("GRADER_PARALLEL_FIXTURES", "4"),
            ("GRADER_SETUP_TIMEOUT_MS", "15000"),
        ]));
        assert_eq!(config.default_tolerance, 0.001);
        assert_eq!(config.failure_policy, FailurePolicy::RunAll);
        assert_eq!(config.time_budget_ms, 500);
        assert_eq!(config.max_parallel_fixtures, 4);
        assert_eq!(config.setup_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = GradingConfig::from_lookup(lookup(&[
            ("GRADER_TOLERANCE", "-1"),
            ("GRADER_FAILURE_POLICY", "sometimes"),
            ("GRADER_PARALLEL_FIXTURES", "0"),
            ("GRADER_SETUP_TIMEOUT_MS", "0"),
        ]));
        assert_eq!(config, GradingConfig::default());
    }
}
