// CLI commands for validating fixtures and inspecting the grader
use crate::references::{self, REFERENCES};
use anyhow::{bail, Context, Result};
use grader_common::config::DEFAULT_TOLERANCE;
use grader_common::evaluator::audit_problem;
use grader_common::harness::{case_marker, verify, HarnessCase, HarnessOptions, HarnessReport};
use grader_common::types::{FunctionArity, GradingResponse, ProblemSpec};
use serde::Deserialize;
use std::fs;
use std::path::Path;

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Options resolved from flags, falling back to the reference's defaults
pub struct VerifyArgs<'a> {
    pub cases: &'a Path,
    pub reference: &'a str,
    pub arity: Option<FunctionArity>,
    pub any_order: bool,
    pub tolerance: Option<f64>,
}

/// Run a case file through the pipeline against a built-in reference.
/// Returns whether every case passed.
pub fn verify_cases(args: &VerifyArgs) -> Result<bool> {
    let Some(reference) = references::find(args.reference) else {
        bail!(
            "Unknown reference '{}'. Available: {}",
            args.reference,
            REFERENCES.iter().map(|r| r.name).collect::<Vec<_>>().join(", ")
        );
    };
    let cases: Vec<HarnessCase> = read_json(args.cases)?;

    let options = HarnessOptions {
        arity: args.arity.unwrap_or(reference.arity),
        order_sensitive: !(args.any_order || reference.any_order),
        tolerance: args.tolerance.unwrap_or(DEFAULT_TOLERANCE),
    };

    println!("🔎 Verifying {} case(s) against '{}'\n", cases.len(), reference.name);
    let report = verify(&cases, &options, reference.run);
    print_report(&cases, &report);
    Ok(report.all_passed())
}

fn print_report(cases: &[HarnessCase], report: &HarnessReport) {
    for (case, verdict) in cases.iter().zip(&report.verdicts) {
        println!(
            "  {} #{:<3} input={} expected={} actual={}",
            case_marker(verdict),
            verdict.fixture_index,
            case.input,
            verdict.expected_canonical.as_deref().unwrap_or("-"),
            verdict.actual_canonical.as_deref().unwrap_or("-"),
        );
        if let Some(diagnostic) = &verdict.diagnostic {
            println!("       {:?}: {}", verdict.kind, diagnostic.lines().next().unwrap_or(""));
        }
    }

    let total = report.verdicts.len();
    let passed = report.passed_count();
    if report.all_passed() {
        println!("\n✅ {}/{} cases passed", passed, total);
    } else if total == 0 {
        println!("\n❌ No cases to verify");
    } else {
        println!("\n❌ {}/{} cases passed ({:?})", passed, total, report.status());
    }
}

/// Validate a problem file: structure, fixture literals and arity.
/// Returns whether the problem is free of defects.
pub fn check_problem(path: &Path) -> Result<bool> {
    let problem: ProblemSpec = read_json(path)?;
    println!("📋 Problem '{}' ({} fixture(s), entry point '{}')", problem.id, problem.fixtures.len(), problem.entry_point);

    if problem.fixtures.is_empty() {
        println!("❌ Problem has no fixtures");
        return Ok(false);
    }

    let defects = audit_problem(&problem, DEFAULT_TOLERANCE);
    for (index, defect) in &defects {
        println!("  ✗ fixture #{}: {}", index, defect);
    }

    if defects.is_empty() {
        println!("✅ All fixtures parse");
        Ok(true)
    } else {
        println!("\n❌ {} defective fixture(s)", defects.len());
        Ok(false)
    }
}

pub fn list_references() {
    println!("📋 Built-in references:\n");
    println!("{:<30} {:<8} {:<10} {}", "NAME", "ARITY", "ORDER", "DESCRIPTION");
    println!("{}", "─".repeat(90));
    for reference in REFERENCES {
        println!(
            "{:<30} {:<8} {:<10} {}",
            reference.name,
            format!("{:?}", reference.arity).to_lowercase(),
            if reference.any_order { "any" } else { "exact" },
            reference.description
        );
    }
}

/// Print the stored result of a job
pub async fn show_result(job_id: &str, redis_url: &str) -> Result<()> {
    let job_id = uuid::Uuid::parse_str(job_id).context("Invalid job id")?;
    let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;
    let mut conn = redis::aio::ConnectionManager::new(client)
        .await
        .context("Failed to connect to Redis")?;

    match grader_common::redis::get_result(&mut conn, &job_id).await? {
        Some(result) => {
            let response = GradingResponse::from(&result.verdict);
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        None => match grader_common::redis::get_job_state(&mut conn, &job_id).await? {
            Some(state) => println!("⏳ Job {} is {:?}", job_id, state),
            None => bail!("Job {} not found", job_id),
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo_path(relative: &str) -> std::path::PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../..").join(relative)
    }

    #[test]
    fn test_shipped_median_cases_verify() {
        let cases = repo_path("fixtures/median.json");
        let passed = verify_cases(&VerifyArgs {
            cases: &cases,
            reference: "median-of-two-sorted-arrays",
            arity: None,
            any_order: false,
            tolerance: None,
        })
        .unwrap();
        assert!(passed);
    }

    #[test]
    fn test_unknown_reference_is_an_error() {
        let cases = repo_path("fixtures/median.json");
        let result = verify_cases(&VerifyArgs {
            cases: &cases,
            reference: "two-sum",
            arity: None,
            any_order: false,
            tolerance: None,
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_shipped_problems_are_clean() {
        assert!(check_problem(&repo_path("config/problems/median-of-two-sorted-arrays.json")).unwrap());
        assert!(check_problem(&repo_path("config/problems/group-anagrams.json")).unwrap());
    }

    #[test]
    fn test_shipped_anagram_fixtures_match_reference() {
        let problem: ProblemSpec = read_json(&repo_path("config/problems/group-anagrams.json")).unwrap();
        let cases: Vec<HarnessCase> = problem
            .fixtures
            .iter()
            .map(|f| HarnessCase {
                input: f.input_text.clone(),
                expected: f.expected_text.clone(),
            })
            .collect();
        let reference = references::find("group-anagrams").unwrap();
        let options = HarnessOptions {
            arity: problem.function_arity,
            order_sensitive: false,
            tolerance: DEFAULT_TOLERANCE,
        };
        assert!(verify(&cases, &options, reference.run).all_passed());
    }
}
