mod commands;
mod references;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use grader_common::types::FunctionArity;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "grader-cli")]
#[command(about = "Grader CLI - Validate fixtures and inspect grading results", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ArityArg {
    Single,
    Spread,
}

impl From<ArityArg> for FunctionArity {
    fn from(arg: ArityArg) -> Self {
        match arg {
            ArityArg::Single => FunctionArity::Single,
            ArityArg::Spread => FunctionArity::Spread,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a case file through the grading pipeline against a built-in reference
    Verify {
        /// JSON array of {"input", "expected"} literal pairs
        #[arg(short, long)]
        cases: PathBuf,

        /// Reference implementation name (see `references`)
        #[arg(short, long)]
        reference: String,

        /// Override how the input maps onto arguments
        #[arg(short, long, value_enum)]
        arity: Option<ArityArg>,

        /// Compare sequences as multisets
        #[arg(long, default_value = "false")]
        any_order: bool,

        /// Absolute tolerance for non-integral numbers
        #[arg(short, long)]
        tolerance: Option<f64>,
    },

    /// Check that every fixture of a problem file parses
    CheckProblem {
        /// Problem JSON file
        path: PathBuf,
    },

    /// List built-in reference implementations
    References,

    /// Show the stored result of a grading job
    Result {
        /// Job id returned by POST /grade
        job_id: String,

        #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
        redis_url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Verify {
            cases,
            reference,
            arity,
            any_order,
            tolerance,
        } => {
            let passed = commands::verify_cases(&commands::VerifyArgs {
                cases: &cases,
                reference: &reference,
                arity: arity.map(FunctionArity::from),
                any_order,
                tolerance,
            })?;
            if !passed {
                std::process::exit(1);
            }
        }
        Commands::CheckProblem { path } => {
            if !commands::check_problem(&path)? {
                std::process::exit(1);
            }
        }
        Commands::References => {
            commands::list_references();
        }
        Commands::Result { job_id, redis_url } => {
            commands::show_result(&job_id, &redis_url).await?;
        }
    }

    Ok(())
}
