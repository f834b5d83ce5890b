//! Grading engine shared by the API, the worker and the CLI
//!
//! The pure pipeline (marshal → normalize → compare → aggregate) lives here so
//! it can run both behind the sandbox and in the standalone harness.

pub mod canonical;
pub mod compare;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod harness;
pub mod marshal;
pub mod redis;
pub mod types;
pub mod value;
