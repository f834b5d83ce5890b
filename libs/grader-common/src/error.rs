use std::fmt;
use thiserror::Error;

/// Failure to read a structured-value literal
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LiteralError {
    #[error("malformed literal: {0}")]
    Malformed(String),
}

/// Which side of a fixture a parse failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixtureField {
    Input,
    Expected,
}

impl fmt::Display for FixtureField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FixtureField::Input => write!(f, "fixture input"),
            FixtureField::Expected => write!(f, "fixture expected value"),
        }
    }
}

/// Fixture authoring defects
///
/// Both variants are classified as `InternalError`: they indicate a broken
/// problem definition, never a fault of the candidate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FixtureError {
    #[error("failed to parse {field}: {source}")]
    Parse {
        field: FixtureField,
        #[source]
        source: LiteralError,
    },

    #[error("spread arity requires a sequence of arguments, found {found}")]
    ArityMismatch { found: &'static str },
}
