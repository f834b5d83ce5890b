/// Argument Marshaler
///
/// Turns a fixture's input literal into the ordered positional argument list
/// handed across the sandbox boundary. Pure and deterministic: the same text
/// and arity always produce the same list.

use crate::error::{FixtureError, FixtureField};
use crate::types::FunctionArity;
use crate::value::Value;

/// Parse `input_text` and apply the arity policy
///
/// - `Spread`: the literal must be a sequence; its elements become the arguments
/// - `Single`: the whole literal is the only argument
pub fn marshal(input_text: &str, arity: FunctionArity) -> Result<Vec<Value>, FixtureError> {
    let value = Value::parse(input_text).map_err(|source| FixtureError::Parse {
        field: FixtureField::Input,
        source,
    })?;

    match arity {
        FunctionArity::Single => Ok(vec![value]),
        FunctionArity::Spread => match value {
            Value::Seq(items) => Ok(items),
            other => Err(FixtureError::ArityMismatch {
                found: other.kind_name(),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spread_yields_elements_in_order() {
        let args = marshal("[[1,3],[2]]", FunctionArity::Spread).unwrap();
        assert_eq!(args.len(), 2);
        assert_eq!(args[0], Value::Seq(vec![Value::Int(1), Value::Int(3)]));
        assert_eq!(args[1], Value::Seq(vec![Value::Int(2)]));
    }

    #[test]
    fn test_single_wraps_whole_value() {
        let args = marshal("[[1,3],[2]]", FunctionArity::Single).unwrap();
        assert_eq!(args.len(), 1);
        assert!(matches!(&args[0], Value::Seq(items) if items.len() == 2));
    }

    #[test]
    fn test_single_accepts_scalars() {
        let args = marshal("42", FunctionArity::Single).unwrap();
        assert_eq!(args, vec![Value::Int(42)]);
    }

    #[test]
    fn test_spread_rejects_non_sequence() {
        let err = marshal(r#"{"nums": [1, 2]}"#, FunctionArity::Spread).unwrap_err();
        assert_eq!(
            err,
            FixtureError::ArityMismatch {
                found: "keyed structure"
            }
        );

        let err = marshal("5", FunctionArity::Spread).unwrap_err();
        assert_eq!(err, FixtureError::ArityMismatch { found: "number" });
    }

    #[test]
    fn test_empty_spread_means_no_arguments() {
        assert!(marshal("[]", FunctionArity::Spread).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_input_is_parse_error() {
        let err = marshal("[[1,2],[3,4]", FunctionArity::Spread).unwrap_err();
        assert!(matches!(
            err,
            FixtureError::Parse {
                field: FixtureField::Input,
                ..
            }
        ));
    }

    #[test]
    fn test_marshal_is_deterministic() {
        let text = r#"[[1.5, "a"], {"k": [NaN]}, null]"#;
        let first = marshal(text, FunctionArity::Spread).unwrap();
        let second = marshal(text, FunctionArity::Spread).unwrap();
        // NaN defeats PartialEq, so compare rendered forms
        assert_eq!(
            Value::Seq(first).to_string(),
            Value::Seq(second).to_string()
        );
    }
}
