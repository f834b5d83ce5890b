/// Structured-value literals
///
/// Fixtures and sandbox results are exchanged as JSON literals. Several
/// language runtimes (Python's `json` module among them) emit the bare tokens
/// `NaN`, `Infinity` and `-Infinity`, which strict JSON rejects. Those tokens
/// are rewritten into tagged objects before handing the text to serde_json and
/// mapped back to non-finite floats afterwards.
///
/// The tag key starts with `$`. Every genuine string whose first character is
/// `$` gets one extra `$` during the rewrite, which is stripped again after
/// parsing, so no input can spell the tag.

use crate::error::LiteralError;
use std::collections::BTreeMap;
use std::fmt;

const ESCAPE: char = '$';
const NON_FINITE_KEY: &str = "$nonfinite";

const NON_FINITE_TOKENS: [(&str, &str); 3] = [
    ("-Infinity", "-inf"),
    ("Infinity", "inf"),
    ("NaN", "nan"),
];

/// A parsed literal, before canonicalization
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Seq(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Parse literal text into a value
    pub fn parse(text: &str) -> Result<Value, LiteralError> {
        let rewritten = rewrite_non_finite(text);
        let json: serde_json::Value = serde_json::from_str(&rewritten)
            .map_err(|e| LiteralError::Malformed(e.to_string()))?;
        Ok(Value::from_json(json))
    }

    /// Short name of the value's shape, for diagnostics
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) | Value::Float(_) => "number",
            Value::Str(_) => "string",
            Value::Seq(_) => "sequence",
            Value::Map(_) => "keyed structure",
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }

    fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Str(unescape(s)),
            serde_json::Value::Array(items) => {
                Value::Seq(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => {
                if let Some(x) = non_finite_sentinel(&map) {
                    return Value::Float(x);
                }
                Value::Map(
                    map.into_iter()
                        .map(|(k, v)| (unescape(k), Value::from_json(v)))
                        .collect(),
                )
            }
        }
    }
}

fn non_finite_sentinel(map: &serde_json::Map<String, serde_json::Value>) -> Option<f64> {
    if map.len() != 1 {
        return None;
    }
    match map.get(NON_FINITE_KEY)?.as_str()? {
        "nan" => Some(f64::NAN),
        "inf" => Some(f64::INFINITY),
        "-inf" => Some(f64::NEG_INFINITY),
        _ => None,
    }
}

fn unescape(mut s: String) -> String {
    if s.starts_with(ESCAPE) {
        s.remove(0);
    }
    s
}

/// Whether string content (just past the opening quote) decodes to a leading `$`
fn starts_with_escape(content: &str) -> bool {
    content.starts_with(ESCAPE) || content.starts_with("\\u0024")
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Replace bare non-finite tokens outside string literals with tagged objects
/// and escape strings that begin with `$`
fn rewrite_non_finite(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = rest.chars().next() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            out.push(c);
            rest = &rest[c.len_utf8()..];
            continue;
        }

        if c == '"' {
            in_string = true;
            out.push(c);
            rest = &rest[1..];
            if starts_with_escape(rest) {
                out.push(ESCAPE);
            }
            continue;
        }

        let token = NON_FINITE_TOKENS.iter().find(|(literal, _)| {
            rest.starts_with(literal)
                && !rest[literal.len()..].chars().next().is_some_and(is_word_char)
        });
        if let Some((literal, tag)) = token {
            out.push_str(&format!(r#"{{"{}":"{}"}}"#, NON_FINITE_KEY, tag));
            rest = &rest[literal.len()..];
            continue;
        }

        if is_word_char(c) {
            let len = rest.find(|ch: char| !is_word_char(ch)).unwrap_or(rest.len());
            out.push_str(&rest[..len]);
            rest = &rest[len..];
            continue;
        }

        out.push(c);
        rest = &rest[c.len_utf8()..];
    }

    out
}

pub(crate) fn write_float(f: &mut fmt::Formatter<'_>, x: f64) -> fmt::Result {
    if x.is_nan() {
        write!(f, "NaN")
    } else if x.is_infinite() {
        write!(f, "{}", if x > 0.0 { "Infinity" } else { "-Infinity" })
    } else {
        // Debug keeps a fractional part or exponent, so the text re-parses as a float
        write!(f, "{:?}", x)
    }
}

pub(crate) fn write_str(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    write!(f, "{}", serde_json::Value::String(s.to_string()))
}

/// Renders the value back as literal text accepted by [`Value::parse`]
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write_float(f, *x),
            Value::Str(s) => write_str(f, s),
            Value::Seq(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Map(map) => {
                write!(f, "{{")?;
                for (i, (key, item)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write_str(f, key)?;
                    write!(f, ":{}", item)?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_sequences() {
        let value = Value::parse("[[1,3],[2]]").unwrap();
        assert_eq!(
            value,
            Value::Seq(vec![
                Value::Seq(vec![Value::Int(1), Value::Int(3)]),
                Value::Seq(vec![Value::Int(2)]),
            ])
        );
    }

    #[test]
    fn test_float_literal_stays_float() {
        assert_eq!(Value::parse("2.0").unwrap(), Value::Float(2.0));
        assert_eq!(Value::parse("2").unwrap(), Value::Int(2));
        assert_eq!(Value::parse("-7").unwrap(), Value::Int(-7));
    }

    #[test]
    fn test_non_finite_tokens() {
        let value = Value::parse("[NaN, Infinity, -Infinity]").unwrap();
        match value {
            Value::Seq(items) => {
                assert!(matches!(items[0], Value::Float(x) if x.is_nan()));
                assert_eq!(items[1], Value::Float(f64::INFINITY));
                assert_eq!(items[2], Value::Float(f64::NEG_INFINITY));
            }
            other => panic!("expected sequence, got {:?}", other),
        }
    }

    #[test]
    fn test_tokens_inside_strings_untouched() {
        let value = Value::parse(r#"["NaN", "say \"Infinity\""]"#).unwrap();
        assert_eq!(
            value,
            Value::Seq(vec![
                Value::Str("NaN".to_string()),
                Value::Str("say \"Infinity\"".to_string()),
            ])
        );
    }

    #[test]
    fn test_tag_key_in_input_is_an_ordinary_map() {
        let value = Value::parse(r#"{"$nonfinite":"nan"}"#).unwrap();
        let expected = Value::Map(BTreeMap::from([(
            "$nonfinite".to_string(),
            Value::Str("nan".to_string()),
        )]));
        assert_eq!(value, expected);

        // same key spelled with a unicode escape
        assert_eq!(Value::parse(r#"{"\u0024nonfinite":"nan"}"#).unwrap(), expected);
    }

    #[test]
    fn test_dollar_strings_round_trip() {
        let value = Value::parse(r#"["$", "$$x", "a$", {"$k": "$v"}]"#).unwrap();
        assert_eq!(
            value,
            Value::Seq(vec![
                Value::Str("$".to_string()),
                Value::Str("$$x".to_string()),
                Value::Str("a$".to_string()),
                Value::Map(BTreeMap::from([("$k".to_string(), Value::Str("$v".to_string()))])),
            ])
        );
        assert_eq!(Value::parse(&value.to_string()).unwrap(), value);
    }

    #[test]
    fn test_malformed_literals_rejected() {
        assert!(Value::parse("[[1,2],[3,4]").is_err());
        assert!(Value::parse("").is_err());
        assert!(Value::parse("[1,,2]").is_err());
        assert!(Value::parse("NaNa").is_err());
        assert!(Value::parse("undefined").is_err());
    }

    #[test]
    fn test_display_reparses() {
        let text = r#"{"a":[1,2.5,-0.001],"b":"x\"y","c":[NaN,-Infinity],"d":null}"#;
        let value = Value::parse(text).unwrap();
        let rendered = value.to_string();
        let reparsed = Value::parse(&rendered).unwrap();
        assert_eq!(rendered, reparsed.to_string());
        assert!(rendered.contains("-Infinity"));
        assert!(rendered.contains("2.5"));
    }

    #[test]
    fn test_float_display_keeps_fraction() {
        assert_eq!(Value::Float(2.0).to_string(), "2.0");
        assert_eq!(Value::parse(&Value::Float(1e-7).to_string()).unwrap(), Value::Float(1e-7));
    }
}
