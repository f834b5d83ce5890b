/// Result Normalizer
///
/// **Canonicalization Rules (applied to actual and expected alike):**
/// - Finite numbers without a fractional part (within ±2^53) become integral
/// - Other finite numbers stay non-integral
/// - NaN / +Infinity / -Infinity become distinct tokens, never null
/// - Keyed structures are ordered by key
/// - Sequences keep their order unless the fixture is order-insensitive, in
///   which case every sequence (at any depth) is sorted by [`Canonical::total_cmp`]

use crate::error::LiteralError;
use crate::value::{write_float, write_str, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Largest magnitude at which every integer is exactly representable as f64
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NonFinite {
    NegInfinity,
    PosInfinity,
    NaN,
}

/// Comparison-ready form of a value
#[derive(Debug, Clone, PartialEq)]
pub enum Canonical {
    Null,
    Bool(bool),
    Int(i64),
    /// Always finite and non-integral
    Float(f64),
    NonFinite(NonFinite),
    Str(String),
    Seq(Vec<Canonical>),
    Map(BTreeMap<String, Canonical>),
}

/// Canonicalize a parsed value
pub fn canonicalize(value: &Value, order_sensitive: bool) -> Canonical {
    match value {
        Value::Null => Canonical::Null,
        Value::Bool(b) => Canonical::Bool(*b),
        Value::Int(i) => Canonical::Int(*i),
        Value::Float(x) => canonical_number(*x),
        Value::Str(s) => Canonical::Str(s.clone()),
        Value::Seq(items) => {
            let mut items: Vec<Canonical> = items
                .iter()
                .map(|item| canonicalize(item, order_sensitive))
                .collect();
            if !order_sensitive {
                items.sort_by(Canonical::total_cmp);
            }
            Canonical::Seq(items)
        }
        Value::Map(map) => Canonical::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), canonicalize(v, order_sensitive)))
                .collect(),
        ),
    }
}

/// Parse literal text and canonicalize it in one step
pub fn normalize_literal(text: &str, order_sensitive: bool) -> Result<Canonical, LiteralError> {
    let value = Value::parse(text)?;
    Ok(canonicalize(&value, order_sensitive))
}

fn canonical_number(x: f64) -> Canonical {
    if x.is_nan() {
        Canonical::NonFinite(NonFinite::NaN)
    } else if x.is_infinite() {
        if x > 0.0 {
            Canonical::NonFinite(NonFinite::PosInfinity)
        } else {
            Canonical::NonFinite(NonFinite::NegInfinity)
        }
    } else if x.fract() == 0.0 && x.abs() <= MAX_EXACT_INTEGER {
        Canonical::Int(x as i64)
    } else {
        Canonical::Float(x)
    }
}

impl Canonical {
    fn rank(&self) -> u8 {
        match self {
            Canonical::Null => 0,
            Canonical::Bool(_) => 1,
            Canonical::Int(_) | Canonical::Float(_) => 2,
            Canonical::NonFinite(_) => 3,
            Canonical::Str(_) => 4,
            Canonical::Seq(_) => 5,
            Canonical::Map(_) => 6,
        }
    }

    /// Total order used to sort order-insensitive sequences
    ///
    /// Variants order as null < bool < number < non-finite < string <
    /// sequence < keyed structure; numbers compare by value.
    pub fn total_cmp(&self, other: &Canonical) -> Ordering {
        match (self, other) {
            (Canonical::Bool(a), Canonical::Bool(b)) => a.cmp(b),
            (Canonical::Int(a), Canonical::Int(b)) => a.cmp(b),
            (Canonical::Int(a), Canonical::Float(b)) => {
                (*a as f64).total_cmp(b).then(Ordering::Less)
            }
            (Canonical::Float(a), Canonical::Int(b)) => {
                a.total_cmp(&(*b as f64)).then(Ordering::Greater)
            }
            (Canonical::Float(a), Canonical::Float(b)) => a.total_cmp(b),
            (Canonical::NonFinite(a), Canonical::NonFinite(b)) => a.cmp(b),
            (Canonical::Str(a), Canonical::Str(b)) => a.cmp(b),
            (Canonical::Seq(a), Canonical::Seq(b)) => a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| x.total_cmp(y))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or_else(|| a.len().cmp(&b.len())),
            (Canonical::Map(a), Canonical::Map(b)) => a
                .iter()
                .zip(b.iter())
                .map(|((ka, va), (kb, vb))| ka.cmp(kb).then_with(|| va.total_cmp(vb)))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or_else(|| a.len().cmp(&b.len())),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl fmt::Display for Canonical {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Canonical::Null => write!(f, "null"),
            Canonical::Bool(b) => write!(f, "{}", b),
            Canonical::Int(i) => write!(f, "{}", i),
            Canonical::Float(x) => write_float(f, *x),
            Canonical::NonFinite(NonFinite::NaN) => write!(f, "NaN"),
            Canonical::NonFinite(NonFinite::PosInfinity) => write!(f, "Infinity"),
            Canonical::NonFinite(NonFinite::NegInfinity) => write!(f, "-Infinity"),
            Canonical::Str(s) => write_str(f, s),
            Canonical::Seq(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Canonical::Map(map) => {
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

    fn norm(text: &str, order_sensitive: bool) -> Canonical {
        normalize_literal(text, order_sensitive).unwrap()
    }

    #[test]
    fn test_integral_floats_collapse() {
        assert_eq!(norm("2.0", true), Canonical::Int(2));
        assert_eq!(norm("-0.0", true), Canonical::Int(0));
        assert_eq!(norm("1e3", true), Canonical::Int(1000));
        assert_eq!(norm("2.5", true), Canonical::Float(2.5));
    }

    #[test]
    fn test_huge_integral_floats_stay_float() {
        assert_eq!(norm("1e300", true), Canonical::Float(1e300));
    }

    #[test]
    fn test_non_finite_tokens_are_distinct() {
        assert_eq!(norm("NaN", true), Canonical::NonFinite(NonFinite::NaN));
        assert_eq!(norm("Infinity", true), Canonical::NonFinite(NonFinite::PosInfinity));
        assert_eq!(norm("-Infinity", true), Canonical::NonFinite(NonFinite::NegInfinity));
        assert_ne!(norm("NaN", true), Canonical::Null);
    }

    #[test]
    fn test_key_order_irrelevant() {
        assert_eq!(norm(r#"{"b":1,"a":2}"#, true), norm(r#"{"a":2,"b":1}"#, true));
        assert_eq!(norm(r#"{"b":1,"a":2}"#, true).to_string(), r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn test_order_sensitive_keeps_order() {
        assert_eq!(norm("[3,1,2]", true).to_string(), "[3,1,2]");
    }

    #[test]
    fn test_order_insensitive_sorts_every_level() {
        assert_eq!(norm("[3,1,2]", false).to_string(), "[1,2,3]");
        assert_eq!(norm("[[2,1],[0]]", false).to_string(), "[[0],[1,2]]");
        assert_eq!(
            norm(r#"["b", 2, null, "a", 1.5, true]"#, false).to_string(),
            r#"[null,true,1.5,2,"a","b"]"#
        );
    }

    #[test]
    fn test_total_cmp_mixed_numbers() {
        assert_eq!(Canonical::Int(1).total_cmp(&Canonical::Float(1.5)), Ordering::Less);
        assert_eq!(Canonical::Float(2.5).total_cmp(&Canonical::Int(2)), Ordering::Greater);
        assert_eq!(
            Canonical::Seq(vec![Canonical::Int(1)]).total_cmp(&Canonical::Seq(vec![
                Canonical::Int(1),
                Canonical::Int(0)
            ])),
            Ordering::Less
        );
    }
}
