/// Comparator - equality of canonical values under a numeric tolerance
///
/// Pure and total: never panics, never errors. Malformed text is rejected
/// before it reaches this module.

use crate::canonical::Canonical;
use crate::config::DEFAULT_TOLERANCE;

/// Absolute tolerance actually applied for a requested hint
///
/// NaN falls back to the default and negative values clamp to zero, so that
/// `equal(x, x, t)` holds for every `t`.
pub fn effective_tolerance(hint: f64) -> f64 {
    if hint.is_nan() {
        DEFAULT_TOLERANCE
    } else {
        hint.max(0.0)
    }
}

/// Decide whether `actual` matches `expected`
///
/// - Both integral: exact equality
/// - Either non-integral: `|a - b| <= tolerance`
/// - Everything else: structural equality, key by key and element by element
pub fn equal(actual: &Canonical, expected: &Canonical, tolerance: f64) -> bool {
    values_equal(actual, expected, effective_tolerance(tolerance))
}

fn values_equal(actual: &Canonical, expected: &Canonical, tolerance: f64) -> bool {
    match (actual, expected) {
        (Canonical::Int(a), Canonical::Int(b)) => a == b,
        (Canonical::Int(a), Canonical::Float(b)) => numbers_close(*a as f64, *b, tolerance),
        (Canonical::Float(a), Canonical::Int(b)) => numbers_close(*a, *b as f64, tolerance),
        (Canonical::Float(a), Canonical::Float(b)) => numbers_close(*a, *b, tolerance),
        (Canonical::Null, Canonical::Null) => true,
        (Canonical::Bool(a), Canonical::Bool(b)) => a == b,
        (Canonical::NonFinite(a), Canonical::NonFinite(b)) => a == b,
        (Canonical::Str(a), Canonical::Str(b)) => a == b,
        (Canonical::Seq(a), Canonical::Seq(b)) => {
            a.len() == b.len()
                && a.iter()
                    .zip(b.iter())
                    .all(|(x, y)| values_equal(x, y, tolerance))
        }
        (Canonical::Map(a), Canonical::Map(b)) => {
            a.len() == b.len()
                && a.iter().zip(b.iter()).all(|((ka, va), (kb, vb))| {
                    ka == kb && values_equal(va, vb, tolerance)
                })
        }
        _ => false,
    }
}

fn numbers_close(a: f64, b: f64, tolerance: f64) -> bool {
    a == b || (a - b).abs() <= tolerance
}
