// Trusted reference implementations used to validate fixture sets

use grader_common::types::FunctionArity;
use grader_common::value::Value;
use std::collections::BTreeMap;

pub type ReferenceFn = fn(&[Value]) -> Result<Value, String>;

pub struct Reference {
    pub name: &'static str,
    pub arity: FunctionArity,
    /// Whether results are compared as multisets
    pub any_order: bool,
    pub description: &'static str,
    pub run: ReferenceFn,
}

pub const REFERENCES: &[Reference] = &[
    Reference {
        name: "median-of-two-sorted-arrays",
        arity: FunctionArity::Spread,
        any_order: false,
        description: "Median of the union of two sorted numeric arrays",
        run: median_of_two_sorted_arrays,
    },
    Reference {
        name: "group-anagrams",
        arity: FunctionArity::Single,
        any_order: true,
        description: "Group words that are anagrams of each other",
        run: group_anagrams,
    },
];

pub fn find(name: &str) -> Option<&'static Reference> {
    REFERENCES.iter().find(|r| r.name == name)
}

fn numbers(value: &Value) -> Result<Vec<f64>, String> {
    match value {
        Value::Seq(items) => items
            .iter()
            .map(|item| {
                item.as_f64()
                    .ok_or_else(|| format!("expected a number, got {}", item.kind_name()))
            })
            .collect(),
        other => Err(format!("expected a list, got {}", other.kind_name())),
    }
}

fn median_of_two_sorted_arrays(args: &[Value]) -> Result<Value, String> {
    let [a, b] = args else {
        return Err(format!("expected 2 arguments, got {}", args.len()));
    };
    let (a, b) = (numbers(a)?, numbers(b)?);
    let total = a.len() + b.len();
    if total == 0 {
        return Err("both arrays are empty".to_string());
    }

    // merge only up to the middle
    let (mut i, mut j) = (0, 0);
    let mut previous = 0.0;
    let mut current = 0.0;
    for _ in 0..=total / 2 {
        previous = current;
        current = if j >= b.len() || (i < a.len() && a[i] <= b[j]) {
            i += 1;
            a[i - 1]
        } else {
            j += 1;
            b[j - 1]
        };
    }

    let median = if total % 2 == 1 {
        current
    } else {
        (previous + current) / 2.0
    };
    Ok(Value::Float(median))
}

fn group_anagrams(args: &[Value]) -> Result<Value, String> {
    let [Value::Seq(words)] = args else {
        return Err("expected a single list of words".to_string());
    };

    let mut groups: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for word in words {
        let Value::Str(text) = word else {
            return Err(format!("expected a string, got {}", word.kind_name()));
        };
        let mut key: Vec<char> = text.chars().collect();
        key.sort_unstable();
        groups
            .entry(key.into_iter().collect())
            .or_default()
            .push(word.clone());
    }

    Ok(Value::Seq(groups.into_values().map(Value::Seq).collect()))
}
