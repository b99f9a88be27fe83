//! Condition evaluation against the execution context.
//!
//! A condition names a dot-separated path into the context map, an operator
//! and a literal. Missing paths and `null` values count as absent: `exists`
//! is false, `not_exists` is true, every comparison is false.

use std::cmp::Ordering;
use std::collections::HashMap;

use cadence_types::workflow::{Condition, ConditionOperator};
use serde_json::Value;
use thiserror::Error;

/// Errors from parsing textual conditions.
#[derive(Debug, Error, PartialEq)]
pub enum ConditionError {
    #[error("unknown condition operator '{0}'")]
    UnknownOperator(String),

    #[error("malformed condition expression '{0}'")]
    Malformed(String),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse an operator in symbolic (`>=`) or word (`gte`) form.
pub fn parse_operator(op: &str) -> Result<ConditionOperator, ConditionError> {
    let op = op.trim();
    let parsed = match op.to_ascii_lowercase().as_str() {
        "==" | "=" | "eq" => ConditionOperator::Eq,
        "!=" | "ne" | "neq" => ConditionOperator::Ne,
        ">" | "gt" => ConditionOperator::Gt,
        "<" | "lt" => ConditionOperator::Lt,
        ">=" | "gte" | "ge" => ConditionOperator::Gte,
        "<=" | "lte" | "le" => ConditionOperator::Lte,
        "contains" => ConditionOperator::Contains,
        "exists" => ConditionOperator::Exists,
        "not_exists" | "notexists" | "!exists" => ConditionOperator::NotExists,
        _ => return Err(ConditionError::UnknownOperator(op.to_string())),
    };
    Ok(parsed)
}

/// Parse `"<field> <op> <value>"` or `"<field> exists"`.
///
/// The value is read as JSON when possible (`0`, `true`, `"x"`), otherwise
/// taken as a bare string.
pub fn parse_condition_expr(text: &str) -> Result<Condition, ConditionError> {
    let mut parts = text.trim().splitn(3, char::is_whitespace);
    let field = parts.next().filter(|f| !f.is_empty());
    let op = parts.next();
    let (Some(field), Some(op)) = (field, op) else {
        return Err(ConditionError::Malformed(text.to_string()));
    };
    let operator = parse_operator(op)?;
    let literal = parts.next().map(str::trim).unwrap_or_default();

    let value = match operator {
        ConditionOperator::Exists | ConditionOperator::NotExists => Value::Null,
        _ if literal.is_empty() => return Err(ConditionError::Malformed(text.to_string())),
        _ => serde_json::from_str(literal).unwrap_or_else(|_| Value::String(literal.to_string())),
    };

    Ok(Condition {
        field: field.to_string(),
        operator,
        value,
    })
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Navigate a dot-separated path through nested objects (and array indices).
///
/// Returns `None` for missing segments and for `null` leaves.
pub fn resolve_path<'a>(context: &'a HashMap<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = context.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    if current.is_null() { None } else { Some(current) }
}

/// Evaluate a condition against the context.
pub fn evaluate(condition: &Condition, context: &HashMap<String, Value>) -> bool {
    let actual = resolve_path(context, &condition.field);
    let expected = &condition.value;

    match (condition.operator, actual) {
        (ConditionOperator::Exists, found) => found.is_some(),
        (ConditionOperator::NotExists, found) => found.is_none(),
        (_, None) => false,
        (ConditionOperator::Eq, Some(v)) => values_equal(v, expected),
        (ConditionOperator::Ne, Some(v)) => !values_equal(v, expected),
        (ConditionOperator::Gt, Some(v)) => compare(v, expected) == Some(Ordering::Greater),
        (ConditionOperator::Lt, Some(v)) => compare(v, expected) == Some(Ordering::Less),
        (ConditionOperator::Gte, Some(v)) => matches!(
            compare(v, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        (ConditionOperator::Lte, Some(v)) => {
            matches!(compare(v, expected), Some(Ordering::Less | Ordering::Equal))
        }
        (ConditionOperator::Contains, Some(v)) => contains(v, expected),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::String(s) => match needle {
            Value::String(n) => s.contains(n.as_str()),
            other => s.contains(&other.to_string()),
        },
        Value::Array(items) => items.iter().any(|item| values_equal(item, needle)),
        Value::Object(map) => needle.as_str().is_some_and(|key| map.contains_key(key)),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> HashMap<String, Value> {
        let mut c = HashMap::new();
        c.insert("step_s1".to_string(), json!({"waited": 0, "score": 7.5}));
        c.insert(
            "step_review".to_string(),
            json!({"verdict": "PASS", "tags": ["api", "db"], "meta": {"lang": "rust"}}),
        );
        c.insert("empty".to_string(), Value::Null);
        c
    }

    fn cond(field: &str, operator: ConditionOperator, value: Value) -> Condition {
        Condition {
            field: field.to_string(),
            operator,
            value,
        }
    }

    #[test]
    fn test_numeric_equality_across_int_and_float() {
        let c = ctx();
        assert!(evaluate(&cond("step_s1.waited", ConditionOperator::Eq, json!(0)), &c));
        assert!(evaluate(&cond("step_s1.waited", ConditionOperator::Eq, json!(0.0)), &c));
        assert!(!evaluate(&cond("step_s1.waited", ConditionOperator::Ne, json!(0)), &c));
        assert!(!evaluate(&cond("step_s1.waited", ConditionOperator::Eq, json!("0")), &c));
    }

    #[test]
    fn test_ordering_operators() {
        let c = ctx();
        assert!(evaluate(&cond("step_s1.score", ConditionOperator::Gt, json!(7)), &c));
        assert!(evaluate(&cond("step_s1.score", ConditionOperator::Lte, json!(7.5)), &c));
        assert!(!evaluate(&cond("step_s1.score", ConditionOperator::Lt, json!(7.5)), &c));
        assert!(evaluate(&cond("step_review.verdict", ConditionOperator::Gte, json!("PASS")), &c));
        assert!(evaluate(&cond("step_review.verdict", ConditionOperator::Lt, json!("Z")), &c));
        // Mixed types never order.
        assert!(!evaluate(&cond("step_s1.score", ConditionOperator::Gt, json!("1")), &c));
    }

    #[test]
    fn test_contains_on_strings_arrays_and_objects() {
        let c = ctx();
        assert!(evaluate(&cond("step_review.verdict", ConditionOperator::Contains, json!("AS")), &c));
        assert!(evaluate(&cond("step_review.tags", ConditionOperator::Contains, json!("db")), &c));
        assert!(!evaluate(&cond("step_review.tags", ConditionOperator::Contains, json!("ui")), &c));
        assert!(evaluate(&cond("step_review.meta", ConditionOperator::Contains, json!("lang")), &c));
    }

    #[test]
    fn test_missing_and_null_paths_are_absent() {
        let c = ctx();
        for path in ["nope", "step_s1.nope", "step_s1.waited.deeper", "empty"] {
            assert!(!evaluate(&cond(path, ConditionOperator::Exists, Value::Null), &c));
            assert!(evaluate(&cond(path, ConditionOperator::NotExists, Value::Null), &c));
            assert!(!evaluate(&cond(path, ConditionOperator::Eq, Value::Null), &c));
            assert!(!evaluate(&cond(path, ConditionOperator::Ne, json!(1)), &c));
        }
        assert!(evaluate(&cond("step_s1.waited", ConditionOperator::Exists, Value::Null), &c));
    }

    #[test]
    fn test_array_index_segments() {
        let c = ctx();
        assert!(evaluate(&cond("step_review.tags.1", ConditionOperator::Eq, json!("db")), &c));
        assert!(!evaluate(&cond("step_review.tags.9", ConditionOperator::Exists, Value::Null), &c));
    }

    #[test]
    fn test_parse_operator_forms() {
        assert_eq!(parse_operator("gte").unwrap(), ConditionOperator::Gte);
        assert_eq!(parse_operator(" != ").unwrap(), ConditionOperator::Ne);
        assert_eq!(parse_operator("EQ").unwrap(), ConditionOperator::Eq);
        assert_eq!(
            parse_operator("~="),
            Err(ConditionError::UnknownOperator("~=".to_string()))
        );
    }

    #[test]
    fn test_parse_condition_expr() {
        let c = parse_condition_expr("step_gate.verdict == \"PASS\"").unwrap();
        assert_eq!(c.field, "step_gate.verdict");
        assert_eq!(c.value, json!("PASS"));

        let c = parse_condition_expr("step_gate.verdict != FAIL").unwrap();
        assert_eq!(c.operator, ConditionOperator::Ne);
        assert_eq!(c.value, json!("FAIL"));

        let c = parse_condition_expr("step_a.output exists").unwrap();
        assert_eq!(c.operator, ConditionOperator::Exists);

        assert!(matches!(
            parse_condition_expr("step_a.output"),
            Err(ConditionError::Malformed(_))
        ));
        assert!(matches!(
            parse_condition_expr("x >"),
            Err(ConditionError::Malformed(_))
        ));
    }
}
