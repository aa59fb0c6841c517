//! Runtime assertions: a (field, operator, value) triple checked against one
//! response. A failed assertion is recorded against the request result; it
//! never changes the evaluator's verdict.

use crate::errors::ErrorCode;
use serde_json::Value;
use std::collections::HashMap;

pub struct AssertionInput<'a> {
    pub status: u16,
    pub latency_ms: u64,
    pub body_json: Option<&'a Value>,
    pub headers: &'a HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct AssertionOutcome {
    pub passed: bool,
    pub error: Option<String>,
}

pub fn evaluate(field: &str, operator: &str, expected: &Value, input: &AssertionInput) -> AssertionOutcome {
    let actual = match resolve_field(field, input) {
        Ok(v) => v,
        Err(code) => {
            return AssertionOutcome {
                passed: false,
                error: Some(format!("[{}] assertion field '{}' not found", code, field)),
            }
        }
    };

    let passed = if field == "latency" {
        compare_latency(input.latency_ms, operator, expected)
    } else {
        compare(&actual, operator, expected)
    };

    AssertionOutcome {
        passed,
        error: if passed {
            None
        } else {
            Some(format!(
                "[{}] assertion failed: {} {} {} (actual: {})",
                ErrorCode::ASSERTION_BODY,
                field,
                operator,
                expected,
                actual
            ))
        },
    }
}

fn resolve_field(field: &str, input: &AssertionInput) -> Result<Value, ErrorCode> {
    if field == "status" {
        return Ok(Value::from(input.status));
    }
    if field == "latency" {
        return Ok(Value::from(input.latency_ms));
    }
    if let Some(path) = field.strip_prefix("body.") {
        let body = input.body_json.ok_or(ErrorCode::ASSERTION_PATH_NOT_FOUND)?;
        return navigate(body, path).ok_or(ErrorCode::ASSERTION_PATH_NOT_FOUND);
    }
    if field == "body" {
        return input
            .body_json
            .cloned()
            .ok_or(ErrorCode::ASSERTION_PATH_NOT_FOUND);
    }
    if let Some(name) = field.strip_prefix("header.") {
        return input
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| Value::String(v.clone()))
            .ok_or(ErrorCode::ASSERTION_PATH_NOT_FOUND);
    }
    Err(ErrorCode::ASSERTION_BAD_OPERATOR)
}

fn navigate<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for part in path.split('.') {
        if let Some(bracket) = part.find('[') {
            let (key, rest) = part.split_at(bracket);
            if !key.is_empty() {
                current = current.get(key)?;
            }
            let idx: usize = rest.trim_start_matches('[').trim_end_matches(']').parse().ok()?;
            current = current.get(idx)?;
        } else {
            current = current.get(part)?;
        }
    }
    Some(current)
}

fn compare(actual: &Value, operator: &str, expected: &Value) -> bool {
    match operator {
        "==" => values_eq(actual, expected),
        "!=" => !values_eq(actual, expected),
        "<" | "<=" | ">" | ">=" => compare_numeric(actual, operator, expected),
        "contains" => contains(actual, expected),
        "in" => membership(actual, expected),
        _ => false,
    }
}

fn compare_latency(latency_ms: u64, operator: &str, expected: &Value) -> bool {
    let expected_ms = match expected {
        Value::String(s) => parse_duration_ms(s),
        Value::Number(n) => n.as_u64(),
        _ => None,
    };
    let Some(expected_ms) = expected_ms else {
        return false;
    };
    match operator {
        "==" => latency_ms == expected_ms,
        "!=" => latency_ms != expected_ms,
        "<" => latency_ms < expected_ms,
        "<=" => latency_ms <= expected_ms,
        ">" => latency_ms > expected_ms,
        ">=" => latency_ms >= expected_ms,
        _ => false,
    }
}

/// Accepts a bare number (interpreted as milliseconds) or a `<n><unit>`
/// duration literal (`ms`, `s`, `m`, `h`).
pub fn parse_duration_ms(s: &str) -> Option<u64> {
    let s = s.trim();
    if let Ok(n) = s.parse::<u64>() {
        return Some(n);
    }
    for (suffix, factor) in [("ms", 1u64), ("s", 1000), ("m", 60_000), ("h", 3_600_000)] {
        if let Some(digits) = s.strip_suffix(suffix) {
            if let Ok(n) = digits.parse::<u64>() {
                return Some(n * factor);
            }
        }
    }
    None
}

fn values_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    // Loose cross-type equality: "200" == 200, since assertion literals are
    // frequently written as bare numbers but arrive already JSON-typed.
    match (a, b) {
        (Value::String(s), Value::Number(_)) | (Value::Number(_), Value::String(s)) => {
            let other = if matches!(a, Value::String(_)) { b } else { a };
            s.parse::<f64>().ok() == other.as_f64()
        }
        _ => false,
    }
}

fn compare_numeric(actual: &Value, operator: &str, expected: &Value) -> bool {
    let (Some(a), Some(b)) = (as_f64(actual), as_f64(expected)) else {
        return false;
    };
    match operator {
        "<" => a < b,
        "<=" => a <= b,
        ">" => a > b,
        ">=" => a >= b,
        _ => false,
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn contains(actual: &Value, expected: &Value) -> bool {
    match actual {
        Value::String(s) => {
            let needle = expected.as_str().map(str::to_string).unwrap_or_else(|| expected.to_string());
            s.contains(&needle)
        }
        Value::Array(items) => items.iter().any(|i| values_eq(i, expected)),
        _ => false,
    }
}

fn membership(actual: &Value, expected: &Value) -> bool {
    match expected {
        Value::Array(items) => items.iter().any(|i| values_eq(i, actual)),
        Value::String(s) => {
            // Parser renders list literals as a JSON-array-looking string
            // when it can't resolve them eagerly; fall back to parsing it.
            if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(s) {
                items.iter().any(|i| values_eq(i, actual))
            } else {
                false
            }
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_equality() {
        let headers = HashMap::new();
        let input = AssertionInput {
            status: 200,
            latency_ms: 10,
            body_json: None,
            headers: &headers,
        };
        let outcome = evaluate("status", "==", &json!(200), &input);
        assert!(outcome.passed);
    }

    #[test]
    fn latency_duration_literal() {
        let headers = HashMap::new();
        let input = AssertionInput {
            status: 200,
            latency_ms: 300,
            body_json: None,
            headers: &headers,
        };
        let outcome = evaluate("latency", "<", &json!("500ms"), &input);
        assert!(outcome.passed);
    }

    #[test]
    fn body_path_assertion() {
        let headers = HashMap::new();
        let body = json!({"user": {"id": 7}});
        let input = AssertionInput {
            status: 200,
            latency_ms: 1,
            body_json: Some(&body),
            headers: &headers,
        };
        let outcome = evaluate("body.user.id", "==", &json!(7), &input);
        assert!(outcome.passed);
    }

    #[test]
    fn contains_operator_on_string_body() {
        let headers = HashMap::new();
        let body = json!("hello world");
        let input = AssertionInput {
            status: 200,
            latency_ms: 1,
            body_json: Some(&body),
            headers: &headers,
        };
        let outcome = evaluate("body", "contains", &json!("world"), &input);
        assert!(outcome.passed);
    }

    #[test]
    fn in_operator_checks_membership() {
        let headers = HashMap::new();
        let input = AssertionInput {
            status: 201,
            latency_ms: 1,
            body_json: None,
            headers: &headers,
        };
        let outcome = evaluate("status", "in", &json!([200, 201, 204]), &input);
        assert!(outcome.passed);
    }

    #[test]
    fn failed_assertion_carries_error_string() {
        let headers = HashMap::new();
        let input = AssertionInput {
            status: 500,
            latency_ms: 1,
            body_json: None,
            headers: &headers,
        };
        let outcome = evaluate("status", "==", &json!(200), &input);
        assert!(!outcome.passed);
        assert!(outcome.error.is_some());
    }
}
