//! Extraction: pulling one named value out of a response per an
//! `ExtractionRule.source` string (`$.path`, `regex:pattern`,
//! `header:Name`, `cookie:Name`).

use crate::errors::ErrorCode;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ExtractError {
    #[error("[{0}] path '{1}' not found in body")]
    PathNotFound(ErrorCode, String),
    #[error("[{0}] header '{1}' not found")]
    HeaderNotFound(ErrorCode, String),
    #[error("[{0}] cookie '{1}' not found")]
    CookieNotFound(ErrorCode, String),
    #[error("[{0}] regex '{1}' did not match")]
    RegexNoMatch(ErrorCode, String),
    #[error("[{0}] invalid regex '{1}': {2}")]
    InvalidRegex(ErrorCode, String, String),
    #[error("[{0}] unrecognised extraction source '{1}'")]
    InvalidSource(ErrorCode, String),
}

pub struct ExtractionInput<'a> {
    pub body_json: Option<&'a Value>,
    pub body_text: &'a str,
    pub headers: &'a HashMap<String, String>,
    pub set_cookie_headers: &'a [String],
}

pub fn extract_value(source: &str, input: &ExtractionInput) -> Result<Value, ExtractError> {
    if let Some(pattern) = source.strip_prefix("regex:") {
        return extract_regex(pattern, input.body_text);
    }
    if let Some(name) = source.strip_prefix("header:") {
        return extract_header(name, input.headers);
    }
    if let Some(name) = source.strip_prefix("cookie:") {
        return extract_cookie(name, input.set_cookie_headers);
    }
    if source.starts_with("$.") || source == "$" {
        return extract_json_path(source, input.body_json);
    }
    Err(ExtractError::InvalidSource(
        ErrorCode::EXTRACTION_INVALID_SOURCE,
        source.to_string(),
    ))
}

fn extract_json_path(path: &str, body: Option<&Value>) -> Result<Value, ExtractError> {
    let body = body.ok_or_else(|| {
        ExtractError::PathNotFound(ErrorCode::EXTRACTION_PATH_NOT_FOUND, path.to_string())
    })?;
    let trimmed = path.strip_prefix('$').unwrap_or(path);
    let trimmed = trimmed.strip_prefix('.').unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Ok(body.clone());
    }

    let mut current = body;
    for segment in split_path(trimmed) {
        match segment {
            PathSegment::Key(key) => {
                current = current.get(&key).ok_or_else(|| {
                    ExtractError::PathNotFound(
                        ErrorCode::EXTRACTION_PATH_NOT_FOUND,
                        path.to_string(),
                    )
                })?;
            }
            PathSegment::Index(i) => {
                current = current.get(i).ok_or_else(|| {
                    ExtractError::PathNotFound(
                        ErrorCode::EXTRACTION_PATH_NOT_FOUND,
                        path.to_string(),
                    )
                })?;
            }
        }
    }
    Ok(current.clone())
}

enum PathSegment {
    Key(String),
    Index(usize),
}

/// Splits `a.b[0].c` into `[Key(a), Key(b), Index(0), Key(c)]`.
fn split_path(path: &str) -> Vec<PathSegment> {
    let mut segments = Vec::new();
    for part in path.split('.') {
        if let Some(bracket) = part.find('[') {
            let (key, rest) = part.split_at(bracket);
            if !key.is_empty() {
                segments.push(PathSegment::Key(key.to_string()));
            }
            let mut rest = rest;
            while let Some(close) = rest.find(']') {
                let idx_str = &rest[1..close];
                if let Ok(idx) = idx_str.parse::<usize>() {
                    segments.push(PathSegment::Index(idx));
                }
                rest = &rest[close + 1..];
            }
        } else if !part.is_empty() {
            segments.push(PathSegment::Key(part.to_string()));
        }
    }
    segments
}

fn extract_regex(pattern: &str, body_text: &str) -> Result<Value, ExtractError> {
    let re = Regex::new(pattern).map_err(|e| {
        ExtractError::InvalidRegex(
            ErrorCode::EXTRACTION_INVALID_REGEX,
            pattern.to_string(),
            e.to_string(),
        )
    })?;
    let caps = re.captures(body_text).ok_or_else(|| {
        ExtractError::RegexNoMatch(ErrorCode::EXTRACTION_REGEX_NO_MATCH, pattern.to_string())
    })?;
    let value = caps
        .get(1)
        .or_else(|| caps.get(0))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| {
            ExtractError::RegexNoMatch(ErrorCode::EXTRACTION_REGEX_NO_MATCH, pattern.to_string())
        })?;
    Ok(Value::String(value))
}

fn extract_header(name: &str, headers: &HashMap<String, String>) -> Result<Value, ExtractError> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| Value::String(v.clone()))
        .ok_or_else(|| {
            ExtractError::HeaderNotFound(ErrorCode::EXTRACTION_HEADER_NOT_FOUND, name.to_string())
        })
}

fn extract_cookie(name: &str, set_cookie_headers: &[String]) -> Result<Value, ExtractError> {
    crate::cookie::find_named(set_cookie_headers, name)
        .map(Value::String)
        .ok_or_else(|| {
            ExtractError::CookieNotFound(ErrorCode::EXTRACTION_COOKIE_NOT_FOUND, name.to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_nested_json_path() {
        let body = json!({"user": {"id": 42, "tags": ["a", "b"]}});
        let headers = HashMap::new();
        let input = ExtractionInput {
            body_json: Some(&body),
            body_text: "",
            headers: &headers,
            set_cookie_headers: &[],
        };
        let v = extract_value("$.user.id", &input).unwrap();
        assert_eq!(v, json!(42));
        let v = extract_value("$.user.tags[1]", &input).unwrap();
        assert_eq!(v, json!("b"));
    }

    #[test]
    fn missing_json_path_errors() {
        let body = json!({"a": 1});
        let headers = HashMap::new();
        let input = ExtractionInput {
            body_json: Some(&body),
            body_text: "",
            headers: &headers,
            set_cookie_headers: &[],
        };
        assert!(matches!(
            extract_value("$.missing", &input),
            Err(ExtractError::PathNotFound(..))
        ));
    }

    #[test]
    fn extracts_via_regex_capture_group() {
        let headers = HashMap::new();
        let input = ExtractionInput {
            body_json: None,
            body_text: "token=abc123;",
            headers: &headers,
            set_cookie_headers: &[],
        };
        let v = extract_value("regex:token=([a-z0-9]+)", &input).unwrap();
        assert_eq!(v, json!("abc123"));
    }

    #[test]
    fn extracts_header_case_insensitively() {
        let mut headers = HashMap::new();
        headers.insert("X-Request-Id".to_string(), "req-1".to_string());
        let input = ExtractionInput {
            body_json: None,
            body_text: "",
            headers: &headers,
            set_cookie_headers: &[],
        };
        let v = extract_value("header:x-request-id", &input).unwrap();
        assert_eq!(v, json!("req-1"));
    }

    #[test]
    fn extracts_cookie_from_set_cookie_headers() {
        let headers = HashMap::new();
        let cookies = vec!["session=s1; Path=/".to_string()];
        let input = ExtractionInput {
            body_json: None,
            body_text: "",
            headers: &headers,
            set_cookie_headers: &cookies,
        };
        let v = extract_value("cookie:session", &input).unwrap();
        assert_eq!(v, json!("s1"));
    }
}
