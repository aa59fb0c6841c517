//! # Structured error codes
//!
//! Every user-facing failure carries a four-digit code in addition to its
//! message, grouped by category so tooling downstream (CI, dashboards) can
//! act on the category without parsing prose.
//!
//! | Range  | Category         | Meaning                                |
//! |--------|------------------|------------------------------------------|
//! | E1xxx  | ParseOrCompile   | The scenario source itself is wrong     |
//! | E2xxx  | Transport        | Network/TLS/timeout talking to a target |
//! | E3xxx  | AssertionExtract | A response didn't match what was asked  |
//! | E4xxx  | Configuration    | Env/setup problem                       |
//! | E5xxx  | Internal         | Bug in this binary                      |
//! | E6xxx  | Evaluator        | The evaluator subprocess misbehaved     |

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode(u16);

impl ErrorCode {
    // E1xxx: lexing, parsing, compiling a scenario source.
    pub const LEX_UNTERMINATED_STRING: Self = Self(1001);
    pub const LEX_UNEXPECTED_CHAR: Self = Self(1002);
    pub const LEX_INVALID_DURATION: Self = Self(1003);
    pub const PARSE_UNEXPECTED_TOKEN: Self = Self(1010);
    pub const PARSE_UNTERMINATED_BLOCK: Self = Self(1011);
    pub const COMPILE_UNKNOWN_REQUEST: Self = Self(1020);
    pub const COMPILE_UNKNOWN_SCENARIO: Self = Self(1021);
    pub const COMPILE_CYCLIC_REFERENCE: Self = Self(1022);
    pub const COMPILE_UNRESOLVED_VARIABLE: Self = Self(1023);
    pub const IR_INVALID_FORMAT: Self = Self(1030);

    // E2xxx: transport.
    pub const HTTP_TIMEOUT: Self = Self(2001);
    pub const HTTP_CONNECTION_ERROR: Self = Self(2002);
    pub const HTTP_TLS_ERROR: Self = Self(2003);
    pub const HTTP_INVALID_JSON: Self = Self(2004);

    // E3xxx: assertions (3001-3009) and extractions (3010-3019).
    pub const ASSERTION_STATUS: Self = Self(3001);
    pub const ASSERTION_LATENCY: Self = Self(3002);
    pub const ASSERTION_BODY: Self = Self(3003);
    pub const ASSERTION_HEADER: Self = Self(3004);
    pub const ASSERTION_PATH_NOT_FOUND: Self = Self(3005);
    pub const ASSERTION_BAD_OPERATOR: Self = Self(3006);
    pub const EXTRACTION_PATH_NOT_FOUND: Self = Self(3010);
    pub const EXTRACTION_HEADER_NOT_FOUND: Self = Self(3011);
    pub const EXTRACTION_REGEX_NO_MATCH: Self = Self(3012);
    pub const EXTRACTION_INVALID_SOURCE: Self = Self(3013);
    pub const EXTRACTION_INVALID_REGEX: Self = Self(3014);
    pub const EXTRACTION_COOKIE_NOT_FOUND: Self = Self(3015);

    // E4xxx: configuration/environment.
    pub const ENV_VAR_NOT_FOUND: Self = Self(4001);
    pub const CONTEXT_VAR_NOT_FOUND: Self = Self(4002);
    pub const FILE_NOT_FOUND: Self = Self(4003);
    pub const FILE_PERMISSION_ERROR: Self = Self(4004);
    pub const LIMIT_EXCEEDED: Self = Self(4005);

    // E5xxx: internal.
    pub const INTERNAL_ERROR: Self = Self(5001);
    pub const SERIALIZATION_ERROR: Self = Self(5002);

    // E6xxx: evaluator gateway.
    pub const EVALUATOR_SPAWN_FAILED: Self = Self(6001);
    pub const EVALUATOR_TIMEOUT: Self = Self(6002);
    pub const EVALUATOR_MALFORMED_VERDICT: Self = Self(6003);
    pub const EVALUATOR_INVALID_VERDICT: Self = Self(6004);
    pub const EVALUATOR_NONZERO_EXIT: Self = Self(6005);

    pub fn code(&self) -> u16 {
        self.0
    }

    pub fn formatted(&self) -> String {
        format!("E{:04}", self.0)
    }

    pub fn category(&self) -> ErrorCategory {
        match self.0 / 1000 {
            1 => ErrorCategory::ParseOrCompile,
            2 => ErrorCategory::Transport,
            3 => ErrorCategory::AssertionExtract,
            4 => ErrorCategory::Configuration,
            5 => ErrorCategory::Internal,
            6 => ErrorCategory::Evaluator,
            _ => ErrorCategory::Unknown,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.formatted())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    ParseOrCompile,
    Transport,
    AssertionExtract,
    Configuration,
    Internal,
    Evaluator,
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ParseOrCompile => "parse/compile",
            Self::Transport => "transport",
            Self::AssertionExtract => "assertion/extraction",
            Self::Configuration => "configuration",
            Self::Internal => "internal",
            Self::Evaluator => "evaluator",
            Self::Unknown => "unknown",
        };
        write!(f, "{}", label)
    }
}

/// Extra context attached to a [`StructuredError`] (step/request id, path, diff).
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub request_id: Option<String>,
    pub path: Option<String>,
    pub expected: Option<String>,
    pub actual: Option<String>,
}

#[derive(Debug)]
pub struct StructuredError {
    pub code: ErrorCode,
    pub message: String,
    pub context: Option<ErrorContext>,
}

impl StructuredError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.context.get_or_insert_with(Default::default).request_id = Some(id.into());
        self
    }

    pub fn user_message(&self) -> String {
        let mut msg = format!("[{}] {}", self.code, self.message);
        if let Some(ctx) = &self.context {
            if let Some(id) = &ctx.request_id {
                msg.push_str(&format!(" (request: {})", id));
            }
            if let (Some(expected), Some(actual)) = (&ctx.expected, &ctx.actual) {
                msg.push_str(&format!(" [expected: {}, actual: {}]", expected, actual));
            }
        }
        msg
    }
}

impl fmt::Display for StructuredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for StructuredError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_with_category_prefix() {
        assert_eq!(ErrorCode::COMPILE_CYCLIC_REFERENCE.formatted(), "E1022");
        assert_eq!(
            ErrorCode::COMPILE_CYCLIC_REFERENCE.category(),
            ErrorCategory::ParseOrCompile
        );
        assert_eq!(ErrorCode::EXTRACTION_COOKIE_NOT_FOUND.formatted(), "E3015");
        assert_eq!(
            ErrorCode::EVALUATOR_TIMEOUT.category(),
            ErrorCategory::Evaluator
        );
    }

    #[test]
    fn user_message_includes_context() {
        let err = StructuredError::new(ErrorCode::ASSERTION_STATUS, "status mismatch")
            .with_request_id("login");
        let msg = err.user_message();
        assert!(msg.contains("E3001"));
        assert!(msg.contains("login"));
    }
}
