use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stable error codes shared by drivers, the runtime, and the protocol
/// adapters. The set is closed: new failure modes must map onto one of
/// these codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "VALIDATION_ERROR")]
    Validation,
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    #[serde(rename = "UNAUTHORIZED")]
    Unauthorized,
    #[serde(rename = "FORBIDDEN")]
    Forbidden,
    #[serde(rename = "CONFLICT")]
    Conflict,
    #[serde(rename = "RATE_LIMIT_EXCEEDED")]
    RateLimitExceeded,
    #[serde(rename = "DRIVER_CONNECTION_FAILED")]
    DriverConnectionFailed,
    #[serde(rename = "DRIVER_QUERY_FAILED")]
    DriverQueryFailed,
    #[serde(rename = "DRIVER_UNSUPPORTED_OPERATION")]
    DriverUnsupportedOperation,
    #[serde(rename = "INVALID_REGEX")]
    InvalidRegex,
    #[serde(rename = "INVALID_STATE_TRANSITION")]
    InvalidStateTransition,
    #[serde(rename = "INVALID_DATE_RANGE")]
    InvalidDateRange,
    #[serde(rename = "INTERNAL_ERROR")]
    Internal,
}

impl ErrorCode {
    /// The wire spelling of the code.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Validation => "VALIDATION_ERROR",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorCode::DriverConnectionFailed => "DRIVER_CONNECTION_FAILED",
            ErrorCode::DriverQueryFailed => "DRIVER_QUERY_FAILED",
            ErrorCode::DriverUnsupportedOperation => "DRIVER_UNSUPPORTED_OPERATION",
            ErrorCode::InvalidRegex => "INVALID_REGEX",
            ErrorCode::InvalidStateTransition => "INVALID_STATE_TRANSITION",
            ErrorCode::InvalidDateRange => "INVALID_DATE_RANGE",
            ErrorCode::Internal => "INTERNAL_ERROR",
        }
    }

    /// Parse a wire code. Unknown codes fall back to `Internal` so that
    /// a remote peer speaking a newer dialect never crashes the caller.
    pub fn parse(code: &str) -> Self {
        match code {
            "VALIDATION_ERROR" => ErrorCode::Validation,
            "NOT_FOUND" => ErrorCode::NotFound,
            "UNAUTHORIZED" => ErrorCode::Unauthorized,
            "FORBIDDEN" => ErrorCode::Forbidden,
            "CONFLICT" => ErrorCode::Conflict,
            "RATE_LIMIT_EXCEEDED" => ErrorCode::RateLimitExceeded,
            "DRIVER_CONNECTION_FAILED" => ErrorCode::DriverConnectionFailed,
            "DRIVER_QUERY_FAILED" => ErrorCode::DriverQueryFailed,
            "DRIVER_UNSUPPORTED_OPERATION" => ErrorCode::DriverUnsupportedOperation,
            "INVALID_REGEX" => ErrorCode::InvalidRegex,
            "INVALID_STATE_TRANSITION" => ErrorCode::InvalidStateTransition,
            "INVALID_DATE_RANGE" => ErrorCode::InvalidDateRange,
            _ => ErrorCode::Internal,
        }
    }
}

/// The error type used across the ObjectQL workspace.
///
/// Every user-visible failure serializes to the structured body
/// `{ "error": { "code", "message", "details"? } }` — a raw stack trace
/// never crosses an API boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Attach structured details (e.g. per-field validation errors).
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DriverConnectionFailed, message)
    }

    pub fn query(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DriverQueryFailed, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DriverUnsupportedOperation, message)
    }

    pub fn invalid_regex(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRegex, message)
    }

    pub fn invalid_state_transition(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidStateTransition, message)
    }

    pub fn invalid_date_range(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidDateRange, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    /// Whether a federation client may transparently retry the operation.
    ///
    /// Only connection-level failures qualify; everything else reflects
    /// a decision the remote already made about the request.
    pub fn is_retryable(&self) -> bool {
        self.code == ErrorCode::DriverConnectionFailed
    }

    /// The structured wire body: `{ "error": { code, message, details? } }`.
    pub fn to_body(&self) -> Value {
        serde_json::json!({ "error": self })
    }

    /// Parse the wire body produced by [`Error::to_body`].
    pub fn from_body(body: &Value) -> Option<Self> {
        let err = body.get("error")?;
        let code = ErrorCode::parse(err.get("code")?.as_str()?);
        let message = err.get("message")?.as_str().unwrap_or_default().to_string();
        Some(Self {
            code,
            message,
            details: err.get("details").cloned(),
        })
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trip() {
        for code in [
            ErrorCode::Validation,
            ErrorCode::NotFound,
            ErrorCode::Unauthorized,
            ErrorCode::Forbidden,
            ErrorCode::Conflict,
            ErrorCode::RateLimitExceeded,
            ErrorCode::DriverConnectionFailed,
            ErrorCode::DriverQueryFailed,
            ErrorCode::DriverUnsupportedOperation,
            ErrorCode::InvalidRegex,
            ErrorCode::InvalidStateTransition,
            ErrorCode::InvalidDateRange,
            ErrorCode::Internal,
        ] {
            assert_eq!(ErrorCode::parse(code.as_str()), code);
        }
    }

    #[test]
    fn unknown_code_falls_back_to_internal() {
        assert_eq!(ErrorCode::parse("SOMETHING_NEW"), ErrorCode::Internal);
    }

    #[test]
    fn body_round_trip() {
        let err = Error::not_found("object todo not found")
            .with_details(serde_json::json!({ "object": "todo" }));
        let body = err.to_body();
        assert_eq!(body["error"]["code"], "NOT_FOUND");
        let parsed = Error::from_body(&body).unwrap();
        assert_eq!(parsed, err);
    }

    #[test]
    fn only_connection_failures_are_retryable() {
        assert!(Error::connection("refused").is_retryable());
        assert!(!Error::validation("bad input").is_retryable());
        assert!(!Error::not_found("missing").is_retryable());
    }
}
