//! Error taxonomy for the chat hub.
//!
//! Every failure that crosses a component boundary — a provider call, a
//! repository operation, a socket write — is mapped into one of the kinds
//! below before it is allowed to reach a caller. Each kind carries a
//! `retryable` flag and an optional context map so the rate-limit
//! coordinator and circuit breaker can make policy decisions without
//! inspecting message text.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Result type alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The fixed set of failure kinds every provider and subsystem maps into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Authentication,
    InvalidRequest,
    RateLimit,
    Overloaded,
    Timeout,
    Network,
    StreamInterrupted,
    Validation,
    Internal,
    Unknown,
}

impl ErrorKind {
    /// Whether an error of this kind is retried by the rate-limit coordinator.
    ///
    /// `rate_limit`, `network`, `timeout`, `internal`, and `stream_interrupted`
    /// are retryable; everything else surfaces immediately.
    pub fn default_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimit
                | ErrorKind::Network
                | ErrorKind::Timeout
                | ErrorKind::Internal
                | ErrorKind::StreamInterrupted
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Authentication => "authentication",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Overloaded => "overloaded",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Network => "network",
            ErrorKind::StreamInterrupted => "stream_interrupted",
            ErrorKind::Validation => "validation",
            ErrorKind::Internal => "internal",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Optional rate-limit hint attached to `rate_limit`-kind errors, populated
/// from provider response headers when present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitInfo {
    pub retry_after_secs: Option<u64>,
    pub requests_remaining: Option<u64>,
    pub tokens_remaining: Option<u64>,
}

/// A single tagged error flowing through the hub.
///
/// `source` preserves the originating error for logs only; it is never
/// included in a user-visible frame.
#[derive(Error, Debug)]
#[error("{kind}: {message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
    pub rate_limit: Option<RateLimitInfo>,
    pub context: Map<String, Value>,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let retryable = kind.default_retryable();
        Self {
            kind,
            message: message.into(),
            retryable,
            rate_limit: None,
            context: Map::new(),
            source: None,
        }
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_rate_limit(mut self, info: RateLimitInfo) -> Self {
        self.rate_limit = Some(info);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, msg)
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, msg)
    }

    pub fn rate_limit(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimit, msg)
    }

    pub fn overloaded(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Overloaded, msg).with_retryable(false)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, msg)
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, msg)
    }

    pub fn stream_interrupted(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::StreamInterrupted, msg)
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, msg).with_retryable(false)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, msg)
    }

    pub fn unknown(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, msg).with_retryable(false)
    }

    /// Severity for structured logging, per the mapping in the error design:
    /// auth/invalid_request/validation -> medium, network/timeout/internal/
    /// stream_interrupted -> high, unknown -> critical, everything else low.
    pub fn severity(&self) -> &'static str {
        match self.kind {
            ErrorKind::Authentication | ErrorKind::InvalidRequest | ErrorKind::Validation => {
                "medium"
            }
            ErrorKind::Network
            | ErrorKind::Timeout
            | ErrorKind::Internal
            | ErrorKind::StreamInterrupted => "high",
            ErrorKind::Unknown => "critical",
            ErrorKind::RateLimit | ErrorKind::Overloaded => "low",
        }
    }

    /// The user-safe representation sent in a `message:ack` or
    /// `connection:error` frame: kind and message only, no context, no source.
    pub fn to_user_facing(&self) -> (ErrorKind, String) {
        (self.kind, self.message.clone())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::timeout(e.to_string()).with_source(e)
        } else {
            Error::network(e.to_string()).with_source(e)
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::internal(format!("json error: {e}")).with_source(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_retryable_matches_propagation_policy() {
        assert!(ErrorKind::RateLimit.default_retryable());
        assert!(ErrorKind::Network.default_retryable());
        assert!(ErrorKind::Timeout.default_retryable());
        assert!(ErrorKind::Internal.default_retryable());
        assert!(ErrorKind::StreamInterrupted.default_retryable());
        assert!(!ErrorKind::Authentication.default_retryable());
        assert!(!ErrorKind::InvalidRequest.default_retryable());
        assert!(!ErrorKind::Validation.default_retryable());
        assert!(!ErrorKind::Overloaded.default_retryable());
        assert!(!ErrorKind::Unknown.default_retryable());
    }

    #[test]
    fn overloaded_is_never_retryable_even_though_base_kind_could_be() {
        let err = Error::overloaded("try again in 12s");
        assert!(!err.retryable);
        assert_eq!(err.kind, ErrorKind::Overloaded);
    }

    #[test]
    fn display_matches_kind_and_message() {
        let err = Error::validation("content too long");
        assert_eq!(err.to_string(), "validation: content too long");
    }

    #[test]
    fn context_builder_accumulates_entries() {
        let err = Error::rate_limit("slow down").with_context("attempt", 3);
        assert_eq!(err.context.get("attempt").unwrap(), &Value::from(3));
    }

    #[test]
    fn severity_mapping() {
        assert_eq!(Error::authentication("x").severity(), "medium");
        assert_eq!(Error::network("x").severity(), "high");
        assert_eq!(Error::unknown("x").severity(), "critical");
        assert_eq!(Error::rate_limit("x").severity(), "low");
    }

    #[test]
    fn to_user_facing_drops_context_and_source() {
        let err = Error::invalid_request("bad id").with_context("field", "conversationId");
        let (kind, message) = err.to_user_facing();
        assert_eq!(kind, ErrorKind::InvalidRequest);
        assert_eq!(message, "bad id");
    }
}
