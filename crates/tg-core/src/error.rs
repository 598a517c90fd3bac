// SPDX-License-Identifier: MIT OR Apache-2.0
//! Closed error taxonomy for the gateway.
//!
//! Every error that crosses a component boundary is a [`GatewayError`]
//! carrying one of nine [`ErrorKind`]s. Business-layer errors surface with
//! their kind intact; anything outside the taxonomy is logged with its
//! request id and surfaced as an internal upstream failure with a generic
//! message.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

// ── Kinds ───────────────────────────────────────────────────────────────

/// The closed set of error kinds the gateway can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Request parameters failed schema or semantic validation.
    ValidationError,
    /// The per-instance rate limit was exceeded.
    RateLimited,
    /// The backend rejected the request with a 4xx status.
    #[serde(rename = "upstream_4xx")]
    Upstream4xx,
    /// The backend failed with a 5xx status, or an internal error occurred.
    #[serde(rename = "upstream_5xx")]
    Upstream5xx,
    /// A concurrent request already holds the resource or key.
    Conflict,
    /// The tool, instance, or resource does not exist.
    NotFound,
    /// Missing or malformed authentication.
    Unauthorized,
    /// The backend or store did not answer in time.
    Timeout,
    /// The backend could not be reached at all.
    NetworkError,
}

impl ErrorKind {
    /// Wire code string for this kind.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::ValidationError => "validation_error",
            Self::RateLimited => "rate_limited",
            Self::Upstream4xx => "upstream_4xx",
            Self::Upstream5xx => "upstream_5xx",
            Self::Conflict => "conflict",
            Self::NotFound => "not_found",
            Self::Unauthorized => "unauthorized",
            Self::Timeout => "timeout",
            Self::NetworkError => "network_error",
        }
    }

    /// The HTTP status this kind maps to on the wire.
    #[must_use]
    pub fn http_status(self) -> u16 {
        match self {
            Self::ValidationError => 422,
            Self::RateLimited => 429,
            Self::Upstream4xx => 400,
            Self::Upstream5xx => 502,
            Self::Conflict => 409,
            Self::NotFound => 404,
            Self::Unauthorized => 401,
            Self::Timeout => 504,
            Self::NetworkError => 502,
        }
    }

    /// Whether a client may reasonably retry the same request later.
    #[must_use]
    pub fn is_retriable(self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::Upstream5xx | Self::Timeout | Self::NetworkError
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// ── GatewayError ────────────────────────────────────────────────────────

/// Convenience result alias used throughout the workspace.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// A typed gateway error: kind, human message, optional structured
/// details, and a retry hint for `rate_limited`.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[error("[{kind}] {message}")]
pub struct GatewayError {
    /// The taxonomy kind.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
    /// Optional structured context (per-field errors, upstream status, …).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// Seconds until a retry may succeed; set only for `rate_limited`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl GatewayError {
    /// Build an error with the given kind and message.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
            retry_after: None,
        }
    }

    /// Attach structured details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// A parameter-validation failure.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationError, message)
    }

    /// A missing tool, instance, or resource.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Missing or malformed authentication.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    /// Rate-limit overflow with a retry hint, clamped to at least one
    /// second so clients stay well-behaved.
    #[must_use]
    pub fn rate_limited(message: impl Into<String>, retry_after: u64) -> Self {
        let mut err = Self::new(ErrorKind::RateLimited, message);
        err.retry_after = Some(retry_after.max(1));
        err
    }

    /// An idempotency or uniqueness race lost to `winning_request_id`.
    #[must_use]
    pub fn conflict(message: impl Into<String>, winning_request_id: &str) -> Self {
        Self::new(ErrorKind::Conflict, message)
            .with_details(serde_json::json!({ "request_id": winning_request_id }))
    }

    /// A backend 4xx, carrying the status and a body snippet.
    #[must_use]
    pub fn upstream_4xx(status: u16, body_snippet: &str) -> Self {
        Self::new(
            ErrorKind::Upstream4xx,
            format!("upstream rejected the request with status {status}"),
        )
        .with_details(serde_json::json!({ "status": status, "body": body_snippet }))
    }

    /// A backend 5xx.
    #[must_use]
    pub fn upstream_5xx(status: u16) -> Self {
        Self::new(
            ErrorKind::Upstream5xx,
            format!("upstream failed with status {status}"),
        )
        .with_details(serde_json::json!({ "status": status }))
    }

    /// A timeout talking to the backend or store.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// A connection-level failure reaching the backend.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NetworkError, message)
    }

    /// An unexpected internal failure. The cause belongs in the logs keyed
    /// by request id, never in the wire message.
    #[must_use]
    pub fn internal() -> Self {
        Self::new(ErrorKind::Upstream5xx, "internal error")
    }

    /// Render the wire envelope for this error.
    #[must_use]
    pub fn to_body(&self, request_id: &str) -> ErrorBody {
        ErrorBody {
            code: self.kind,
            message: self.message.clone(),
            details: self.details.clone(),
            retry_after: self.retry_after,
            request_id: request_id.to_string(),
            timestamp: Utc::now(),
        }
    }
}

// ── Wire envelope ───────────────────────────────────────────────────────

/// The JSON error envelope returned by both tool surfaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ErrorBody {
    /// Taxonomy code.
    pub code: ErrorKind,
    /// Human-readable message.
    pub message: String,
    /// Optional structured context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// Seconds until retry; only for `rate_limited`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    /// Correlation id for the request that failed.
    pub request_id: String,
    /// When the error was produced.
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_codes_are_snake_case_on_the_wire() {
        assert_eq!(
            serde_json::to_value(ErrorKind::Upstream4xx).unwrap(),
            serde_json::json!("upstream_4xx")
        );
        assert_eq!(
            serde_json::to_value(ErrorKind::NetworkError).unwrap(),
            serde_json::json!("network_error")
        );
        for kind in [
            ErrorKind::ValidationError,
            ErrorKind::RateLimited,
            ErrorKind::Upstream4xx,
            ErrorKind::Upstream5xx,
            ErrorKind::Conflict,
            ErrorKind::NotFound,
            ErrorKind::Unauthorized,
            ErrorKind::Timeout,
            ErrorKind::NetworkError,
        ] {
            let wire = serde_json::to_value(kind).unwrap();
            assert_eq!(wire, serde_json::json!(kind.code()));
        }
    }

    #[test]
    fn retry_after_is_at_least_one_second() {
        let err = GatewayError::rate_limited("slow down", 0);
        assert_eq!(err.retry_after, Some(1));
    }

    #[test]
    fn http_status_matches_kind_class() {
        assert_eq!(ErrorKind::Unauthorized.http_status(), 401);
        assert_eq!(ErrorKind::NotFound.http_status(), 404);
        assert_eq!(ErrorKind::ValidationError.http_status(), 422);
        assert_eq!(ErrorKind::RateLimited.http_status(), 429);
        assert_eq!(ErrorKind::Upstream5xx.http_status(), 502);
        assert_eq!(ErrorKind::Timeout.http_status(), 504);
    }

    #[test]
    fn conflict_carries_winning_request_id() {
        let err = GatewayError::conflict("already in flight", "req_abc");
        assert_eq!(
            err.details.unwrap()["request_id"],
            serde_json::json!("req_abc")
        );
    }
}
