// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared reqwest plumbing for all adapters.

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Response, StatusCode};
use std::time::Duration;
use tg_core::{GatewayError, GatewayResult};

/// Per-request timeout applied to every adapter client.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// How much of an upstream error body is carried into error details.
const BODY_SNIPPET_LEN: usize = 256;

/// Build a client with instance-scoped default headers and the standard
/// timeout.
///
/// # Errors
///
/// `validation_error` when the client cannot be constructed (malformed
/// default headers).
pub(crate) fn build_client(headers: HeaderMap) -> GatewayResult<reqwest::Client> {
    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|e| GatewayError::validation(format!("failed to build HTTP client: {e}")))
}

/// Header value from a secret string, marked sensitive so it never shows
/// up in client debug output.
///
/// # Errors
///
/// `validation_error` when the material contains non-header characters.
pub(crate) fn secret_header(value: &str) -> GatewayResult<HeaderValue> {
    let mut header = HeaderValue::from_str(value)
        .map_err(|_| GatewayError::validation("credential material is not header-safe"))?;
    header.set_sensitive(true);
    Ok(header)
}

/// Map a reqwest send failure onto the taxonomy.
pub(crate) fn classify_send_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::timeout("upstream request timed out")
    } else {
        GatewayError::network(format!("upstream request failed: {err}"))
    }
}

/// Pass a successful response through; map error statuses onto the
/// taxonomy, consuming the body for the snippet.
///
/// # Errors
///
/// The classified upstream failure.
pub(crate) async fn check_response(response: Response) -> GatewayResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(60);
        return Err(GatewayError::rate_limited(
            "upstream rate limit exceeded",
            retry_after,
        ));
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(GatewayError::unauthorized(format!(
            "upstream rejected the credentials (status {status})"
        )));
    }
    if status == StatusCode::NOT_FOUND {
        return Err(GatewayError::not_found("upstream resource not found"));
    }

    let code = status.as_u16();
    let body = response.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(BODY_SNIPPET_LEN).collect();
    if status.is_client_error() {
        Err(GatewayError::upstream_4xx(code, &snippet))
    } else {
        Err(GatewayError::upstream_5xx(code))
    }
}

/// Send + classify + decode a JSON response in one step.
///
/// # Errors
///
/// The classified send or status failure, or a payload error when the
/// body is not valid JSON.
pub(crate) async fn send_json(
    request: reqwest::RequestBuilder,
) -> GatewayResult<serde_json::Value> {
    let response = request.send().await.map_err(classify_send_error)?;
    let response = check_response(response).await?;
    response
        .json()
        .await
        .map_err(|e| malformed_payload(&format!("body is not valid JSON: {e}")))
}

/// An upstream answer the adapter could not make sense of.
pub(crate) fn malformed_payload(context: &str) -> GatewayError {
    GatewayError::new(
        tg_core::ErrorKind::Upstream5xx,
        format!("upstream payload could not be parsed: {context}"),
    )
}

/// Parse the timestamp formats the backends actually emit: RFC 3339
/// (`Z` or `+00:00`), Jira's `+0000` offset, and bare-seconds variants.
pub(crate) fn parse_backend_ts(raw: &str) -> GatewayResult<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%dT%H:%M:%S%z"] {
        if let Ok(ts) = DateTime::parse_from_str(raw, format) {
            return Ok(ts.with_timezone(&Utc));
        }
    }
    Err(malformed_payload(&format!("unparseable timestamp {raw:?}")))
}

/// Parse a unix-milliseconds string or number (ClickUp dates).
pub(crate) fn parse_unix_millis(value: &serde_json::Value) -> GatewayResult<DateTime<Utc>> {
    let millis = match value {
        serde_json::Value::String(s) => s.parse::<i64>().ok(),
        serde_json::Value::Number(n) => n.as_i64(),
        _ => None,
    };
    millis
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .ok_or_else(|| malformed_payload(&format!("unparseable unix timestamp {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_backend_timestamp_zoo() {
        for raw in [
            "2024-01-15T10:30:00Z",
            "2024-01-15T10:30:00+00:00",
            "2024-01-15T10:30:00.000+0000",
            "2024-01-15T10:30:00.123456Z",
        ] {
            let ts = parse_backend_ts(raw).unwrap();
            assert_eq!(ts.timezone(), Utc);
        }
        assert!(parse_backend_ts("yesterday").is_err());
    }

    #[test]
    fn unix_millis_from_string_and_number() {
        let ts = parse_unix_millis(&serde_json::json!("1700000000000")).unwrap();
        assert_eq!(ts.timestamp(), 1_700_000_000);
        let ts = parse_unix_millis(&serde_json::json!(1_700_000_000_000_i64)).unwrap();
        assert_eq!(ts.timestamp(), 1_700_000_000);
        assert!(parse_unix_millis(&serde_json::json!(null)).is_err());
    }
}
