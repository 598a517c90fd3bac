// SPDX-License-Identifier: MIT OR Apache-2.0
//! Observability middleware shared by both surfaces.
//!
//! Each request is tagged with a request id (taken from `X-Request-ID`
//! or generated), the tenant and user headers are extracted, and on exit
//! the status, latency, and sizes are recorded and a single structured
//! `request completed` line is emitted. The request id is echoed on the
//! response.

use axum::body::Body;
use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;
use tg_telemetry::global_metrics;
use tracing::{Instrument, info, info_span};
use uuid::Uuid;

/// How the tenant header parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantHeader {
    /// `X-Tenant-ID` was absent.
    Missing,
    /// `X-Tenant-ID` was present but not a UUID.
    Invalid,
    /// A well-formed tenant id.
    Tenant(Uuid),
}

/// Request-scoped metadata available to handlers as an extension.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    /// Correlation id for this request.
    pub request_id: String,
    /// Parsed `X-Tenant-ID`.
    pub tenant: TenantHeader,
    /// Raw `X-User-ID`.
    pub user_id: Option<String>,
    /// Raw `X-Idempotency-Key`.
    pub idempotency_key: Option<String>,
    /// Client address as reported by `X-Forwarded-For`.
    pub ip_address: Option<String>,
    /// Raw `User-Agent`.
    pub user_agent: Option<String>,
}

fn header_string(req: &Request<Body>, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// The combined observability middleware.
pub async fn observability(mut req: Request<Body>, next: Next) -> Response {
    let request_id =
        header_string(&req, "x-request-id").unwrap_or_else(|| Uuid::new_v4().to_string());

    let tenant = match header_string(&req, "x-tenant-id") {
        None => TenantHeader::Missing,
        Some(raw) => match Uuid::parse_str(&raw) {
            Ok(id) => TenantHeader::Tenant(id),
            Err(_) => TenantHeader::Invalid,
        },
    };

    let meta = RequestMeta {
        request_id: request_id.clone(),
        tenant,
        user_id: header_string(&req, "x-user-id"),
        idempotency_key: header_string(&req, "x-idempotency-key"),
        ip_address: header_string(&req, "x-forwarded-for"),
        user_agent: header_string(&req, "user-agent"),
    };

    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let request_size: u64 = header_string(&req, "content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    let tenant_label = match meta.tenant {
        TenantHeader::Tenant(id) => id.to_string(),
        _ => String::new(),
    };
    let span = info_span!(
        "http_request",
        http.method = %method,
        http.path = %path,
        request_id = %request_id,
        tenant_id = %tenant_label,
    );

    req.extensions_mut().insert(meta.clone());

    let metrics = global_metrics();
    metrics.observe(
        "http.request_size_bytes",
        request_size as f64,
        &[("path", path.as_str())],
    );

    let start = Instant::now();
    let mut resp = next.run(req).instrument(span).await;
    let duration = start.elapsed();
    let status = resp.status().as_u16();

    let response_size: u64 = resp
        .headers()
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    let status_label = status.to_string();
    metrics.increment(
        "http.requests",
        1,
        &[
            ("method", method.as_str()),
            ("path", path.as_str()),
            ("status", status_label.as_str()),
        ],
    );
    metrics.observe(
        "http.request_duration_ms",
        duration.as_secs_f64() * 1000.0,
        &[("method", method.as_str()), ("path", path.as_str())],
    );
    metrics.observe(
        "http.response_size_bytes",
        response_size as f64,
        &[("path", path.as_str())],
    );

    info!(
        http.method = %method,
        http.path = %path,
        http.status = status,
        http.duration_ms = duration.as_millis() as u64,
        request_id = %meta.request_id,
        tenant_id = %tenant_label,
        user_id = meta.user_id.as_deref().unwrap_or_default(),
        "request completed"
    );

    if let Ok(value) = HeaderValue::from_str(&meta.request_id) {
        resp.headers_mut().insert("x-request-id", value);
    }
    resp
}
