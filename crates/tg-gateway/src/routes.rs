// SPDX-License-Identifier: MIT OR Apache-2.0
//! Route handlers for the tools and query surfaces.

use crate::middleware::{RequestMeta, TenantHeader, observability};
use crate::sse::event_stream;
use crate::VERSION;
use axum::body::Bytes;
use axum::extract::{Path as AxPath, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::sse::Sse;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tg_core::{GatewayError, GatewayResult};
use tg_dispatch::{Dispatcher, RequestContext};
use tg_store::Store;
use tg_telemetry::{global_metrics, render_prometheus};
use tg_webhook::WebhookReceiver;
use uuid::Uuid;

// ── State ───────────────────────────────────────────────────────────────

/// Webhook receivers keyed by backend path segment (`jira`, `github`…).
#[derive(Default)]
pub struct WebhookRouter {
    receivers: HashMap<String, Arc<WebhookReceiver>>,
}

impl WebhookRouter {
    /// An empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount a receiver under a backend segment.
    pub fn insert(&mut self, backend: &str, receiver: Arc<WebhookReceiver>) {
        self.receivers.insert(backend.to_string(), receiver);
    }

    /// Look up the receiver for a backend segment.
    #[must_use]
    pub fn get(&self, backend: &str) -> Option<Arc<WebhookReceiver>> {
        self.receivers.get(backend).cloned()
    }
}

/// Shared state for one surface.
pub struct AppState {
    /// The relational store.
    pub store: Arc<Store>,
    /// The tool dispatcher.
    pub dispatcher: Dispatcher,
    /// Webhook receivers by backend.
    pub webhooks: Arc<WebhookRouter>,
    /// Surface identity reported by `/` and `/sse`.
    pub server_name: &'static str,
}

// ── Error envelope ──────────────────────────────────────────────────────

/// A taxonomy error paired with its request id, rendered as the wire
/// envelope with the status mapped from the kind.
pub struct ApiError {
    err: GatewayError,
    request_id: String,
}

impl ApiError {
    /// Wrap a gateway error for the response path.
    #[must_use]
    pub fn new(err: GatewayError, request_id: &str) -> Self {
        Self {
            err,
            request_id: request_id.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.err.kind.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.err.to_body(&self.request_id))).into_response()
    }
}

fn require_tenant(meta: &RequestMeta) -> Result<Uuid, ApiError> {
    match meta.tenant {
        TenantHeader::Tenant(id) => Ok(id),
        TenantHeader::Missing => Err(ApiError::new(
            GatewayError::unauthorized("missing tenant id"),
            &meta.request_id,
        )),
        TenantHeader::Invalid => Err(ApiError::new(
            GatewayError::unauthorized("invalid tenant id"),
            &meta.request_id,
        )),
    }
}

// ── Request bodies ──────────────────────────────────────────────────────

/// Body of `POST /tools/invoke`.
#[derive(Debug, Deserialize)]
pub struct ToolInvokeRequest {
    /// Tool name.
    pub name: String,
    /// Tool arguments.
    #[serde(default)]
    pub arguments: Value,
}

/// Body of `POST /query`.
#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    /// Template name.
    pub template_name: String,
    /// Template parameters.
    #[serde(default)]
    pub params: serde_json::Map<String, Value>,
}

// ── Shared handlers ─────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn metrics_text() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        render_prometheus(global_metrics()),
    )
}

async fn metrics_json() -> impl IntoResponse {
    Json(global_metrics().snapshot())
}

async fn sse_endpoint(
    State(state): State<Arc<AppState>>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<impl IntoResponse, ApiError> {
    let tenant = require_tenant(&meta)?;
    Ok(Sse::new(event_stream(state.server_name, VERSION, tenant)))
}

async fn receive_webhook(
    State(state): State<Arc<AppState>>,
    Extension(meta): Extension<RequestMeta>,
    AxPath(backend): AxPath<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let Some(receiver) = state.webhooks.get(&backend) else {
        return Err(ApiError::new(
            GatewayError::not_found(format!("no webhook receiver for backend '{backend}'")),
            &meta.request_id,
        ));
    };
    let signature = headers
        .get("x-hub-signature")
        .and_then(|value| value.to_str().ok());

    global_metrics().increment("webhooks.received", 1, &[("backend", backend.as_str())]);
    receiver
        .handle(&body, signature)
        .await
        .map(Json)
        .map_err(|err| ApiError::new(err, &meta.request_id))
}

// ── Tools surface ───────────────────────────────────────────────────────

async fn tools_root(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "server": state.server_name,
        "version": VERSION,
        "status": "running",
        "endpoints": {
            "sse": "/sse",
            "invoke": "/tools/invoke",
            "tools": "/tools",
            "health": "/health",
            "metrics": "/metrics",
        },
    }))
}

async fn invoke_tool(
    State(state): State<Arc<AppState>>,
    Extension(meta): Extension<RequestMeta>,
    Json(body): Json<ToolInvokeRequest>,
) -> Result<Json<Value>, ApiError> {
    let tenant = require_tenant(&meta)?;

    let ctx = RequestContext {
        tenant_id: tenant,
        user_id: meta.user_id.clone(),
        request_id: meta.request_id.clone(),
        idempotency_key: meta.idempotency_key.clone(),
        ip_address: meta.ip_address.clone(),
        user_agent: meta.user_agent.clone(),
    };

    let result = state
        .dispatcher
        .invoke(&body.name, body.arguments, &ctx)
        .await
        .map_err(|err| ApiError::new(err, &meta.request_id))?;

    Ok(Json(json!({
        "result": result,
        "request_id": meta.request_id,
        "timestamp": Utc::now().to_rfc3339(),
    })))
}

async fn list_tools(
    Extension(meta): Extension<RequestMeta>,
) -> Result<Json<Value>, ApiError> {
    require_tenant(&meta)?;
    let names = tg_dispatch::tool_names();
    Ok(Json(json!({ "tools": names, "count": names.len() })))
}

/// The tools surface router.
#[must_use]
pub fn build_tools_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(tools_root))
        .route("/health", get(health))
        .route("/sse", get(sse_endpoint))
        .route("/tools/invoke", post(invoke_tool))
        .route("/tools", get(list_tools))
        .route("/metrics", get(metrics_text))
        .route("/metrics/json", get(metrics_json))
        .route("/webhooks/{backend}", post(receive_webhook))
        .layer(axum::middleware::from_fn(observability))
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}

// ── Query surface ───────────────────────────────────────────────────────

async fn query_root(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "server": state.server_name,
        "version": VERSION,
        "status": "running",
        "endpoints": {
            "sse": "/sse",
            "query": "/query",
            "templates": "/templates",
            "health": "/health",
            "metrics": "/metrics",
        },
    }))
}

async fn execute_query(
    State(state): State<Arc<AppState>>,
    Extension(meta): Extension<RequestMeta>,
    Json(body): Json<QueryRequest>,
) -> Result<Json<tg_query::QueryResponse>, ApiError> {
    let tenant = require_tenant(&meta)?;

    let metrics = global_metrics();
    metrics.increment(
        "query.executions",
        1,
        &[("template", body.template_name.as_str())],
    );

    let outcome: GatewayResult<tg_query::QueryResponse> =
        tg_query::execute_template(&state.store, &body.template_name, &body.params, tenant);
    match outcome {
        Ok(response) => {
            metrics.increment(
                "query.success",
                1,
                &[("template", body.template_name.as_str())],
            );
            metrics.observe(
                "query.duration_ms",
                response.query_time_ms as f64,
                &[("template", body.template_name.as_str())],
            );
            Ok(Json(response))
        }
        Err(err) => {
            metrics.increment(
                "query.errors",
                1,
                &[
                    ("template", body.template_name.as_str()),
                    ("error", err.kind.code()),
                ],
            );
            Err(ApiError::new(err, &meta.request_id))
        }
    }
}

async fn list_templates(
    Extension(meta): Extension<RequestMeta>,
) -> Result<Json<Value>, ApiError> {
    require_tenant(&meta)?;
    let names = tg_query::template_names();
    Ok(Json(json!({ "templates": names, "count": names.len() })))
}

/// The query surface router.
#[must_use]
pub fn build_query_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(query_root))
        .route("/health", get(health))
        .route("/sse", get(sse_endpoint))
        .route("/query", post(execute_query))
        .route("/templates", get(list_templates))
        .route("/metrics", get(metrics_text))
        .route("/metrics/json", get(metrics_json))
        .layer(axum::middleware::from_fn(observability))
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}
