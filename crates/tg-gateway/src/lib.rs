// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! HTTP surface for the gateway.
//!
//! Two servers share one process: the tools surface (`/tools/invoke`,
//! default port 8055) and the query surface (`/query`, default port
//! 8056). Both are instances of the same transport shape: header
//! authentication, an SSE stream with heartbeats, a single-shot POST
//! endpoint, listing and health endpoints, and Prometheus metrics.

/// Gateway configuration.
pub mod config;
/// Observability middleware: request ids, context, logging, metrics.
pub mod middleware;
/// Route handlers for both surfaces.
pub mod routes;
/// The SSE stream.
pub mod sse;

pub use config::GatewayConfig;
pub use routes::{AppState, WebhookRouter, build_query_app, build_tools_app};

/// Version string reported by the root and SSE endpoints.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
