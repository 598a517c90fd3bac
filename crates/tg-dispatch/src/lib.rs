// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! The tool dispatcher: a static registry of named tools and the
//! pipeline that executes them.
//!
//! Every invocation runs the same sequence: resolve the tool, validate
//! its arguments against the declared schema, resolve the backend
//! instance, pass rate-limit admission, replay any idempotency record,
//! execute the adapter call, audit the mutation, persist the idempotency
//! record, and commit. The audit and idempotency rows land in one
//! transaction.

/// Request-scoped identity and correlation data.
pub mod context;
/// The pipeline itself.
pub mod dispatcher;
/// Typed parameter structs for every tool.
pub mod params;
/// The static tool registry.
pub mod registry;

pub use context::RequestContext;
pub use dispatcher::{AdapterProvider, DefaultAdapterProvider, Dispatcher};
pub use registry::{ToolDefinition, ToolKind, find_tool, tool_names};
