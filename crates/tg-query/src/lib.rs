// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Whitelisted SQL query templates.
//!
//! Every template is a compile-time constant executed with named
//! parameter binding, never string interpolation. The authenticated
//! tenant id is injected by the engine and every template's WHERE clause
//! references it; a secondary source scanner provides defense in depth
//! on top of the whitelist.

/// The execution engine.
pub mod engine;
/// Source-level safety checks.
pub mod safety;
/// The template registry and per-template parameter schemas.
pub mod templates;

pub use engine::{QueryResponse, execute_template};
pub use safety::check_template_source;
pub use templates::{QueryTemplate, TEMPLATES, find_template, template_names};
