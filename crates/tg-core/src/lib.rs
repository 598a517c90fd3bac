// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Core types shared by every Trackgate crate.
//!
//! This crate is the lingua franca between the tool dispatcher and the
//! source adapters: the closed enum domains (status, priority, type,
//! backend kind), the normalized records (work items, comments,
//! transitions), the backend-instance registry types, the closed error
//! taxonomy with its wire envelope, and the redaction pass applied to
//! anything that leaves the process as a log line or audit diff.

/// Closed error taxonomy and the wire error envelope.
pub mod error;
/// Backend instances, tenants, and decrypted auth material.
pub mod instance;
/// Normalized enum domains and record types.
pub mod model;
/// Recursive redaction of sensitive keys in structured payloads.
pub mod redact;

pub use error::{ErrorBody, ErrorKind, GatewayError, GatewayResult};
pub use instance::{AuthKind, AuthMaterial, BackendInstance, Tenant};
pub use model::{
    BackendKind, Comment, Transition, WorkItem, WorkItemPriority, WorkItemStatus, WorkItemType,
};
pub use redact::{REDACTED, redact_value};
