// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Webhook receiver: HMAC-SHA256 signature verification over the raw
//! body, event-type extraction, and dispatch to a handler registry.
//!
//! A failed handler is caught and recorded; the remaining handlers still
//! run and the overall response stays 200 whenever the signature
//! verified.

/// Jira webhook event types.
pub mod events;
/// Handler registry and dispatch.
pub mod receiver;
/// HMAC-SHA256 construction and constant-time verification.
pub mod signature;

pub use events::WebhookEventType;
pub use receiver::{Handler, WebhookReceiver};
pub use signature::{hmac_sha256, sign_body, verify_signature};
