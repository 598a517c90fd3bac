// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! SQLite-backed relational store for the gateway.
//!
//! One [`Store`] owns the connection and serves four concerns that must
//! commit together: the backend-instance registry (with sealed credential
//! blobs), the normalized warehouse tables the adapters populate, the
//! idempotency key table, and the append-only audit log. The connection
//! sits behind a mutex that is never held across an await; all statements
//! bind named parameters.
//!
//! The idempotency unique index on `(tenant_id, operation, key)` is the
//! only cross-task coordination primitive in the pipeline: a loser of the
//! insert race reads the winner's record instead of writing its own.

/// Append-only audit log.
pub mod audit;
/// Credential sealing seam for instance auth material.
pub mod cipher;
/// Idempotency key records.
pub mod idempotency;
/// Tenant and backend-instance registry.
pub mod instances;
/// Connection handling, schema, and the combined write transaction.
pub mod store;
/// Normalized warehouse tables.
pub mod warehouse;

pub use audit::{AuditAction, AuditEntry, AuditRecord};
pub use cipher::{CredentialCipher, PassthroughCipher};
pub use idempotency::{IdempotencyRecord, IdempotencyStatus, IdempotencyWrite};
pub use instances::NewInstance;
pub use store::{CommitOutcome, Store, StoreError, WriteCommit};
pub use warehouse::WorkItemFilter;
