// SPDX-License-Identifier: MIT OR Apache-2.0
//! Request-scoped context threaded through the pipeline.

use uuid::Uuid;

/// Identity and correlation data for one tool invocation.
///
/// The transport layer authenticates the request and fills this in; the
/// dispatcher never looks at headers itself.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Authenticated tenant.
    pub tenant_id: Uuid,
    /// Acting user, when the transport knows one.
    pub user_id: Option<String>,
    /// Correlation id, echoed on every response and log line.
    pub request_id: String,
    /// Idempotency key from the `X-Idempotency-Key` header, if any.
    pub idempotency_key: Option<String>,
    /// Client IP for the audit trail.
    pub ip_address: Option<String>,
    /// Client user agent for the audit trail.
    pub user_agent: Option<String>,
}

impl RequestContext {
    /// A context with only the required fields set.
    #[must_use]
    pub fn new(tenant_id: Uuid, request_id: impl Into<String>) -> Self {
        Self {
            tenant_id,
            user_id: None,
            request_id: request_id.into(),
            idempotency_key: None,
            ip_address: None,
            user_agent: None,
        }
    }
}
