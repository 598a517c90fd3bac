// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Source adapters: one per backend, all behind [`SourceAdapter`].
//!
//! An adapter translates normalized calls into the backend's wire
//! protocol and lowers backend payloads into the normalized records from
//! `tg-core`. Enum normalization is total: unknown upstream values
//! collapse to a documented default (status → `todo`, priority →
//! `medium`, type → `task`). Outbound maps are lossy the other way; each
//! adapter documents its collapses.
//!
//! Adapters never retry. Upstream failures map onto the closed error
//! taxonomy (429 → `rate_limited`, 401/403 → `unauthorized`, 404 →
//! `not_found`, other 4xx → `upstream_4xx`, 5xx → `upstream_5xx`,
//! timeouts → `timeout`, connect failures → `network_error`) and retry
//! policy belongs to the caller.

/// Asana adapter (REST, completion-boolean workflow).
pub mod asana;
/// ClickUp adapter (REST, list-scoped statuses).
pub mod clickup;
/// GitHub Issues adapter (REST v3, label-derived metadata).
pub mod github;
/// Shared reqwest plumbing and upstream failure classification.
pub mod http;
/// Jira adapter (REST v3, two-phase transitions, ADF descriptions).
pub mod jira;
/// Linear adapter (GraphQL, integer priorities).
pub mod linear;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tg_core::{
    AuthMaterial, BackendInstance, BackendKind, Comment, GatewayError, GatewayResult, Transition,
    WorkItem, WorkItemPriority, WorkItemStatus, WorkItemType,
};
use uuid::Uuid;

pub use asana::AsanaAdapter;
pub use clickup::ClickupAdapter;
pub use github::GithubAdapter;
pub use jira::JiraAdapter;
pub use linear::LinearAdapter;

// ── Requests ────────────────────────────────────────────────────────────

/// Parameters for creating a work item through an adapter.
#[derive(Debug, Clone)]
pub struct NewWorkItem {
    /// Project / repository / list the item belongs to.
    pub project_id: String,
    /// Title / summary.
    pub title: String,
    /// Optional plain-text description.
    pub description: Option<String>,
    /// Normalized type; the adapter raises it into backend vocabulary.
    pub item_type: WorkItemType,
    /// Normalized priority.
    pub priority: WorkItemPriority,
    /// Optional assignee in the backend's vocabulary.
    pub assignee_id: Option<String>,
    /// Backend-specific extra fields merged into the create payload.
    pub extras: serde_json::Map<String, serde_json::Value>,
}

impl NewWorkItem {
    /// A task-typed, medium-priority item with just a title.
    #[must_use]
    pub fn titled(project_id: &str, title: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            title: title.to_string(),
            description: None,
            item_type: WorkItemType::Task,
            priority: WorkItemPriority::Medium,
            assignee_id: None,
            extras: serde_json::Map::new(),
        }
    }
}

// ── The adapter contract ────────────────────────────────────────────────

/// Capability set every backend adapter implements.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Which backend this adapter talks to.
    fn kind(&self) -> BackendKind;

    /// The instance this adapter is bound to.
    fn instance_id(&self) -> Uuid;

    /// Probe the backend with the cheapest authenticated call.
    async fn test_connection(&self) -> bool;

    /// Fetch work items, optionally filtered by project and update time.
    async fn fetch_work_items(
        &self,
        project_id: Option<&str>,
        updated_since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> GatewayResult<Vec<WorkItem>>;

    /// Fetch a single work item by backend id or key.
    async fn fetch_work_item(&self, work_item_id: &str) -> GatewayResult<WorkItem>;

    /// Create a work item.
    async fn create_work_item(&self, new: &NewWorkItem) -> GatewayResult<WorkItem>;

    /// Partially update a work item with backend-native fields.
    async fn update_work_item(
        &self,
        work_item_id: &str,
        fields: &serde_json::Map<String, serde_json::Value>,
    ) -> GatewayResult<WorkItem>;

    /// Move a work item to a new normalized status.
    async fn transition_work_item(
        &self,
        work_item_id: &str,
        to_status: WorkItemStatus,
        comment: Option<&str>,
    ) -> GatewayResult<WorkItem>;

    /// Add a comment.
    async fn add_comment(&self, work_item_id: &str, body: &str) -> GatewayResult<Comment>;

    /// Fetch comments for a work item.
    async fn fetch_comments(&self, work_item_id: &str) -> GatewayResult<Vec<Comment>>;

    /// Fetch status transitions for a work item.
    async fn fetch_transitions(&self, work_item_id: &str) -> GatewayResult<Vec<Transition>>;

    /// Link two work items. Only Jira exposes a first-class link
    /// primitive; other backends reject the call.
    async fn link_work_items(
        &self,
        _inward_id: &str,
        _outward_id: &str,
        _link_type: &str,
    ) -> GatewayResult<()> {
        Err(GatewayError::validation(format!(
            "{} does not support work-item links",
            self.kind()
        )))
    }

    /// Lower a backend status string into the normalized domain.
    fn normalize_status(&self, raw: &str) -> WorkItemStatus;
    /// Lower a backend priority string into the normalized domain.
    fn normalize_priority(&self, raw: &str) -> WorkItemPriority;
    /// Lower a backend type string into the normalized domain.
    fn normalize_type(&self, raw: &str) -> WorkItemType;

    /// Raise a normalized status into the backend's vocabulary.
    fn outbound_status(&self, status: WorkItemStatus) -> String;
    /// Raise a normalized priority into the backend's vocabulary.
    fn outbound_priority(&self, priority: WorkItemPriority) -> String;
    /// Raise a normalized type into the backend's vocabulary.
    fn outbound_type(&self, item_type: WorkItemType) -> String;
}

// ── Factory ─────────────────────────────────────────────────────────────

/// Build the adapter for an instance. The factory owns no mutable state;
/// each adapter owns its HTTP client with instance-scoped auth headers.
///
/// # Errors
///
/// `validation_error` when the credential material does not fit the
/// backend's auth scheme.
pub fn create_adapter(
    instance: &BackendInstance,
    auth: &AuthMaterial,
) -> GatewayResult<Arc<dyn SourceAdapter>> {
    tracing::debug!(instance_id = %instance.id, kind = %instance.kind, "building adapter");
    let adapter: Arc<dyn SourceAdapter> = match instance.kind {
        BackendKind::Jira => Arc::new(JiraAdapter::new(
            instance.id,
            instance.tenant_id,
            &instance.base_url,
            auth,
        )?),
        BackendKind::Github => Arc::new(GithubAdapter::new(
            instance.id,
            instance.tenant_id,
            &instance.base_url,
            auth,
        )?),
        BackendKind::Asana => Arc::new(AsanaAdapter::new(
            instance.id,
            instance.tenant_id,
            &instance.base_url,
            auth,
        )?),
        BackendKind::Linear => Arc::new(LinearAdapter::new(
            instance.id,
            instance.tenant_id,
            &instance.base_url,
            auth,
        )?),
        BackendKind::Clickup => Arc::new(ClickupAdapter::new(
            instance.id,
            instance.tenant_id,
            &instance.base_url,
            auth,
        )?),
    };
    Ok(adapter)
}
