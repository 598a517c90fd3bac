// SPDX-License-Identifier: MIT OR Apache-2.0
//! Typed parameter structs for every tool in the registry.
//!
//! The JSON Schemas derived from these structs are what the dispatcher
//! validates incoming arguments against before deserializing.

use schemars::JsonSchema;
use serde::Deserialize;
use tg_core::{WorkItemPriority, WorkItemStatus, WorkItemType};
use uuid::Uuid;

fn default_limit() -> usize {
    50
}

fn default_item_type() -> WorkItemType {
    WorkItemType::Task
}

fn default_priority() -> WorkItemPriority {
    WorkItemPriority::Medium
}

/// Parameters for `search`.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchParams {
    /// Instance to search; optional when the tenant has exactly one.
    pub instance_id: Option<Uuid>,
    /// Free-text needle matched against titles.
    pub query: Option<String>,
    /// Restrict to one project key.
    pub project: Option<String>,
    /// Restrict to one normalized status.
    pub status: Option<WorkItemStatus>,
    /// Maximum rows returned.
    #[serde(default = "default_limit")]
    pub limit: usize,
}

/// Parameters for `get_work_item`.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetWorkItemParams {
    /// Instance to read from.
    pub instance_id: Option<Uuid>,
    /// Human-readable work-item key.
    pub work_item_key: String,
}

/// Parameters for `create_work_item`.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateWorkItemParams {
    /// Instance to create in.
    pub instance_id: Option<Uuid>,
    /// Project / repository / list identifier.
    pub project: String,
    /// Title of the new item.
    pub title: String,
    /// Optional plain-text description.
    pub description: Option<String>,
    /// Normalized type.
    #[serde(rename = "type", default = "default_item_type")]
    pub item_type: WorkItemType,
    /// Normalized priority.
    #[serde(default = "default_priority")]
    pub priority: WorkItemPriority,
    /// Assignee in the backend's vocabulary.
    pub assignee_id: Option<String>,
    /// Backend-specific extra fields merged into the create payload.
    #[serde(default)]
    pub extras: serde_json::Map<String, serde_json::Value>,
    /// Client-supplied deduplication key.
    pub idempotency_key: Option<String>,
}

/// Parameters for `update_work_item`.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateWorkItemParams {
    /// Instance the item lives in.
    pub instance_id: Option<Uuid>,
    /// Work-item id in the backend's vocabulary.
    pub work_item_id: String,
    /// Backend-native fields to update.
    pub fields: serde_json::Map<String, serde_json::Value>,
    /// Client-supplied deduplication key.
    pub idempotency_key: Option<String>,
}

/// Parameters for `transition_work_item`.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct TransitionWorkItemParams {
    /// Instance the item lives in.
    pub instance_id: Option<Uuid>,
    /// Work-item id in the backend's vocabulary.
    pub work_item_id: String,
    /// Target normalized status.
    pub to_status: WorkItemStatus,
    /// Optional comment posted alongside the transition.
    pub comment: Option<String>,
    /// Client-supplied deduplication key.
    pub idempotency_key: Option<String>,
}

/// Parameters for `add_comment`.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct AddCommentParams {
    /// Instance the item lives in.
    pub instance_id: Option<Uuid>,
    /// Work-item id in the backend's vocabulary.
    pub work_item_id: String,
    /// Comment body.
    pub body: String,
    /// Client-supplied deduplication key.
    pub idempotency_key: Option<String>,
}

/// Parameters for `link_work_items`.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct LinkWorkItemsParams {
    /// Instance the items live in.
    pub instance_id: Option<Uuid>,
    /// Inward side of the link.
    pub inward_id: String,
    /// Outward side of the link.
    pub outward_id: String,
    /// Link type in the backend's vocabulary (e.g. `Blocks`).
    pub link_type: String,
    /// Client-supplied deduplication key.
    pub idempotency_key: Option<String>,
}

/// Parameters for `list_transitions`.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListTransitionsParams {
    /// Instance the item lives in.
    pub instance_id: Option<Uuid>,
    /// Work-item id in the backend's vocabulary.
    pub work_item_id: String,
}
