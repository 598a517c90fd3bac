// SPDX-License-Identifier: MIT OR Apache-2.0
//! Normalized enum domains and record types shared by all source adapters.
//!
//! Adapters lower backend-specific payloads into these records and raise
//! normalized values back into the backend's vocabulary. Every record
//! carries the raw backend payload so downstream consumers can recover
//! information the normalization drops.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

// ── Backend kinds ───────────────────────────────────────────────────────

/// The supported third-party backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Atlassian Jira (REST v3).
    Jira,
    /// GitHub Issues (REST v3).
    Github,
    /// Asana tasks (REST).
    Asana,
    /// Linear (GraphQL).
    Linear,
    /// ClickUp tasks (REST).
    Clickup,
}

impl BackendKind {
    /// All backend kinds, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Jira,
        Self::Github,
        Self::Asana,
        Self::Linear,
        Self::Clickup,
    ];

    /// Wire identifier for this backend kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Jira => "jira",
            Self::Github => "github",
            Self::Asana => "asana",
            Self::Linear => "linear",
            Self::Clickup => "clickup",
        }
    }

    /// Parse a wire identifier, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "jira" => Some(Self::Jira),
            "github" => Some(Self::Github),
            "asana" => Some(Self::Asana),
            "linear" => Some(Self::Linear),
            "clickup" => Some(Self::Clickup),
            _ => None,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Enum domains ────────────────────────────────────────────────────────

/// Normalized work-item status across all backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemStatus {
    /// Not started.
    Todo,
    /// Actively being worked on.
    InProgress,
    /// Blocked on something external.
    Blocked,
    /// Awaiting review.
    InReview,
    /// Completed.
    Done,
    /// Abandoned without completion.
    Cancelled,
}

impl WorkItemStatus {
    /// Wire identifier for this status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::InReview => "in_review",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse a wire identifier.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "todo" => Some(Self::Todo),
            "in_progress" => Some(Self::InProgress),
            "blocked" => Some(Self::Blocked),
            "in_review" => Some(Self::InReview),
            "done" => Some(Self::Done),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Whether this status is terminal (the item is closed).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Cancelled)
    }
}

impl fmt::Display for WorkItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized work-item priority across all backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemPriority {
    /// Drop everything.
    Critical,
    /// High priority.
    High,
    /// Default priority.
    Medium,
    /// Low priority.
    Low,
    /// Explicitly unprioritized.
    None,
}

impl WorkItemPriority {
    /// Wire identifier for this priority.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::None => "none",
        }
    }

    /// Parse a wire identifier.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "critical" => Some(Self::Critical),
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            "none" => Some(Self::None),
            _ => Option::None,
        }
    }
}

impl fmt::Display for WorkItemPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized work-item type across all backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemType {
    /// Large container of work.
    Epic,
    /// User story.
    Story,
    /// Generic unit of work.
    Task,
    /// Defect.
    Bug,
    /// Child of another item.
    Subtask,
    /// Feature request.
    Feature,
}

impl WorkItemType {
    /// Wire identifier for this type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Epic => "epic",
            Self::Story => "story",
            Self::Task => "task",
            Self::Bug => "bug",
            Self::Subtask => "subtask",
            Self::Feature => "feature",
        }
    }

    /// Parse a wire identifier.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "epic" => Some(Self::Epic),
            "story" => Some(Self::Story),
            "task" => Some(Self::Task),
            "bug" => Some(Self::Bug),
            "subtask" => Some(Self::Subtask),
            "feature" => Some(Self::Feature),
            _ => None,
        }
    }
}

impl fmt::Display for WorkItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Records ─────────────────────────────────────────────────────────────

/// Backend-agnostic view of an issue / task / ticket.
///
/// Identity is `(instance_id, source_id)`. `source_key` is the
/// human-readable handle (`PROJ-123`, `owner/repo#42`, a task gid, …).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WorkItem {
    /// Backend-native identifier.
    pub source_id: String,
    /// Human-readable key in the backend's vocabulary.
    pub source_key: String,
    /// Which backend this item came from.
    pub source_kind: BackendKind,
    /// Owning tenant.
    pub tenant_id: Uuid,
    /// Backend instance the item belongs to.
    pub instance_id: Uuid,
    /// Title / summary.
    pub title: String,
    /// Plain-text description, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Normalized status.
    pub status: WorkItemStatus,
    /// Normalized priority.
    pub priority: WorkItemPriority,
    /// Normalized type.
    #[serde(rename = "type")]
    pub item_type: WorkItemType,
    /// Parent item in the backend's vocabulary, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Project / repository / list identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Assignee in the backend's vocabulary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<String>,
    /// Reporter / creator in the backend's vocabulary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reporter_id: Option<String>,
    /// Creation time at the backend.
    pub created_at: DateTime<Utc>,
    /// Last update time at the backend.
    pub updated_at: DateTime<Utc>,
    /// Completion time; non-null only for terminal statuses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    /// Browser URL for the item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// The full backend payload this record was normalized from.
    pub raw: serde_json::Value,
    /// Free-form backend-specific fields (labels, custom fields, …).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_fields: BTreeMap<String, serde_json::Value>,
}

/// Normalized comment on a work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Comment {
    /// Backend-native comment identifier.
    pub source_id: String,
    /// Work item the comment belongs to.
    pub work_item_id: String,
    /// Author in the backend's vocabulary.
    pub author_id: String,
    /// Comment body.
    pub body: String,
    /// Creation time at the backend.
    pub created_at: DateTime<Utc>,
    /// Last update time at the backend.
    pub updated_at: DateTime<Utc>,
    /// The full backend payload.
    pub raw: serde_json::Value,
}

/// Normalized status transition of a work item.
///
/// Derived from the upstream changelog where the backend exposes one,
/// or synthesized from completion events where it does not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Transition {
    /// Work item the transition belongs to.
    pub work_item_id: String,
    /// Status before the transition.
    pub from_status: WorkItemStatus,
    /// Status after the transition.
    pub to_status: WorkItemStatus,
    /// Actor in the backend's vocabulary.
    pub actor_id: String,
    /// When the transition happened at the backend.
    pub timestamp: DateTime<Utc>,
    /// The full backend payload.
    pub raw: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_wire_names_round_trip() {
        for kind in BackendKind::ALL {
            assert_eq!(BackendKind::parse(kind.as_str()), Some(kind));
        }
        for status in [
            WorkItemStatus::Todo,
            WorkItemStatus::InProgress,
            WorkItemStatus::Blocked,
            WorkItemStatus::InReview,
            WorkItemStatus::Done,
            WorkItemStatus::Cancelled,
        ] {
            assert_eq!(WorkItemStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn serde_names_match_as_str() {
        let json = serde_json::to_value(WorkItemStatus::InReview).unwrap();
        assert_eq!(json, serde_json::json!("in_review"));
        let json = serde_json::to_value(WorkItemPriority::None).unwrap();
        assert_eq!(json, serde_json::json!("none"));
        let json = serde_json::to_value(BackendKind::Clickup).unwrap();
        assert_eq!(json, serde_json::json!("clickup"));
    }

    #[test]
    fn work_item_type_field_serializes_as_type() {
        let item = WorkItem {
            source_id: "1".into(),
            source_key: "DEMO-1".into(),
            source_kind: BackendKind::Jira,
            tenant_id: Uuid::nil(),
            instance_id: Uuid::nil(),
            title: "t".into(),
            description: None,
            status: WorkItemStatus::Todo,
            priority: WorkItemPriority::Medium,
            item_type: WorkItemType::Task,
            parent_id: None,
            project_id: None,
            assignee_id: None,
            reporter_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            closed_at: None,
            url: None,
            raw: serde_json::json!({}),
            custom_fields: BTreeMap::new(),
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], serde_json::json!("task"));
        assert!(json.get("item_type").is_none());
    }

    #[test]
    fn terminal_statuses() {
        assert!(WorkItemStatus::Done.is_terminal());
        assert!(WorkItemStatus::Cancelled.is_terminal());
        assert!(!WorkItemStatus::InProgress.is_terminal());
    }
}
