// SPDX-License-Identifier: MIT OR Apache-2.0
//! Asana adapter (REST).
//!
//! Tasks stand in for work items. Completion is a boolean, so the
//! outbound transition collapses `done` to `completed: true` and every
//! other status to `completed: false`. Comments are stories of type
//! `comment`; transitions are synthesized from system stories whose text
//! mentions completion. Priority and type come from tags.

use crate::http::{build_client, parse_backend_ts, secret_header, send_json};
use crate::{NewWorkItem, SourceAdapter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use tg_core::{
    AuthMaterial, BackendKind, Comment, GatewayError, GatewayResult, Transition, WorkItem,
    WorkItemPriority, WorkItemStatus, WorkItemType,
};
use uuid::Uuid;

const DEFAULT_BASE_URL: &str = "https://app.asana.com/api/1.0";

const TASK_OPT_FIELDS: &str = "name,notes,completed,due_on,assignee,created_at,modified_at,\
                               parent,custom_fields,tags,projects,permalink_url";

const STATUS_MAP: &[(&str, WorkItemStatus)] = &[
    ("incomplete", WorkItemStatus::Todo),
    ("in_progress", WorkItemStatus::InProgress),
    ("complete", WorkItemStatus::Done),
];

const PRIORITY_MAP: &[(&str, WorkItemPriority)] = &[
    ("critical", WorkItemPriority::Critical),
    ("high", WorkItemPriority::High),
    ("medium", WorkItemPriority::Medium),
    ("low", WorkItemPriority::Low),
];

const TYPE_MAP: &[(&str, WorkItemType)] = &[
    ("epic", WorkItemType::Epic),
    ("story", WorkItemType::Story),
    ("task", WorkItemType::Task),
    ("bug", WorkItemType::Bug),
    ("subtask", WorkItemType::Subtask),
    ("feature", WorkItemType::Feature),
];

/// Adapter for Asana.
#[derive(Debug)]
pub struct AsanaAdapter {
    instance_id: Uuid,
    tenant_id: Uuid,
    base_url: String,
    client: reqwest::Client,
}

impl AsanaAdapter {
    /// Build an adapter authenticated with a personal access token.
    ///
    /// # Errors
    ///
    /// `validation_error` when the credential material is not a bearer
    /// token.
    pub fn new(
        instance_id: Uuid,
        tenant_id: Uuid,
        base_url: &str,
        auth: &AuthMaterial,
    ) -> GatewayResult<Self> {
        let token = match auth {
            AuthMaterial::Oauth { access_token } => access_token,
            AuthMaterial::ApiToken { token } => token,
            AuthMaterial::Basic { .. } => {
                return Err(GatewayError::validation(
                    "asana requires a bearer token credential",
                ));
            }
        };
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, secret_header(&format!("Bearer {token}"))?);
        headers.insert(ACCEPT, "application/json".parse().expect("static header"));

        let base_url = if base_url.is_empty() {
            DEFAULT_BASE_URL.to_string()
        } else {
            base_url.trim_end_matches('/').to_string()
        };
        Ok(Self {
            instance_id,
            tenant_id,
            base_url,
            client: build_client(headers)?,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn fetch_task_details(&self, task_gid: &str) -> GatewayResult<Value> {
        let body = send_json(
            self.client
                .get(self.url(&format!("/tasks/{task_gid}")))
                .query(&[("opt_fields", TASK_OPT_FIELDS)]),
        )
        .await?;
        Ok(body["data"].clone())
    }

    fn normalize_task(&self, task: &Value, project_id: &str) -> GatewayResult<WorkItem> {
        let gid = task["gid"]
            .as_str()
            .ok_or_else(|| crate::http::malformed_payload("task has no gid"))?;

        let status = if task["completed"].as_bool().unwrap_or(false) {
            WorkItemStatus::Done
        } else {
            WorkItemStatus::Todo
        };

        let mut priority = WorkItemPriority::Medium;
        let mut item_type = WorkItemType::Task;
        for tag in task["tags"].as_array().into_iter().flatten() {
            let name = tag["name"].as_str().unwrap_or_default().to_lowercase();
            if let Some((_, p)) = PRIORITY_MAP.iter().find(|(n, _)| *n == name) {
                priority = *p;
            }
            if let Some((_, t)) = TYPE_MAP.iter().find(|(n, _)| *n == name) {
                item_type = *t;
            }
        }

        let custom_fields: BTreeMap<String, Value> = task["custom_fields"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|field| {
                field["name"]
                    .as_str()
                    .map(|name| (name.to_string(), field["display_value"].clone()))
            })
            .collect();

        Ok(WorkItem {
            source_id: gid.to_string(),
            // Asana has no human-readable keys; the gid is the handle.
            source_key: gid.to_string(),
            source_kind: BackendKind::Asana,
            tenant_id: self.tenant_id,
            instance_id: self.instance_id,
            title: task["name"].as_str().unwrap_or_default().to_string(),
            description: task["notes"].as_str().map(str::to_string),
            status,
            priority,
            item_type,
            parent_id: task["parent"]["gid"].as_str().map(str::to_string),
            project_id: Some(project_id.to_string()),
            assignee_id: task["assignee"]["gid"].as_str().map(str::to_string),
            // Asana has no reporter field.
            reporter_id: None,
            created_at: parse_backend_ts(task["created_at"].as_str().unwrap_or_default())?,
            updated_at: parse_backend_ts(task["modified_at"].as_str().unwrap_or_default())?,
            // Asana does not expose a completion timestamp.
            closed_at: None,
            url: task["permalink_url"].as_str().map(str::to_string),
            raw: task.clone(),
            custom_fields,
        })
    }

    fn normalize_story(&self, story: &Value, work_item_id: &str) -> GatewayResult<Comment> {
        let created_at = parse_backend_ts(story["created_at"].as_str().unwrap_or_default())?;
        Ok(Comment {
            source_id: story["gid"].as_str().unwrap_or_default().to_string(),
            work_item_id: work_item_id.to_string(),
            author_id: story["created_by"]["gid"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            body: story["text"].as_str().unwrap_or_default().to_string(),
            created_at,
            // Asana does not track story updates.
            updated_at: created_at,
            raw: story.clone(),
        })
    }
}

#[async_trait]
impl SourceAdapter for AsanaAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Asana
    }

    fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    async fn test_connection(&self) -> bool {
        match self.client.get(self.url("/users/me")).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn fetch_work_items(
        &self,
        project_id: Option<&str>,
        updated_since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> GatewayResult<Vec<WorkItem>> {
        let Some(project_id) = project_id else {
            return Err(GatewayError::validation(
                "project_id (asana project gid) is required",
            ));
        };

        let mut request = self.client.get(self.url("/tasks")).query(&[
            ("project", project_id),
            ("limit", &limit.min(100).to_string()),
            ("opt_fields", TASK_OPT_FIELDS),
        ]);
        if let Some(since) = updated_since {
            request = request.query(&[("modified_since", since.to_rfc3339())]);
        }

        let body = send_json(request).await?;
        let mut items = Vec::new();
        for task in body["data"].as_array().into_iter().flatten() {
            let Some(gid) = task["gid"].as_str() else {
                continue;
            };
            let details = self.fetch_task_details(gid).await?;
            items.push(self.normalize_task(&details, project_id)?);
        }
        Ok(items)
    }

    async fn fetch_work_item(&self, work_item_id: &str) -> GatewayResult<WorkItem> {
        let task = self.fetch_task_details(work_item_id).await?;
        let project_id = task["projects"][0]["gid"].as_str().unwrap_or_default().to_string();
        self.normalize_task(&task, &project_id)
    }

    async fn create_work_item(&self, new: &NewWorkItem) -> GatewayResult<WorkItem> {
        let mut data = json!({
            "name": new.title,
            "notes": new.description.clone().unwrap_or_default(),
            "projects": [new.project_id],
        });
        if let Some(assignee) = &new.assignee_id {
            data["assignee"] = json!(assignee);
        }
        for (key, value) in &new.extras {
            data[key.as_str()] = value.clone();
        }

        let created = send_json(
            self.client
                .post(self.url("/tasks"))
                .json(&json!({ "data": data })),
        )
        .await?;
        let gid = created["data"]["gid"]
            .as_str()
            .ok_or_else(|| crate::http::malformed_payload("create response has no gid"))?;
        self.fetch_work_item(gid).await
    }

    async fn update_work_item(
        &self,
        work_item_id: &str,
        fields: &Map<String, Value>,
    ) -> GatewayResult<WorkItem> {
        send_json(
            self.client
                .put(self.url(&format!("/tasks/{work_item_id}")))
                .json(&json!({ "data": fields })),
        )
        .await?;
        self.fetch_work_item(work_item_id).await
    }

    async fn transition_work_item(
        &self,
        work_item_id: &str,
        to_status: WorkItemStatus,
        comment: Option<&str>,
    ) -> GatewayResult<WorkItem> {
        // Asana's workflow is a completion boolean.
        let completed = to_status == WorkItemStatus::Done;
        send_json(
            self.client
                .put(self.url(&format!("/tasks/{work_item_id}")))
                .json(&json!({ "data": { "completed": completed } })),
        )
        .await?;

        if let Some(comment) = comment {
            self.add_comment(work_item_id, comment).await?;
        }
        self.fetch_work_item(work_item_id).await
    }

    async fn add_comment(&self, work_item_id: &str, body: &str) -> GatewayResult<Comment> {
        let story = send_json(
            self.client
                .post(self.url(&format!("/tasks/{work_item_id}/stories")))
                .json(&json!({ "data": { "text": body } })),
        )
        .await?;
        self.normalize_story(&story["data"], work_item_id)
    }

    async fn fetch_comments(&self, work_item_id: &str) -> GatewayResult<Vec<Comment>> {
        let body = send_json(
            self.client
                .get(self.url(&format!("/tasks/{work_item_id}/stories"))),
        )
        .await?;
        body["data"]
            .as_array()
            .into_iter()
            .flatten()
            .filter(|story| story["type"] == "comment")
            .map(|story| self.normalize_story(story, work_item_id))
            .collect()
    }

    async fn fetch_transitions(&self, work_item_id: &str) -> GatewayResult<Vec<Transition>> {
        let body = send_json(
            self.client
                .get(self.url(&format!("/tasks/{work_item_id}/stories"))),
        )
        .await?;

        let mut transitions = Vec::new();
        for story in body["data"].as_array().into_iter().flatten() {
            if story["type"] != "system" {
                continue;
            }
            let text = story["text"].as_str().unwrap_or_default();
            if !text.to_lowercase().contains("completed") {
                continue;
            }
            transitions.push(Transition {
                work_item_id: work_item_id.to_string(),
                from_status: WorkItemStatus::Todo,
                to_status: WorkItemStatus::Done,
                actor_id: story["created_by"]["gid"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
                timestamp: parse_backend_ts(story["created_at"].as_str().unwrap_or_default())?,
                raw: story.clone(),
            });
        }
        Ok(transitions)
    }

    fn normalize_status(&self, raw: &str) -> WorkItemStatus {
        let lowered = raw.to_lowercase();
        STATUS_MAP
            .iter()
            .find(|(name, _)| *name == lowered)
            .map_or(WorkItemStatus::Todo, |(_, status)| *status)
    }

    fn normalize_priority(&self, raw: &str) -> WorkItemPriority {
        let lowered = raw.to_lowercase();
        PRIORITY_MAP
            .iter()
            .find(|(name, _)| *name == lowered)
            .map_or(WorkItemPriority::Medium, |(_, priority)| *priority)
    }

    fn normalize_type(&self, raw: &str) -> WorkItemType {
        let lowered = raw.to_lowercase();
        TYPE_MAP
            .iter()
            .find(|(name, _)| *name == lowered)
            .map_or(WorkItemType::Task, |(_, item_type)| *item_type)
    }

    fn outbound_status(&self, status: WorkItemStatus) -> String {
        match status {
            WorkItemStatus::Done => "complete",
            _ => "incomplete",
        }
        .to_string()
    }

    fn outbound_priority(&self, priority: WorkItemPriority) -> String {
        match priority {
            WorkItemPriority::Critical => "critical",
            WorkItemPriority::High => "high",
            WorkItemPriority::Medium | WorkItemPriority::None => "medium",
            WorkItemPriority::Low => "low",
        }
        .to_string()
    }

    fn outbound_type(&self, item_type: WorkItemType) -> String {
        item_type.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> AsanaAdapter {
        AsanaAdapter::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "",
            &AuthMaterial::Oauth {
                access_token: "pat".into(),
            },
        )
        .unwrap()
    }

    #[test]
    fn completion_boolean_collapses_outbound_statuses() {
        let adapter = adapter();
        assert_eq!(adapter.outbound_status(WorkItemStatus::Done), "complete");
        for status in [
            WorkItemStatus::Todo,
            WorkItemStatus::InProgress,
            WorkItemStatus::Blocked,
            WorkItemStatus::InReview,
            WorkItemStatus::Cancelled,
        ] {
            assert_eq!(adapter.outbound_status(status), "incomplete");
        }
    }

    #[test]
    fn tags_drive_priority_and_type() {
        let adapter = adapter();
        let task = json!({
            "gid": "123",
            "name": "t",
            "completed": false,
            "tags": [{ "name": "Bug" }, { "name": "High" }],
            "created_at": "2024-01-15T10:30:00Z",
            "modified_at": "2024-01-15T10:30:00Z",
        });
        let item = adapter.normalize_task(&task, "p1").unwrap();
        assert_eq!(item.item_type, WorkItemType::Bug);
        assert_eq!(item.priority, WorkItemPriority::High);
        assert_eq!(item.status, WorkItemStatus::Todo);
    }

    #[test]
    fn basic_credentials_are_rejected() {
        let err = AsanaAdapter::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "",
            &AuthMaterial::Basic {
                email: "a@b.c".into(),
                api_token: "t".into(),
            },
        )
        .unwrap_err();
        assert_eq!(err.kind, tg_core::ErrorKind::ValidationError);
    }
}
