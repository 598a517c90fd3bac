// SPDX-License-Identifier: MIT OR Apache-2.0
//! ClickUp adapter (REST).
//!
//! Auth is the raw API token. Priority is an integer 1–4 with 1 =
//! critical. Status identifiers vary per list, so transitioning by name
//! is best-effort. Dates travel as unix milliseconds.

use crate::http::{build_client, malformed_payload, parse_unix_millis, secret_header, send_json};
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

const DEFAULT_BASE_URL: &str = "https://api.clickup.com/api/v2";

const STATUS_MAP: &[(&str, WorkItemStatus)] = &[
    ("to do", WorkItemStatus::Todo),
    ("open", WorkItemStatus::Todo),
    ("in progress", WorkItemStatus::InProgress),
    ("blocked", WorkItemStatus::Blocked),
    ("review", WorkItemStatus::InReview),
    ("closed", WorkItemStatus::Done),
    ("complete", WorkItemStatus::Done),
    ("cancelled", WorkItemStatus::Cancelled),
];

const PRIORITY_MAP: &[(&str, WorkItemPriority)] = &[
    ("urgent", WorkItemPriority::Critical),
    ("high", WorkItemPriority::High),
    ("normal", WorkItemPriority::Medium),
    ("low", WorkItemPriority::Low),
];

const TYPE_MAP: &[(&str, WorkItemType)] = &[
    ("epic", WorkItemType::Epic),
    ("story", WorkItemType::Story),
    ("task", WorkItemType::Task),
    ("bug", WorkItemType::Bug),
    ("feature", WorkItemType::Feature),
];

/// Raise a normalized priority into ClickUp's 1–4 scale (1 = critical).
fn priority_to_int(priority: WorkItemPriority) -> i64 {
    match priority {
        WorkItemPriority::Critical => 1,
        WorkItemPriority::High => 2,
        WorkItemPriority::Medium | WorkItemPriority::None => 3,
        WorkItemPriority::Low => 4,
    }
}

/// Adapter for ClickUp.
pub struct ClickupAdapter {
    instance_id: Uuid,
    tenant_id: Uuid,
    base_url: String,
    client: reqwest::Client,
}

impl ClickupAdapter {
    /// Build an adapter authenticated with a ClickUp API token.
    ///
    /// # Errors
    ///
    /// `validation_error` when the credential material is not a raw
    /// token.
    pub fn new(
        instance_id: Uuid,
        tenant_id: Uuid,
        base_url: &str,
        auth: &AuthMaterial,
    ) -> GatewayResult<Self> {
        let AuthMaterial::ApiToken { token } = auth else {
            return Err(GatewayError::validation(
                "clickup requires an api_token credential",
            ));
        };
        let mut headers = HeaderMap::new();
        // ClickUp takes the token verbatim.
        headers.insert(AUTHORIZATION, secret_header(token)?);
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

    fn normalize_task(&self, task: &Value, project_id: &str) -> GatewayResult<WorkItem> {
        let id = task["id"]
            .as_str()
            .ok_or_else(|| malformed_payload("task has no id"))?;

        let tags: Vec<String> = task["tags"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|tag| tag["name"].as_str())
            .map(str::to_lowercase)
            .collect();
        let item_type = tags
            .iter()
            .find_map(|tag| {
                TYPE_MAP
                    .iter()
                    .find(|(name, _)| name == tag)
                    .map(|(_, t)| *t)
            })
            .unwrap_or(WorkItemType::Task);

        let priority = if task["priority"].is_object() {
            self.normalize_priority(task["priority"]["priority"].as_str().unwrap_or("normal"))
        } else {
            WorkItemPriority::Medium
        };

        let closed_at = if task["date_closed"].is_null() {
            None
        } else {
            Some(parse_unix_millis(&task["date_closed"])?)
        };

        let assignee_id = task["assignees"][0]["id"]
            .as_i64()
            .map(|id| id.to_string())
            .or_else(|| task["assignees"][0]["id"].as_str().map(str::to_string));

        Ok(WorkItem {
            source_id: id.to_string(),
            source_key: task["custom_id"]
                .as_str()
                .filter(|key| !key.is_empty())
                .unwrap_or(id)
                .to_string(),
            source_kind: BackendKind::Clickup,
            tenant_id: self.tenant_id,
            instance_id: self.instance_id,
            title: task["name"].as_str().unwrap_or_default().to_string(),
            description: task["description"].as_str().map(str::to_string),
            status: self.normalize_status(task["status"]["status"].as_str().unwrap_or_default()),
            priority,
            item_type,
            parent_id: task["parent"].as_str().map(str::to_string),
            project_id: Some(project_id.to_string()),
            assignee_id,
            reporter_id: task["creator"]["id"]
                .as_i64()
                .map(|id| id.to_string())
                .or_else(|| task["creator"]["id"].as_str().map(str::to_string)),
            created_at: parse_unix_millis(&task["date_created"])?,
            updated_at: parse_unix_millis(&task["date_updated"])?,
            closed_at,
            url: task["url"].as_str().map(str::to_string),
            raw: task.clone(),
            custom_fields: BTreeMap::from([
                (
                    "tags".to_string(),
                    Value::Array(tags.iter().map(|t| Value::String(t.clone())).collect()),
                ),
                ("time_estimate".to_string(), task["time_estimate"].clone()),
                ("time_spent".to_string(), task["time_spent"].clone()),
            ]),
        })
    }

    fn normalize_comment(&self, comment: &Value, work_item_id: &str) -> GatewayResult<Comment> {
        let date = parse_unix_millis(&comment["date"])?;
        Ok(Comment {
            source_id: comment["id"]
                .as_str()
                .map(str::to_string)
                .or_else(|| comment["id"].as_i64().map(|id| id.to_string()))
                .ok_or_else(|| malformed_payload("comment has no id"))?,
            work_item_id: work_item_id.to_string(),
            author_id: comment["user"]["id"]
                .as_i64()
                .map(|id| id.to_string())
                .unwrap_or_default(),
            body: comment["comment_text"].as_str().unwrap_or_default().to_string(),
            created_at: date,
            updated_at: date,
            raw: comment.clone(),
        })
    }
}

#[async_trait]
impl SourceAdapter for ClickupAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Clickup
    }

    fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    async fn test_connection(&self) -> bool {
        match self.client.get(self.url("/user")).send().await {
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
                "project_id (clickup list id) is required",
            ));
        };

        let mut request = self
            .client
            .get(self.url(&format!("/list/{project_id}/task")))
            .query(&[("archived", "false"), ("page", "0")]);
        if let Some(since) = updated_since {
            request = request.query(&[("date_updated_gt", since.timestamp_millis().to_string())]);
        }

        let body = send_json(request).await?;
        body["tasks"]
            .as_array()
            .into_iter()
            .flatten()
            .take(limit)
            .map(|task| self.normalize_task(task, project_id))
            .collect()
    }

    async fn fetch_work_item(&self, work_item_id: &str) -> GatewayResult<WorkItem> {
        let task = send_json(self.client.get(self.url(&format!("/task/{work_item_id}")))).await?;
        let list_id = task["list"]["id"].as_str().unwrap_or_default().to_string();
        self.normalize_task(&task, &list_id)
    }

    async fn create_work_item(&self, new: &NewWorkItem) -> GatewayResult<WorkItem> {
        let mut payload = json!({
            "name": new.title,
            "description": new.description.clone().unwrap_or_default(),
            "priority": priority_to_int(new.priority),
        });
        if let Some(assignee) = &new.assignee_id {
            payload["assignees"] = json!([assignee]);
        }

        let mut tags = vec![self.outbound_type(new.item_type)];
        if let Some(extra) = new.extras.get("tags").and_then(Value::as_array) {
            tags.extend(extra.iter().filter_map(Value::as_str).map(str::to_string));
        }
        payload["tags"] = json!(tags);

        let created = send_json(
            self.client
                .post(self.url(&format!("/list/{}/task", new.project_id)))
                .json(&payload),
        )
        .await?;
        let id = created["id"]
            .as_str()
            .ok_or_else(|| malformed_payload("create response has no id"))?;
        self.fetch_work_item(id).await
    }

    async fn update_work_item(
        &self,
        work_item_id: &str,
        fields: &Map<String, Value>,
    ) -> GatewayResult<WorkItem> {
        send_json(
            self.client
                .put(self.url(&format!("/task/{work_item_id}")))
                .json(fields),
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
        // Status ids vary per list; updating by name is best-effort.
        let status_name = self.outbound_status(to_status);
        send_json(
            self.client
                .put(self.url(&format!("/task/{work_item_id}")))
                .json(&json!({ "status": status_name })),
        )
        .await?;

        if let Some(comment) = comment {
            self.add_comment(work_item_id, comment).await?;
        }
        self.fetch_work_item(work_item_id).await
    }

    async fn add_comment(&self, work_item_id: &str, body: &str) -> GatewayResult<Comment> {
        let comment = send_json(
            self.client
                .post(self.url(&format!("/task/{work_item_id}/comment")))
                .json(&json!({ "comment_text": body })),
        )
        .await?;
        self.normalize_comment(&comment, work_item_id)
    }

    async fn fetch_comments(&self, work_item_id: &str) -> GatewayResult<Vec<Comment>> {
        let body = send_json(
            self.client
                .get(self.url(&format!("/task/{work_item_id}/comment"))),
        )
        .await?;
        body["comments"]
            .as_array()
            .into_iter()
            .flatten()
            .map(|comment| self.normalize_comment(comment, work_item_id))
            .collect()
    }

    async fn fetch_transitions(&self, _work_item_id: &str) -> GatewayResult<Vec<Transition>> {
        // ClickUp exposes no status history through the public API.
        Ok(Vec::new())
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
            WorkItemStatus::Todo => "to do",
            WorkItemStatus::InProgress => "in progress",
            WorkItemStatus::Blocked => "blocked",
            WorkItemStatus::InReview => "review",
            WorkItemStatus::Done => "complete",
            WorkItemStatus::Cancelled => "cancelled",
        }
        .to_string()
    }

    fn outbound_priority(&self, priority: WorkItemPriority) -> String {
        priority_to_int(priority).to_string()
    }

    fn outbound_type(&self, item_type: WorkItemType) -> String {
        match item_type {
            // ClickUp has no subtask tag.
            WorkItemType::Subtask => "task".to_string(),
            other => other.as_str().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> ClickupAdapter {
        ClickupAdapter::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "",
            &AuthMaterial::ApiToken { token: "tok".into() },
        )
        .unwrap()
    }

    #[test]
    fn one_is_critical() {
        assert_eq!(priority_to_int(WorkItemPriority::Critical), 1);
        assert_eq!(priority_to_int(WorkItemPriority::Low), 4);
        let adapter = adapter();
        assert_eq!(adapter.normalize_priority("urgent"), WorkItemPriority::Critical);
    }

    #[test]
    fn status_round_trip_holds() {
        let adapter = adapter();
        for status in [
            WorkItemStatus::Todo,
            WorkItemStatus::InProgress,
            WorkItemStatus::Blocked,
            WorkItemStatus::InReview,
            WorkItemStatus::Done,
            WorkItemStatus::Cancelled,
        ] {
            assert_eq!(
                adapter.normalize_status(&adapter.outbound_status(status)),
                status
            );
        }
    }

    #[test]
    fn normalizes_unix_millisecond_dates() {
        let adapter = adapter();
        let task = json!({
            "id": "abc",
            "name": "t",
            "status": { "status": "in progress" },
            "date_created": "1700000000000",
            "date_updated": 1700000100000_i64,
            "date_closed": null,
        });
        let item = adapter.normalize_task(&task, "list-1").unwrap();
        assert_eq!(item.created_at.timestamp(), 1_700_000_000);
        assert_eq!(item.updated_at.timestamp(), 1_700_000_100);
        assert_eq!(item.status, WorkItemStatus::InProgress);
        assert!(item.closed_at.is_none());
    }
}
