// SPDX-License-Identifier: MIT OR Apache-2.0
//! Linear adapter (GraphQL).
//!
//! Auth is the raw API key, no `Bearer` prefix. Priority is an integer
//! 0–4 (0 = none, 4 = critical) in both directions. The public API does
//! not expose transition history, so `fetch_transitions` returns empty.

use crate::http::{malformed_payload, build_client, secret_header, send_json};
use crate::{NewWorkItem, SourceAdapter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use tg_core::{
    AuthMaterial, BackendKind, Comment, GatewayError, GatewayResult, Transition, WorkItem,
    WorkItemPriority, WorkItemStatus, WorkItemType,
};
use uuid::Uuid;

const DEFAULT_BASE_URL: &str = "https://api.linear.app/graphql";

const ISSUE_FIELDS: &str = "
    id
    identifier
    title
    description
    priority
    state { name type }
    assignee { id name }
    creator { id name }
    project { id name }
    parent { id }
    createdAt
    updatedAt
    completedAt
    url
    labels { nodes { name } }
";

const STATUS_MAP: &[(&str, WorkItemStatus)] = &[
    ("backlog", WorkItemStatus::Todo),
    ("unstarted", WorkItemStatus::Todo),
    ("started", WorkItemStatus::InProgress),
    ("in progress", WorkItemStatus::InProgress),
    ("blocked", WorkItemStatus::Blocked),
    ("in review", WorkItemStatus::InReview),
    ("done", WorkItemStatus::Done),
    ("completed", WorkItemStatus::Done),
    ("canceled", WorkItemStatus::Cancelled),
    ("cancelled", WorkItemStatus::Cancelled),
];

const PRIORITY_MAP: &[(&str, WorkItemPriority)] = &[
    ("urgent", WorkItemPriority::Critical),
    ("high", WorkItemPriority::High),
    ("medium", WorkItemPriority::Medium),
    ("normal", WorkItemPriority::Medium),
    ("low", WorkItemPriority::Low),
    ("no priority", WorkItemPriority::None),
];

const TYPE_MAP: &[(&str, WorkItemType)] = &[
    ("epic", WorkItemType::Epic),
    ("story", WorkItemType::Story),
    ("task", WorkItemType::Task),
    ("bug", WorkItemType::Bug),
    ("feature", WorkItemType::Feature),
];

/// Raise a normalized priority into Linear's 0–4 integer scale.
fn priority_to_int(priority: WorkItemPriority) -> i64 {
    match priority {
        WorkItemPriority::None => 0,
        WorkItemPriority::Low => 1,
        WorkItemPriority::Medium => 2,
        WorkItemPriority::High => 3,
        WorkItemPriority::Critical => 4,
    }
}

/// Lower Linear's 0–4 integer scale into the normalized domain.
fn priority_from_int(value: i64) -> WorkItemPriority {
    match value {
        0 => WorkItemPriority::None,
        1 => WorkItemPriority::Low,
        3 => WorkItemPriority::High,
        4 => WorkItemPriority::Critical,
        _ => WorkItemPriority::Medium,
    }
}

/// Adapter for Linear.
pub struct LinearAdapter {
    instance_id: Uuid,
    tenant_id: Uuid,
    endpoint: String,
    client: reqwest::Client,
}

impl LinearAdapter {
    /// Build an adapter authenticated with a Linear API key.
    ///
    /// # Errors
    ///
    /// `validation_error` when the credential material is not a raw key.
    pub fn new(
        instance_id: Uuid,
        tenant_id: Uuid,
        base_url: &str,
        auth: &AuthMaterial,
    ) -> GatewayResult<Self> {
        let AuthMaterial::ApiToken { token } = auth else {
            return Err(GatewayError::validation(
                "linear requires an api_token credential",
            ));
        };
        let mut headers = HeaderMap::new();
        // Linear takes the key verbatim, without a Bearer prefix.
        headers.insert(AUTHORIZATION, secret_header(token)?);
        headers.insert(CONTENT_TYPE, "application/json".parse().expect("static header"));

        let endpoint = if base_url.is_empty() {
            DEFAULT_BASE_URL.to_string()
        } else {
            base_url.trim_end_matches('/').to_string()
        };
        Ok(Self {
            instance_id,
            tenant_id,
            endpoint,
            client: build_client(headers)?,
        })
    }

    /// Run one GraphQL operation and unwrap its `data` payload.
    async fn graphql(&self, query: &str, variables: Value) -> GatewayResult<Value> {
        let body = send_json(
            self.client
                .post(self.endpoint.as_str())
                .json(&json!({ "query": query, "variables": variables })),
        )
        .await?;
        if let Some(errors) = body["errors"].as_array() {
            if !errors.is_empty() {
                let message = errors[0]["message"].as_str().unwrap_or("graphql error");
                return Err(GatewayError::upstream_4xx(400, message));
            }
        }
        Ok(body["data"].clone())
    }

    fn normalize_issue(&self, issue: &Value) -> GatewayResult<WorkItem> {
        let id = issue["id"]
            .as_str()
            .ok_or_else(|| malformed_payload("issue has no id"))?;
        let labels: Vec<String> = issue["labels"]["nodes"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|label| label["name"].as_str())
            .map(str::to_lowercase)
            .collect();

        let item_type = labels
            .iter()
            .find_map(|label| {
                TYPE_MAP
                    .iter()
                    .find(|(name, _)| name == label)
                    .map(|(_, t)| *t)
            })
            .unwrap_or(WorkItemType::Task);

        let closed_at = match issue["completedAt"].as_str() {
            Some(raw) => Some(crate::http::parse_backend_ts(raw)?),
            None => None,
        };

        Ok(WorkItem {
            source_id: id.to_string(),
            source_key: issue["identifier"].as_str().unwrap_or(id).to_string(),
            source_kind: BackendKind::Linear,
            tenant_id: self.tenant_id,
            instance_id: self.instance_id,
            title: issue["title"].as_str().unwrap_or_default().to_string(),
            description: issue["description"].as_str().map(str::to_string),
            status: self.normalize_status(issue["state"]["name"].as_str().unwrap_or_default()),
            priority: priority_from_int(issue["priority"].as_i64().unwrap_or(2)),
            item_type,
            parent_id: issue["parent"]["id"].as_str().map(str::to_string),
            project_id: issue["project"]["id"].as_str().map(str::to_string),
            assignee_id: issue["assignee"]["id"].as_str().map(str::to_string),
            reporter_id: issue["creator"]["id"].as_str().map(str::to_string),
            created_at: crate::http::parse_backend_ts(
                issue["createdAt"].as_str().unwrap_or_default(),
            )?,
            updated_at: crate::http::parse_backend_ts(
                issue["updatedAt"].as_str().unwrap_or_default(),
            )?,
            closed_at,
            url: issue["url"].as_str().map(str::to_string),
            raw: issue.clone(),
            custom_fields: BTreeMap::from([(
                "labels".to_string(),
                Value::Array(labels.iter().map(|l| Value::String(l.clone())).collect()),
            )]),
        })
    }

    fn normalize_comment(&self, comment: &Value, work_item_id: &str) -> GatewayResult<Comment> {
        let created_at =
            crate::http::parse_backend_ts(comment["createdAt"].as_str().unwrap_or_default())?;
        Ok(Comment {
            source_id: comment["id"].as_str().unwrap_or_default().to_string(),
            work_item_id: work_item_id.to_string(),
            author_id: comment["user"]["id"].as_str().unwrap_or_default().to_string(),
            body: comment["body"].as_str().unwrap_or_default().to_string(),
            created_at,
            updated_at: created_at,
            raw: comment.clone(),
        })
    }
}

#[async_trait]
impl SourceAdapter for LinearAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Linear
    }

    fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    async fn test_connection(&self) -> bool {
        let result = self
            .graphql("query { viewer { id name } }", json!({}))
            .await;
        matches!(result, Ok(data) if data["viewer"]["id"].is_string())
    }

    async fn fetch_work_items(
        &self,
        project_id: Option<&str>,
        updated_since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> GatewayResult<Vec<WorkItem>> {
        let mut filter = Map::new();
        if let Some(project) = project_id {
            filter.insert("project".into(), json!({ "id": { "eq": project } }));
        }
        if let Some(since) = updated_since {
            filter.insert("updatedAt".into(), json!({ "gt": since.to_rfc3339() }));
        }

        let query = format!(
            "query($first: Int!, $filter: IssueFilter) {{
                 issues(first: $first, filter: $filter) {{ nodes {{ {ISSUE_FIELDS} }} }}
             }}"
        );
        let data = self
            .graphql(
                &query,
                json!({ "first": limit as i64, "filter": Value::Object(filter) }),
            )
            .await?;

        data["issues"]["nodes"]
            .as_array()
            .into_iter()
            .flatten()
            .map(|issue| self.normalize_issue(issue))
            .collect()
    }

    async fn fetch_work_item(&self, work_item_id: &str) -> GatewayResult<WorkItem> {
        let query = format!(
            "query($id: String!) {{ issue(id: $id) {{ {ISSUE_FIELDS} }} }}"
        );
        let data = self.graphql(&query, json!({ "id": work_item_id })).await?;
        if data["issue"].is_null() {
            return Err(GatewayError::not_found(format!(
                "issue {work_item_id} not found"
            )));
        }
        self.normalize_issue(&data["issue"])
    }

    async fn create_work_item(&self, new: &NewWorkItem) -> GatewayResult<WorkItem> {
        let mut input = json!({
            "title": new.title,
            "description": new.description.clone().unwrap_or_default(),
            "projectId": new.project_id,
            "priority": priority_to_int(new.priority),
        });
        if let Some(assignee) = &new.assignee_id {
            input["assigneeId"] = json!(assignee);
        }

        let data = self
            .graphql(
                "mutation($input: IssueCreateInput!) {
                     issueCreate(input: $input) { success issue { id identifier } }
                 }",
                json!({ "input": input }),
            )
            .await?;

        let create = &data["issueCreate"];
        if !create["success"].as_bool().unwrap_or(false) {
            return Err(GatewayError::upstream_4xx(400, "issueCreate returned success=false"));
        }
        let id = create["issue"]["id"]
            .as_str()
            .ok_or_else(|| malformed_payload("issueCreate response has no id"))?;
        self.fetch_work_item(id).await
    }

    async fn update_work_item(
        &self,
        work_item_id: &str,
        fields: &Map<String, Value>,
    ) -> GatewayResult<WorkItem> {
        self.graphql(
            "mutation($id: String!, $input: IssueUpdateInput!) {
                 issueUpdate(id: $id, input: $input) { success issue { id } }
             }",
            json!({ "id": work_item_id, "input": fields }),
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
        // State ids vary per team; completion mapping is best-effort.
        let state_id = if to_status == WorkItemStatus::Done {
            "completed"
        } else {
            "in_progress"
        };
        self.graphql(
            "mutation($id: String!, $input: IssueUpdateInput!) {
                 issueUpdate(id: $id, input: $input) { success }
             }",
            json!({ "id": work_item_id, "input": { "stateId": state_id } }),
        )
        .await?;

        if let Some(comment) = comment {
            self.add_comment(work_item_id, comment).await?;
        }
        self.fetch_work_item(work_item_id).await
    }

    async fn add_comment(&self, work_item_id: &str, body: &str) -> GatewayResult<Comment> {
        let data = self
            .graphql(
                "mutation($input: CommentCreateInput!) {
                     commentCreate(input: $input) {
                         success
                         comment { id body createdAt user { id } }
                     }
                 }",
                json!({ "input": { "issueId": work_item_id, "body": body } }),
            )
            .await?;
        self.normalize_comment(&data["commentCreate"]["comment"], work_item_id)
    }

    async fn fetch_comments(&self, work_item_id: &str) -> GatewayResult<Vec<Comment>> {
        let data = self
            .graphql(
                "query($id: String!) {
                     issue(id: $id) {
                         comments { nodes { id body createdAt user { id } } }
                     }
                 }",
                json!({ "id": work_item_id }),
            )
            .await?;
        data["issue"]["comments"]["nodes"]
            .as_array()
            .into_iter()
            .flatten()
            .map(|comment| self.normalize_comment(comment, work_item_id))
            .collect()
    }

    async fn fetch_transitions(&self, _work_item_id: &str) -> GatewayResult<Vec<Transition>> {
        // The public API does not expose status history.
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
            WorkItemStatus::Todo => "backlog",
            WorkItemStatus::InProgress => "started",
            WorkItemStatus::Blocked => "blocked",
            WorkItemStatus::InReview => "in review",
            WorkItemStatus::Done => "completed",
            WorkItemStatus::Cancelled => "canceled",
        }
        .to_string()
    }

    fn outbound_priority(&self, priority: WorkItemPriority) -> String {
        priority_to_int(priority).to_string()
    }

    fn outbound_type(&self, item_type: WorkItemType) -> String {
        match item_type {
            // Linear has no subtask label.
            WorkItemType::Subtask => "task".to_string(),
            other => other.as_str().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_integers_round_trip() {
        for (int, priority) in [
            (0, WorkItemPriority::None),
            (1, WorkItemPriority::Low),
            (2, WorkItemPriority::Medium),
            (3, WorkItemPriority::High),
            (4, WorkItemPriority::Critical),
        ] {
            assert_eq!(priority_from_int(int), priority);
            assert_eq!(priority_to_int(priority), int);
        }
        // Out-of-range values land on medium.
        assert_eq!(priority_from_int(99), WorkItemPriority::Medium);
    }

    #[test]
    fn status_round_trip_holds() {
        let adapter = LinearAdapter::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "",
            &AuthMaterial::ApiToken { token: "key".into() },
        )
        .unwrap();
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
}
