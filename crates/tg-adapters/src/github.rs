// SPDX-License-Identifier: MIT OR Apache-2.0
//! GitHub Issues adapter (REST v3).
//!
//! Project ids are `owner/repo`; work-item ids encode as
//! `owner/repo#number`. The issues endpoint also returns pull requests,
//! which are filtered out. GitHub only knows {open, closed}: inbound they
//! map to {todo, done}, outbound every non-`done` status degrades to
//! `open`. Priority and type are read from labels with a fixed map and
//! written back as the canonical label.

use crate::http::{build_client, check_response, classify_send_error, malformed_payload,
    parse_backend_ts, secret_header, send_json};
use crate::{NewWorkItem, SourceAdapter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, USER_AGENT};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use tg_core::{
    AuthMaterial, BackendKind, Comment, GatewayError, GatewayResult, Transition, WorkItem,
    WorkItemPriority, WorkItemStatus, WorkItemType,
};
use uuid::Uuid;

const DEFAULT_BASE_URL: &str = "https://api.github.com";

const PRIORITY_MAP: &[(&str, WorkItemPriority)] = &[
    ("priority: critical", WorkItemPriority::Critical),
    ("priority: high", WorkItemPriority::High),
    ("priority: medium", WorkItemPriority::Medium),
    ("priority: low", WorkItemPriority::Low),
    ("p0", WorkItemPriority::Critical),
    ("p1", WorkItemPriority::High),
    ("p2", WorkItemPriority::Medium),
    ("p3", WorkItemPriority::Low),
];

const TYPE_MAP: &[(&str, WorkItemType)] = &[
    ("bug", WorkItemType::Bug),
    ("enhancement", WorkItemType::Feature),
    ("feature", WorkItemType::Feature),
    ("task", WorkItemType::Task),
    ("story", WorkItemType::Story),
];

/// Adapter for GitHub Issues.
pub struct GithubAdapter {
    instance_id: Uuid,
    tenant_id: Uuid,
    base_url: String,
    client: reqwest::Client,
}

impl GithubAdapter {
    /// Build an adapter authenticated with a personal access token.
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
                "github requires an api_token credential",
            ));
        };
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, secret_header(&format!("token {token}"))?);
        headers.insert(
            ACCEPT,
            "application/vnd.github.v3+json".parse().expect("static header"),
        );
        headers.insert(USER_AGENT, "trackgate".parse().expect("static header"));

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

    /// Split `owner/repo#number` into its parts.
    fn parse_issue_id(work_item_id: &str) -> GatewayResult<(&str, &str)> {
        let (repo, number) = work_item_id.split_once('#').ok_or_else(|| {
            GatewayError::validation(format!(
                "invalid github issue id {work_item_id:?}, expected owner/repo#number"
            ))
        })?;
        if !repo.contains('/') || number.is_empty() {
            return Err(GatewayError::validation(format!(
                "invalid github issue id {work_item_id:?}, expected owner/repo#number"
            )));
        }
        Ok((repo, number))
    }

    fn normalize_issue(&self, issue: &Value, project_id: &str) -> GatewayResult<WorkItem> {
        let number = issue["number"]
            .as_i64()
            .ok_or_else(|| malformed_payload("issue has no number"))?;
        let labels: Vec<String> = issue["labels"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|label| label["name"].as_str())
            .map(str::to_lowercase)
            .collect();

        let priority = labels
            .iter()
            .find_map(|label| {
                PRIORITY_MAP
                    .iter()
                    .find(|(name, _)| name == label)
                    .map(|(_, priority)| *priority)
            })
            .unwrap_or(WorkItemPriority::Medium);
        let item_type = labels
            .iter()
            .find_map(|label| {
                TYPE_MAP
                    .iter()
                    .find(|(name, _)| name == label)
                    .map(|(_, item_type)| *item_type)
            })
            .unwrap_or(WorkItemType::Task);

        let closed_at = match issue["closed_at"].as_str() {
            Some(raw) => Some(parse_backend_ts(raw)?),
            None => None,
        };

        Ok(WorkItem {
            source_id: issue["id"]
                .as_i64()
                .map(|id| id.to_string())
                .ok_or_else(|| malformed_payload("issue has no id"))?,
            source_key: format!("{project_id}#{number}"),
            source_kind: BackendKind::Github,
            tenant_id: self.tenant_id,
            instance_id: self.instance_id,
            title: issue["title"].as_str().unwrap_or_default().to_string(),
            description: issue["body"].as_str().map(str::to_string),
            status: self.normalize_status(issue["state"].as_str().unwrap_or_default()),
            priority,
            item_type,
            // GitHub has no parent issues.
            parent_id: None,
            project_id: Some(project_id.to_string()),
            assignee_id: issue["assignee"]["login"].as_str().map(str::to_string),
            reporter_id: issue["user"]["login"].as_str().map(str::to_string),
            created_at: parse_backend_ts(issue["created_at"].as_str().unwrap_or_default())?,
            updated_at: parse_backend_ts(issue["updated_at"].as_str().unwrap_or_default())?,
            closed_at,
            url: issue["html_url"].as_str().map(str::to_string),
            raw: issue.clone(),
            custom_fields: BTreeMap::from([(
                "labels".to_string(),
                Value::Array(labels.iter().map(|l| Value::String(l.clone())).collect()),
            )]),
        })
    }

    fn normalize_comment(&self, comment: &Value, work_item_id: &str) -> GatewayResult<Comment> {
        Ok(Comment {
            source_id: comment["id"]
                .as_i64()
                .map(|id| id.to_string())
                .ok_or_else(|| malformed_payload("comment has no id"))?,
            work_item_id: work_item_id.to_string(),
            author_id: comment["user"]["login"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            body: comment["body"].as_str().unwrap_or_default().to_string(),
            created_at: parse_backend_ts(comment["created_at"].as_str().unwrap_or_default())?,
            updated_at: parse_backend_ts(comment["updated_at"].as_str().unwrap_or_default())?,
            raw: comment.clone(),
        })
    }
}

#[async_trait]
impl SourceAdapter for GithubAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Github
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
                "project_id (owner/repo) is required for github",
            ));
        };

        let mut request = self
            .client
            .get(self.url(&format!("/repos/{project_id}/issues")))
            .query(&[
                ("state", "all"),
                ("per_page", &limit.min(100).to_string()),
                ("sort", "updated"),
                ("direction", "desc"),
            ]);
        if let Some(since) = updated_since {
            request = request.query(&[("since", since.to_rfc3339())]);
        }

        let body = send_json(request).await?;
        let issues = body
            .as_array()
            .ok_or_else(|| malformed_payload("issue listing is not an array"))?;

        issues
            .iter()
            // The issues endpoint returns pull requests too.
            .filter(|issue| issue.get("pull_request").is_none())
            .map(|issue| self.normalize_issue(issue, project_id))
            .collect()
    }

    async fn fetch_work_item(&self, work_item_id: &str) -> GatewayResult<WorkItem> {
        let (repo, number) = Self::parse_issue_id(work_item_id)?;
        let issue =
            send_json(self.client.get(self.url(&format!("/repos/{repo}/issues/{number}")))).await?;
        self.normalize_issue(&issue, repo)
    }

    async fn create_work_item(&self, new: &NewWorkItem) -> GatewayResult<WorkItem> {
        let mut payload = json!({
            "title": new.title,
            "body": new.description.clone().unwrap_or_default(),
        });

        let mut labels: Vec<String> = Vec::new();
        if new.item_type != WorkItemType::Task {
            labels.push(self.outbound_type(new.item_type));
        }
        if new.priority != WorkItemPriority::Medium {
            labels.push(self.outbound_priority(new.priority));
        }
        if let Some(extra) = new.extras.get("labels").and_then(Value::as_array) {
            labels.extend(extra.iter().filter_map(Value::as_str).map(str::to_string));
        }
        if !labels.is_empty() {
            payload["labels"] = json!(labels);
        }
        if let Some(assignee) = &new.assignee_id {
            payload["assignees"] = json!([assignee]);
        }

        let issue = send_json(
            self.client
                .post(self.url(&format!("/repos/{}/issues", new.project_id)))
                .json(&payload),
        )
        .await?;
        self.normalize_issue(&issue, &new.project_id)
    }

    async fn update_work_item(
        &self,
        work_item_id: &str,
        fields: &Map<String, Value>,
    ) -> GatewayResult<WorkItem> {
        let (repo, number) = Self::parse_issue_id(work_item_id)?;
        let issue = send_json(
            self.client
                .patch(self.url(&format!("/repos/{repo}/issues/{number}")))
                .json(fields),
        )
        .await?;
        self.normalize_issue(&issue, repo)
    }

    async fn transition_work_item(
        &self,
        work_item_id: &str,
        to_status: WorkItemStatus,
        comment: Option<&str>,
    ) -> GatewayResult<WorkItem> {
        let (repo, number) = Self::parse_issue_id(work_item_id)?;
        let state = self.outbound_status(to_status);

        let issue = send_json(
            self.client
                .patch(self.url(&format!("/repos/{repo}/issues/{number}")))
                .json(&json!({ "state": state })),
        )
        .await?;

        if let Some(comment) = comment {
            self.add_comment(work_item_id, comment).await?;
        }
        self.normalize_issue(&issue, repo)
    }

    async fn add_comment(&self, work_item_id: &str, body: &str) -> GatewayResult<Comment> {
        let (repo, number) = Self::parse_issue_id(work_item_id)?;
        let comment = send_json(
            self.client
                .post(self.url(&format!("/repos/{repo}/issues/{number}/comments")))
                .json(&json!({ "body": body })),
        )
        .await?;
        self.normalize_comment(&comment, work_item_id)
    }

    async fn fetch_comments(&self, work_item_id: &str) -> GatewayResult<Vec<Comment>> {
        let (repo, number) = Self::parse_issue_id(work_item_id)?;
        let body = send_json(
            self.client
                .get(self.url(&format!("/repos/{repo}/issues/{number}/comments"))),
        )
        .await?;
        body.as_array()
            .ok_or_else(|| malformed_payload("comment listing is not an array"))?
            .iter()
            .map(|comment| self.normalize_comment(comment, work_item_id))
            .collect()
    }

    async fn fetch_transitions(&self, work_item_id: &str) -> GatewayResult<Vec<Transition>> {
        let (repo, number) = Self::parse_issue_id(work_item_id)?;
        let body = send_json(
            self.client
                .get(self.url(&format!("/repos/{repo}/issues/{number}/timeline")))
                .header(ACCEPT, "application/vnd.github.mockingbird-preview+json"),
        )
        .await?;

        let mut transitions = Vec::new();
        for event in body.as_array().into_iter().flatten() {
            let Some(kind) = event["event"].as_str() else {
                continue;
            };
            if kind != "closed" && kind != "reopened" {
                continue;
            }
            let closed = kind == "closed";
            transitions.push(Transition {
                work_item_id: work_item_id.to_string(),
                from_status: if closed {
                    WorkItemStatus::Todo
                } else {
                    WorkItemStatus::Done
                },
                to_status: if closed {
                    WorkItemStatus::Done
                } else {
                    WorkItemStatus::Todo
                },
                actor_id: event["actor"]["login"].as_str().unwrap_or_default().to_string(),
                timestamp: parse_backend_ts(event["created_at"].as_str().unwrap_or_default())?,
                raw: event.clone(),
            });
        }
        Ok(transitions)
    }

    fn normalize_status(&self, raw: &str) -> WorkItemStatus {
        match raw.to_lowercase().as_str() {
            "closed" => WorkItemStatus::Done,
            _ => WorkItemStatus::Todo,
        }
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
        // Everything except done degrades to open.
        match status {
            WorkItemStatus::Done => "closed",
            _ => "open",
        }
        .to_string()
    }

    fn outbound_priority(&self, priority: WorkItemPriority) -> String {
        match priority {
            WorkItemPriority::Critical => "priority: critical",
            WorkItemPriority::High => "priority: high",
            WorkItemPriority::Medium | WorkItemPriority::None => "priority: medium",
            WorkItemPriority::Low => "priority: low",
        }
        .to_string()
    }

    fn outbound_type(&self, item_type: WorkItemType) -> String {
        match item_type {
            WorkItemType::Bug => "bug",
            WorkItemType::Feature => "enhancement",
            WorkItemType::Story => "story",
            WorkItemType::Task | WorkItemType::Epic | WorkItemType::Subtask => "task",
        }
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> GithubAdapter {
        GithubAdapter::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "",
            &AuthMaterial::ApiToken { token: "pat".into() },
        )
        .unwrap()
    }

    #[test]
    fn issue_id_parsing() {
        let (repo, number) = GithubAdapter::parse_issue_id("octocat/hello#42").unwrap();
        assert_eq!(repo, "octocat/hello");
        assert_eq!(number, "42");
        assert!(GithubAdapter::parse_issue_id("no-separator").is_err());
        assert!(GithubAdapter::parse_issue_id("missing#").is_err());
    }

    #[test]
    fn only_open_and_closed_exist() {
        let adapter = adapter();
        assert_eq!(adapter.normalize_status("open"), WorkItemStatus::Todo);
        assert_eq!(adapter.normalize_status("closed"), WorkItemStatus::Done);
        assert_eq!(adapter.outbound_status(WorkItemStatus::InReview), "open");
        assert_eq!(adapter.outbound_status(WorkItemStatus::Done), "closed");
    }

    #[test]
    fn label_maps_cover_p_levels() {
        let adapter = adapter();
        assert_eq!(adapter.normalize_priority("p0"), WorkItemPriority::Critical);
        assert_eq!(
            adapter.normalize_priority("priority: low"),
            WorkItemPriority::Low
        );
        assert_eq!(adapter.normalize_type("enhancement"), WorkItemType::Feature);
    }

    #[test]
    fn priority_round_trip_on_canonical_labels() {
        let adapter = adapter();
        for priority in [
            WorkItemPriority::Critical,
            WorkItemPriority::High,
            WorkItemPriority::Medium,
            WorkItemPriority::Low,
        ] {
            assert_eq!(
                adapter.normalize_priority(&adapter.outbound_priority(priority)),
                priority
            );
        }
    }
}
