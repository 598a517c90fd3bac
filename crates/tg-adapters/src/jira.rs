// SPDX-License-Identifier: MIT OR Apache-2.0
//! Jira adapter (REST v3).
//!
//! Auth is either a Bearer OAuth token or Basic `base64(email:token)`.
//! Issues are fetched with JQL; transitions are two-phase (list available
//! transitions, then post the matching id); descriptions travel as
//! Atlassian Document Format and are flattened to plain text by walking
//! `paragraph → text` leaves.
//!
//! Outbound collapses: priority `none` has no Jira equivalent and raises
//! as `Medium`.

use crate::http::{build_client, check_response, classify_send_error, malformed_payload,
    parse_backend_ts, secret_header, send_json};
use crate::{NewWorkItem, SourceAdapter};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use tg_core::{
    AuthMaterial, BackendKind, Comment, GatewayError, GatewayResult, Transition, WorkItem,
    WorkItemPriority, WorkItemStatus, WorkItemType,
};
use uuid::Uuid;

const STATUS_MAP: &[(&str, WorkItemStatus)] = &[
    ("to do", WorkItemStatus::Todo),
    ("open", WorkItemStatus::Todo),
    ("backlog", WorkItemStatus::Todo),
    ("in progress", WorkItemStatus::InProgress),
    ("in development", WorkItemStatus::InProgress),
    ("blocked", WorkItemStatus::Blocked),
    ("impediment", WorkItemStatus::Blocked),
    ("in review", WorkItemStatus::InReview),
    ("code review", WorkItemStatus::InReview),
    ("done", WorkItemStatus::Done),
    ("closed", WorkItemStatus::Done),
    ("resolved", WorkItemStatus::Done),
    ("cancelled", WorkItemStatus::Cancelled),
    ("rejected", WorkItemStatus::Cancelled),
];

const PRIORITY_MAP: &[(&str, WorkItemPriority)] = &[
    ("highest", WorkItemPriority::Critical),
    ("critical", WorkItemPriority::Critical),
    ("high", WorkItemPriority::High),
    ("medium", WorkItemPriority::Medium),
    ("low", WorkItemPriority::Low),
    ("lowest", WorkItemPriority::Low),
];

const TYPE_MAP: &[(&str, WorkItemType)] = &[
    ("epic", WorkItemType::Epic),
    ("story", WorkItemType::Story),
    ("task", WorkItemType::Task),
    ("bug", WorkItemType::Bug),
    ("sub-task", WorkItemType::Subtask),
    ("subtask", WorkItemType::Subtask),
    ("feature", WorkItemType::Feature),
];

/// Adapter for Atlassian Jira.
pub struct JiraAdapter {
    instance_id: Uuid,
    tenant_id: Uuid,
    site_url: String,
    api_url: String,
    client: reqwest::Client,
}

impl JiraAdapter {
    /// Build an adapter bound to one Jira site.
    ///
    /// # Errors
    ///
    /// `validation_error` when the credential material does not fit
    /// Jira's auth schemes.
    pub fn new(
        instance_id: Uuid,
        tenant_id: Uuid,
        base_url: &str,
        auth: &AuthMaterial,
    ) -> GatewayResult<Self> {
        let mut headers = HeaderMap::new();
        match auth {
            AuthMaterial::Oauth { access_token } => {
                headers.insert(AUTHORIZATION, secret_header(&format!("Bearer {access_token}"))?);
            }
            AuthMaterial::Basic { email, api_token } => {
                let encoded = BASE64.encode(format!("{email}:{api_token}"));
                headers.insert(AUTHORIZATION, secret_header(&format!("Basic {encoded}"))?);
            }
            AuthMaterial::ApiToken { .. } => {
                return Err(GatewayError::validation(
                    "jira requires oauth or basic credentials",
                ));
            }
        }
        headers.insert(ACCEPT, "application/json".parse().expect("static header"));

        let site_url = base_url.trim_end_matches('/').to_string();
        Ok(Self {
            instance_id,
            tenant_id,
            api_url: format!("{site_url}/rest/api/3"),
            site_url,
            client: build_client(headers)?,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.api_url)
    }

    /// Flatten an ADF document to plain text by concatenating the text
    /// leaves of its paragraphs.
    fn extract_description(description: &Value) -> Option<String> {
        match description {
            Value::String(s) => Some(s.clone()),
            Value::Object(_) => {
                let mut parts: Vec<&str> = Vec::new();
                for block in description["content"].as_array()?.iter() {
                    if block["type"] == "paragraph" {
                        for leaf in block["content"].as_array().into_iter().flatten() {
                            if leaf["type"] == "text" {
                                if let Some(text) = leaf["text"].as_str() {
                                    parts.push(text);
                                }
                            }
                        }
                    }
                }
                Some(parts.join(" "))
            }
            _ => None,
        }
    }

    /// Wrap plain text in a single-paragraph ADF document.
    fn build_adf(text: &str) -> Value {
        json!({
            "type": "doc",
            "version": 1,
            "content": [{
                "type": "paragraph",
                "content": [{ "type": "text", "text": text }],
            }],
        })
    }

    fn normalize_issue(&self, issue: &Value) -> GatewayResult<WorkItem> {
        let fields = &issue["fields"];
        let key = issue["key"]
            .as_str()
            .ok_or_else(|| malformed_payload("issue has no key"))?;
        let source_id = issue["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| malformed_payload("issue has no id"))?;

        let closed_at = match fields["resolutiondate"].as_str() {
            Some(raw) => Some(parse_backend_ts(raw)?),
            None => None,
        };

        Ok(WorkItem {
            source_id,
            source_key: key.to_string(),
            source_kind: BackendKind::Jira,
            tenant_id: self.tenant_id,
            instance_id: self.instance_id,
            title: fields["summary"].as_str().unwrap_or_default().to_string(),
            description: Self::extract_description(&fields["description"]),
            status: self.normalize_status(fields["status"]["name"].as_str().unwrap_or_default()),
            priority: self
                .normalize_priority(fields["priority"]["name"].as_str().unwrap_or_default()),
            item_type: self
                .normalize_type(fields["issuetype"]["name"].as_str().unwrap_or_default()),
            parent_id: fields["parent"]["key"].as_str().map(str::to_string),
            project_id: fields["project"]["key"].as_str().map(str::to_string),
            assignee_id: fields["assignee"]["accountId"].as_str().map(str::to_string),
            reporter_id: fields["reporter"]["accountId"].as_str().map(str::to_string),
            created_at: parse_backend_ts(fields["created"].as_str().unwrap_or_default())?,
            updated_at: parse_backend_ts(fields["updated"].as_str().unwrap_or_default())?,
            closed_at,
            url: Some(format!("{}/browse/{key}", self.site_url)),
            raw: issue.clone(),
            custom_fields: BTreeMap::new(),
        })
    }

    fn normalize_comment(&self, comment: &Value, work_item_id: &str) -> GatewayResult<Comment> {
        let body = match &comment["body"] {
            Value::String(s) => s.clone(),
            adf @ Value::Object(_) => Self::extract_description(adf).unwrap_or_default(),
            _ => String::new(),
        };
        Ok(Comment {
            source_id: comment["id"].as_str().unwrap_or_default().to_string(),
            work_item_id: work_item_id.to_string(),
            author_id: comment["author"]["accountId"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            body,
            created_at: parse_backend_ts(comment["created"].as_str().unwrap_or_default())?,
            updated_at: parse_backend_ts(comment["updated"].as_str().unwrap_or_default())?,
            raw: comment.clone(),
        })
    }
}

#[async_trait]
impl SourceAdapter for JiraAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Jira
    }

    fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    async fn test_connection(&self) -> bool {
        match self.client.get(self.url("/myself")).send().await {
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
        let mut jql_parts = Vec::new();
        if let Some(project) = project_id {
            jql_parts.push(format!("project = {project}"));
        }
        if let Some(since) = updated_since {
            jql_parts.push(format!("updated >= '{}'", since.format("%Y-%m-%d %H:%M")));
        }
        let jql = if jql_parts.is_empty() {
            "order by updated DESC".to_string()
        } else {
            jql_parts.join(" AND ")
        };

        let body = send_json(self.client.get(self.url("/search")).query(&[
            ("jql", jql.as_str()),
            ("maxResults", &limit.to_string()),
            (
                "fields",
                "summary,description,status,priority,issuetype,parent,project,assignee,\
                 reporter,created,updated,resolutiondate",
            ),
        ]))
        .await?;

        body["issues"]
            .as_array()
            .map(|issues| {
                issues
                    .iter()
                    .map(|issue| self.normalize_issue(issue))
                    .collect()
            })
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn fetch_work_item(&self, work_item_id: &str) -> GatewayResult<WorkItem> {
        let issue = send_json(self.client.get(self.url(&format!("/issue/{work_item_id}")))).await?;
        self.normalize_issue(&issue)
    }

    async fn create_work_item(&self, new: &NewWorkItem) -> GatewayResult<WorkItem> {
        let mut fields = Map::new();
        fields.insert("project".into(), json!({ "key": new.project_id }));
        fields.insert("summary".into(), json!(new.title));
        fields.insert(
            "issuetype".into(),
            json!({ "name": self.outbound_type(new.item_type) }),
        );
        fields.insert(
            "priority".into(),
            json!({ "name": self.outbound_priority(new.priority) }),
        );
        if let Some(description) = &new.description {
            fields.insert("description".into(), Self::build_adf(description));
        }
        if let Some(assignee) = &new.assignee_id {
            fields.insert("assignee".into(), json!({ "id": assignee }));
        }
        for (key, value) in &new.extras {
            fields.insert(key.clone(), value.clone());
        }

        let created = send_json(
            self.client
                .post(self.url("/issue"))
                .json(&json!({ "fields": fields })),
        )
        .await?;
        let key = created["key"]
            .as_str()
            .ok_or_else(|| malformed_payload("create response has no key"))?;
        self.fetch_work_item(key).await
    }

    async fn update_work_item(
        &self,
        work_item_id: &str,
        fields: &Map<String, Value>,
    ) -> GatewayResult<WorkItem> {
        let response = self
            .client
            .put(self.url(&format!("/issue/{work_item_id}")))
            .json(&json!({ "fields": fields }))
            .send()
            .await
            .map_err(classify_send_error)?;
        check_response(response).await?;
        self.fetch_work_item(work_item_id).await
    }

    async fn transition_work_item(
        &self,
        work_item_id: &str,
        to_status: WorkItemStatus,
        comment: Option<&str>,
    ) -> GatewayResult<WorkItem> {
        // Phase one: discover which transition lands on the target status.
        let listing = send_json(
            self.client
                .get(self.url(&format!("/issue/{work_item_id}/transitions"))),
        )
        .await?;
        let target = self.outbound_status(to_status);
        let transition_id = listing["transitions"]
            .as_array()
            .into_iter()
            .flatten()
            .find(|t| {
                t["to"]["name"]
                    .as_str()
                    .is_some_and(|name| name.eq_ignore_ascii_case(&target))
            })
            .and_then(|t| t["id"].as_str().map(str::to_string));
        let Some(transition_id) = transition_id else {
            let available: Vec<&str> = listing["transitions"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|t| t["to"]["name"].as_str())
                .collect();
            return Err(GatewayError::validation(format!(
                "no transition found to status {target:?}"
            ))
            .with_details(json!({ "available": available })));
        };

        // Phase two: perform it.
        let mut payload = json!({ "transition": { "id": transition_id } });
        if let Some(comment) = comment {
            payload["update"] = json!({ "comment": [{ "add": { "body": comment } }] });
        }
        let response = self
            .client
            .post(self.url(&format!("/issue/{work_item_id}/transitions")))
            .json(&payload)
            .send()
            .await
            .map_err(classify_send_error)?;
        check_response(response).await?;

        self.fetch_work_item(work_item_id).await
    }

    async fn add_comment(&self, work_item_id: &str, body: &str) -> GatewayResult<Comment> {
        let comment = send_json(
            self.client
                .post(self.url(&format!("/issue/{work_item_id}/comment")))
                .json(&json!({ "body": body })),
        )
        .await?;
        self.normalize_comment(&comment, work_item_id)
    }

    async fn fetch_comments(&self, work_item_id: &str) -> GatewayResult<Vec<Comment>> {
        let body = send_json(
            self.client
                .get(self.url(&format!("/issue/{work_item_id}/comment"))),
        )
        .await?;
        body["comments"]
            .as_array()
            .map(|comments| {
                comments
                    .iter()
                    .map(|comment| self.normalize_comment(comment, work_item_id))
                    .collect()
            })
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn fetch_transitions(&self, work_item_id: &str) -> GatewayResult<Vec<Transition>> {
        let body = send_json(
            self.client
                .get(self.url(&format!("/issue/{work_item_id}")))
                .query(&[("expand", "changelog")]),
        )
        .await?;

        let mut transitions = Vec::new();
        for history in body["changelog"]["histories"].as_array().into_iter().flatten() {
            for item in history["items"].as_array().into_iter().flatten() {
                if item["field"] != "status" {
                    continue;
                }
                transitions.push(Transition {
                    work_item_id: work_item_id.to_string(),
                    from_status: self
                        .normalize_status(item["fromString"].as_str().unwrap_or_default()),
                    to_status: self.normalize_status(item["toString"].as_str().unwrap_or_default()),
                    actor_id: history["author"]["accountId"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string(),
                    timestamp: parse_backend_ts(history["created"].as_str().unwrap_or_default())?,
                    raw: history.clone(),
                });
            }
        }
        Ok(transitions)
    }

    async fn link_work_items(
        &self,
        inward_id: &str,
        outward_id: &str,
        link_type: &str,
    ) -> GatewayResult<()> {
        let response = self
            .client
            .post(self.url("/issueLink"))
            .json(&json!({
                "type": { "name": link_type },
                "inwardIssue": { "key": inward_id },
                "outwardIssue": { "key": outward_id },
            }))
            .send()
            .await
            .map_err(classify_send_error)?;
        check_response(response).await?;
        Ok(())
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
            WorkItemStatus::Todo => "To Do",
            WorkItemStatus::InProgress => "In Progress",
            WorkItemStatus::Blocked => "Blocked",
            WorkItemStatus::InReview => "In Review",
            WorkItemStatus::Done => "Done",
            WorkItemStatus::Cancelled => "Cancelled",
        }
        .to_string()
    }

    fn outbound_priority(&self, priority: WorkItemPriority) -> String {
        match priority {
            WorkItemPriority::Critical => "Highest",
            WorkItemPriority::High => "High",
            WorkItemPriority::Medium => "Medium",
            WorkItemPriority::Low => "Low",
            // Jira has no unprioritized level.
            WorkItemPriority::None => "Medium",
        }
        .to_string()
    }

    fn outbound_type(&self, item_type: WorkItemType) -> String {
        match item_type {
            WorkItemType::Epic => "Epic",
            WorkItemType::Story => "Story",
            WorkItemType::Task => "Task",
            WorkItemType::Bug => "Bug",
            WorkItemType::Subtask => "Sub-task",
            WorkItemType::Feature => "Feature",
        }
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> JiraAdapter {
        JiraAdapter::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "https://example.atlassian.net",
            &AuthMaterial::Basic {
                email: "dev@example.com".into(),
                api_token: "tok".into(),
            },
        )
        .unwrap()
    }

    #[test]
    fn adf_extraction_joins_paragraph_text() {
        let doc = json!({
            "type": "doc",
            "version": 1,
            "content": [
                { "type": "paragraph", "content": [
                    { "type": "text", "text": "first" },
                    { "type": "text", "text": "second" }
                ]},
                { "type": "codeBlock", "content": [{ "type": "text", "text": "skipped" }] },
                { "type": "paragraph", "content": [{ "type": "text", "text": "third" }] }
            ]
        });
        assert_eq!(
            JiraAdapter::extract_description(&doc).unwrap(),
            "first second third"
        );
    }

    #[test]
    fn plain_string_descriptions_pass_through() {
        assert_eq!(
            JiraAdapter::extract_description(&json!("already text")).unwrap(),
            "already text"
        );
        assert_eq!(JiraAdapter::extract_description(&json!(null)), None);
    }

    #[test]
    fn unknown_status_collapses_to_todo() {
        let adapter = adapter();
        assert_eq!(adapter.normalize_status("Weird State"), WorkItemStatus::Todo);
        assert_eq!(adapter.normalize_status("In Development"), WorkItemStatus::InProgress);
    }

    #[test]
    fn status_round_trip_holds_for_every_value() {
        let adapter = adapter();
        for status in [
            WorkItemStatus::Todo,
            WorkItemStatus::InProgress,
            WorkItemStatus::Blocked,
            WorkItemStatus::InReview,
            WorkItemStatus::Done,
            WorkItemStatus::Cancelled,
        ] {
            assert_eq!(adapter.normalize_status(&adapter.outbound_status(status)), status);
        }
    }

    #[test]
    fn priority_round_trip_with_documented_none_collapse() {
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
        // `none` collapses to Medium on the way out.
        assert_eq!(
            adapter.normalize_priority(&adapter.outbound_priority(WorkItemPriority::None)),
            WorkItemPriority::Medium
        );
    }

    #[test]
    fn adf_build_and_extract_round_trip() {
        let adf = JiraAdapter::build_adf("release notes");
        assert_eq!(
            JiraAdapter::extract_description(&adf).unwrap(),
            "release notes"
        );
    }
}
