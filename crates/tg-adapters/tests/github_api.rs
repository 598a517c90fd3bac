// SPDX-License-Identifier: MIT OR Apache-2.0
//! Wire-level tests for the GitHub adapter against a mock server.

use serde_json::json;
use tg_adapters::{GithubAdapter, NewWorkItem, SourceAdapter};
use tg_core::{AuthMaterial, ErrorKind, WorkItemPriority, WorkItemStatus, WorkItemType};
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn issue_payload(number: u64, state: &str, labels: &[&str]) -> serde_json::Value {
    json!({
        "id": 900 + number,
        "number": number,
        "title": format!("issue {number}"),
        "body": "details",
        "state": state,
        "labels": labels.iter().map(|l| json!({ "name": l })).collect::<Vec<_>>(),
        "assignee": { "login": "octocat" },
        "user": { "login": "reporter" },
        "created_at": "2024-02-01T00:00:00Z",
        "updated_at": "2024-02-02T00:00:00Z",
        "closed_at": null,
        "html_url": format!("https://github.com/octo/demo/issues/{number}")
    })
}

fn adapter_for(server: &MockServer) -> GithubAdapter {
    GithubAdapter::new(
        Uuid::new_v4(),
        Uuid::new_v4(),
        &server.uri(),
        &AuthMaterial::ApiToken { token: "pat".into() },
    )
    .unwrap()
}

#[tokio::test]
async fn pull_requests_are_filtered_out_of_listings() {
    let server = MockServer::start().await;
    let mut pr = issue_payload(2, "open", &[]);
    pr["pull_request"] = json!({ "url": "https://api.github.com/..." });

    Mock::given(method("GET"))
        .and(path("/repos/octo/demo/issues"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([issue_payload(1, "open", &["bug", "p1"]), pr])),
        )
        .mount(&server)
        .await;

    let adapter = adapter_for(&server);
    let items = adapter
        .fetch_work_items(Some("octo/demo"), None, 50)
        .await
        .unwrap();

    assert_eq!(items.len(), 1, "the pull request is dropped");
    assert_eq!(items[0].source_key, "octo/demo#1");
    assert_eq!(items[0].item_type, WorkItemType::Bug);
    assert_eq!(items[0].priority, WorkItemPriority::High);
}

#[tokio::test]
async fn listing_without_a_repo_is_rejected_locally() {
    let server = MockServer::start().await;
    let adapter = adapter_for(&server);
    let err = adapter.fetch_work_items(None, None, 50).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::ValidationError);
}

#[tokio::test]
async fn create_writes_labels_for_type_and_priority() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/repos/octo/demo/issues"))
        .and(body_partial_json(json!({
            "title": "crash on boot",
            "labels": ["bug", "priority: critical"]
        })))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(issue_payload(7, "open", &["bug"])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let adapter = adapter_for(&server);
    let mut new = NewWorkItem::titled("octo/demo", "crash on boot");
    new.item_type = WorkItemType::Bug;
    new.priority = WorkItemPriority::Critical;
    let item = adapter.create_work_item(&new).await.unwrap();
    assert_eq!(item.source_key, "octo/demo#7");
}

#[tokio::test]
async fn transition_patches_state_and_comments() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/repos/octo/demo/issues/3"))
        .and(body_partial_json(json!({ "state": "closed" })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(issue_payload(3, "closed", &[])),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/repos/octo/demo/issues/3/comments"))
        .and(body_partial_json(json!({ "body": "done via gateway" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": 555,
            "user": { "login": "octocat" },
            "body": "done via gateway",
            "created_at": "2024-02-03T00:00:00Z",
            "updated_at": "2024-02-03T00:00:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = adapter_for(&server);
    let item = adapter
        .transition_work_item("octo/demo#3", WorkItemStatus::Done, Some("done via gateway"))
        .await
        .unwrap();
    assert_eq!(item.status, WorkItemStatus::Done);
}

#[tokio::test]
async fn timeline_events_become_transitions() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/octo/demo/issues/3/timeline"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "event": "labeled", "created_at": "2024-02-01T00:00:00Z" },
            { "event": "closed", "actor": { "login": "octocat" }, "created_at": "2024-02-02T00:00:00Z" },
            { "event": "reopened", "actor": { "login": "octocat" }, "created_at": "2024-02-03T00:00:00Z" }
        ])))
        .mount(&server)
        .await;

    let adapter = adapter_for(&server);
    let transitions = adapter.fetch_transitions("octo/demo#3").await.unwrap();
    assert_eq!(transitions.len(), 2);
    assert_eq!(transitions[0].to_status, WorkItemStatus::Done);
    assert_eq!(transitions[1].to_status, WorkItemStatus::Todo);
}

#[tokio::test]
async fn link_work_items_is_unsupported() {
    let server = MockServer::start().await;
    let adapter = adapter_for(&server);
    let err = adapter
        .link_work_items("octo/demo#1", "octo/demo#2", "blocks")
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ValidationError);
}
