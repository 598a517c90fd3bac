// SPDX-License-Identifier: MIT OR Apache-2.0
//! Wire-level tests for the Jira adapter against a mock server.

use serde_json::json;
use tg_adapters::{JiraAdapter, NewWorkItem, SourceAdapter};
use tg_core::{AuthMaterial, BackendKind, ErrorKind, WorkItemPriority, WorkItemStatus, WorkItemType};
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn issue_payload(key: &str, status: &str) -> serde_json::Value {
    json!({
        "id": "10001",
        "key": key,
        "fields": {
            "summary": "Fix the login flow",
            "description": {
                "type": "doc",
                "version": 1,
                "content": [{
                    "type": "paragraph",
                    "content": [{ "type": "text", "text": "Users cannot sign in." }]
                }]
            },
            "status": { "name": status },
            "priority": { "name": "Highest" },
            "issuetype": { "name": "Bug" },
            "parent": { "key": "DEMO-1" },
            "project": { "key": "DEMO" },
            "assignee": { "accountId": "acc-1" },
            "reporter": { "accountId": "acc-2" },
            "created": "2024-01-15T10:30:00.000+0000",
            "updated": "2024-01-16T08:00:00.000+0000",
            "resolutiondate": null
        }
    })
}

async fn adapter_for(server: &MockServer) -> JiraAdapter {
    JiraAdapter::new(
        Uuid::new_v4(),
        Uuid::new_v4(),
        &server.uri(),
        &AuthMaterial::Basic {
            email: "dev@example.com".into(),
            api_token: "tok".into(),
        },
    )
    .unwrap()
}

#[tokio::test]
async fn fetch_work_item_normalizes_the_issue() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/api/3/issue/DEMO-7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(issue_payload("DEMO-7", "In Progress")))
        .mount(&server)
        .await;

    let adapter = adapter_for(&server).await;
    let item = adapter.fetch_work_item("DEMO-7").await.unwrap();

    assert_eq!(item.source_key, "DEMO-7");
    assert_eq!(item.source_kind, BackendKind::Jira);
    assert_eq!(item.status, WorkItemStatus::InProgress);
    assert_eq!(item.priority, WorkItemPriority::Critical);
    assert_eq!(item.item_type, WorkItemType::Bug);
    assert_eq!(item.description.as_deref(), Some("Users cannot sign in."));
    assert_eq!(item.project_id.as_deref(), Some("DEMO"));
    assert_eq!(item.url.as_deref(), Some(format!("{}/browse/DEMO-7", server.uri()).as_str()));
}

#[tokio::test]
async fn create_posts_fields_and_refetches() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/api/3/issue"))
        .and(body_partial_json(json!({
            "fields": {
                "project": { "key": "DEMO" },
                "summary": "hello",
                "issuetype": { "name": "Task" },
                "priority": { "name": "Medium" }
            }
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "10002", "key": "DEMO-8" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/api/3/issue/DEMO-8"))
        .respond_with(ResponseTemplate::new(200).set_body_json(issue_payload("DEMO-8", "To Do")))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = adapter_for(&server).await;
    let item = adapter
        .create_work_item(&NewWorkItem::titled("DEMO", "hello"))
        .await
        .unwrap();
    assert_eq!(item.source_key, "DEMO-8");
    assert_eq!(item.status, WorkItemStatus::Todo);
}

#[tokio::test]
async fn transition_is_two_phase() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/api/3/issue/DEMO-7/transitions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "transitions": [
                { "id": "11", "to": { "name": "In Progress" } },
                { "id": "31", "to": { "name": "Done" } }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/api/3/issue/DEMO-7/transitions"))
        .and(body_partial_json(json!({ "transition": { "id": "31" } })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/api/3/issue/DEMO-7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(issue_payload("DEMO-7", "Done")))
        .mount(&server)
        .await;

    let adapter = adapter_for(&server).await;
    let item = adapter
        .transition_work_item("DEMO-7", WorkItemStatus::Done, None)
        .await
        .unwrap();
    assert_eq!(item.status, WorkItemStatus::Done);
}

#[tokio::test]
async fn transition_to_unreachable_status_is_a_validation_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/api/3/issue/DEMO-7/transitions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "transitions": [{ "id": "11", "to": { "name": "In Progress" } }]
        })))
        .mount(&server)
        .await;

    let adapter = adapter_for(&server).await;
    let err = adapter
        .transition_work_item("DEMO-7", WorkItemStatus::Done, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ValidationError);
    assert_eq!(err.details.unwrap()["available"], json!(["In Progress"]));
}

#[tokio::test]
async fn changelog_histories_become_transitions() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/api/3/issue/DEMO-7"))
        .and(query_param("expand", "changelog"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "10001",
            "key": "DEMO-7",
            "changelog": {
                "histories": [{
                    "author": { "accountId": "acc-1" },
                    "created": "2024-01-16T08:00:00.000+0000",
                    "items": [
                        { "field": "status", "fromString": "To Do", "toString": "In Progress" },
                        { "field": "assignee", "fromString": "a", "toString": "b" }
                    ]
                }]
            }
        })))
        .mount(&server)
        .await;

    let adapter = adapter_for(&server).await;
    let transitions = adapter.fetch_transitions("DEMO-7").await.unwrap();
    assert_eq!(transitions.len(), 1, "non-status items are skipped");
    assert_eq!(transitions[0].from_status, WorkItemStatus::Todo);
    assert_eq!(transitions[0].to_status, WorkItemStatus::InProgress);
    assert_eq!(transitions[0].actor_id, "acc-1");
}

#[tokio::test]
async fn upstream_failures_map_onto_the_taxonomy() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/api/3/issue/RATE-1"))
        .respond_with(
            ResponseTemplate::new(429).insert_header("retry-after", "17"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/api/3/issue/GONE-1"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/api/3/issue/DENIED-1"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/api/3/issue/TEAPOT-1"))
        .respond_with(ResponseTemplate::new(418).set_body_string("short and stout"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/api/3/issue/DOWN-1"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let adapter = adapter_for(&server).await;

    let err = adapter.fetch_work_item("RATE-1").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::RateLimited);
    assert_eq!(err.retry_after, Some(17));

    let err = adapter.fetch_work_item("GONE-1").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);

    let err = adapter.fetch_work_item("DENIED-1").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Unauthorized);

    let err = adapter.fetch_work_item("TEAPOT-1").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Upstream4xx);
    let details = err.details.unwrap();
    assert_eq!(details["status"], json!(418));
    assert_eq!(details["body"], json!("short and stout"));

    let err = adapter.fetch_work_item("DOWN-1").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Upstream5xx);
}

#[tokio::test]
async fn unreachable_backend_is_a_network_error() {
    // Nothing listens on this port.
    let adapter = JiraAdapter::new(
        Uuid::new_v4(),
        Uuid::new_v4(),
        "http://127.0.0.1:9",
        &AuthMaterial::Oauth {
            access_token: "tok".into(),
        },
    )
    .unwrap();

    let err = adapter.fetch_work_item("DEMO-1").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NetworkError);
}

#[tokio::test]
async fn link_work_items_posts_an_issue_link() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/api/3/issueLink"))
        .and(body_partial_json(json!({
            "type": { "name": "Blocks" },
            "inwardIssue": { "key": "DEMO-1" },
            "outwardIssue": { "key": "DEMO-2" }
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = adapter_for(&server).await;
    adapter
        .link_work_items("DEMO-1", "DEMO-2", "Blocks")
        .await
        .unwrap();
}
