// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end coverage of the §8 literal scenarios, driving the daemon's
//! `axum::Router` directly (no listening socket) against a mocked forge.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use relay_daemon::{build_app, AppState};
use relay_evidence::EvidenceStore;
use relay_forge_client::ForgeConfig;
use relay_labels::LabelRules;
use relay_store::EventStore;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SHARED_SECRET: &str = "test-shared-secret";
const TEST_PRIVATE_KEY: &str = include_str!("../crates/relay-forge-client/testdata/test_rsa_key.pem");

async fn state(server: &MockServer, label_rules_json: Option<&str>) -> Arc<AppState> {
    let forge_config = ForgeConfig::new("123", "456", TEST_PRIVATE_KEY).with_api_base_url(server.uri());
    let label_rules = match label_rules_json {
        Some(json) => LabelRules::parse(json).unwrap(),
        None => LabelRules::empty(),
    };
    Arc::new(AppState {
        shared_secret: SHARED_SECRET.to_string(),
        forge_config,
        label_rules: Arc::new(label_rules),
        event_store: Arc::new(EventStore::in_memory()),
        evidence_store: Arc::new(EvidenceStore::new(tempfile::tempdir().unwrap().keep())),
    })
}

async fn mock_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/app/installations/456/access_tokens"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"token": "ghs_test"})))
        .mount(server)
        .await;
}

async fn mock_pr_head(server: &MockServer, pr: u64, sha: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/repos/acme/web/pulls/{pr}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"head": {"sha": sha}})))
        .mount(server)
        .await;
}

async fn mock_get_issue(server: &MockServer, labels: &[&str]) {
    mock_get_issue_with_assignees(server, labels, &[]).await;
}

async fn mock_get_issue_with_assignees(server: &MockServer, labels: &[&str], assignees: &[&str]) {
    let labels: Vec<Value> = labels.iter().map(|l| json!({"name": l})).collect();
    let assignees: Vec<Value> = assignees.iter().map(|a| json!({"login": a})).collect();
    Mock::given(method("GET"))
        .and(path("/repos/acme/web/issues/42"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"number": 42, "labels": labels, "assignees": assignees})),
        )
        .mount(server)
        .await;
}

async fn mock_empty_comment_pages(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/repos/acme/web/issues/42/comments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(server)
        .await;
}

async fn mock_create_comment(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/repos/acme/web/issues/42/comments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 9001, "body": ""})))
        .mount(server)
        .await;
}

async fn mock_put_labels(server: &MockServer) {
    Mock::given(method("PUT"))
        .and(path("/repos/acme/web/issues/42/labels"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(server)
        .await;
}

fn event_body(event_id: &str, role: &str, overrides: Value) -> Value {
    let mut base = json!({
        "event_id": event_id,
        "repo": "acme/web",
        "issue_number": 42,
        "event_type": "qa.result_submitted",
        "role": role,
        "agent": "qa-bot",
        "overall_verdict": "PASS",
        "build": {"pr": 7, "commit_sha": "abc1234def"},
    });
    base.as_object_mut().unwrap().extend(overrides.as_object().unwrap().clone());
    base
}

fn post_events_request(body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v2/events")
        .header("content-type", "application/json")
        .header("x-relay-key", SHARED_SECRET)
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(resp: axum::response::Response) -> Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn happy_path_new_event() {
    let server = MockServer::start().await;
    mock_token(&server).await;
    mock_pr_head(&server, 7, "abc1234def").await;
    mock_get_issue(&server, &["status:qa", "prio:P1"]).await;
    mock_empty_comment_pages(&server).await;
    mock_create_comment(&server).await;
    mock_put_labels(&server).await;

    let state = state(&server, None).await;
    let app = build_app(state);

    let body = event_body("evt-00000001", "QA", json!({}));
    let resp = app.oneshot(post_events_request(&body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let parsed = json_body(resp).await;
    assert_eq!(parsed["ok"], true);
    assert_eq!(parsed["verdict"], "PASS");
    assert_eq!(parsed["provenance_verified"], true);
    assert_eq!(parsed["rolling_comment_id"], 9001);
}

#[tokio::test]
async fn provenance_downgrade_on_pr_head_mismatch() {
    let server = MockServer::start().await;
    mock_token(&server).await;
    mock_pr_head(&server, 7, "ffffffffff").await;
    mock_get_issue(&server, &["status:qa"]).await;
    mock_empty_comment_pages(&server).await;
    mock_create_comment(&server).await;
    mock_put_labels(&server).await;

    let state = state(&server, None).await;
    let app = build_app(state);

    let body = event_body("evt-00000002", "QA", json!({}));
    let resp = app.oneshot(post_events_request(&body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let parsed = json_body(resp).await;
    assert_eq!(parsed["verdict"], "PASS_UNVERIFIED");
    assert_eq!(parsed["provenance_verified"], false);
}

#[tokio::test]
async fn idempotent_replay_is_not_reinserted() {
    let server = MockServer::start().await;
    mock_token(&server).await;
    mock_pr_head(&server, 7, "abc1234def").await;
    mock_get_issue(&server, &["status:qa"]).await;
    mock_empty_comment_pages(&server).await;
    // Only one comment creation is expected across both submissions.
    Mock::given(method("POST"))
        .and(path("/repos/acme/web/issues/42/comments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 9001, "body": ""})))
        .expect(1)
        .mount(&server)
        .await;
    mock_put_labels(&server).await;

    let state = state(&server, None).await;
    let app = build_app(state);

    let body = event_body("evt-00000003", "QA", json!({}));

    let first = app.clone().oneshot(post_events_request(&body)).await.unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = app.oneshot(post_events_request(&body)).await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    let parsed = json_body(second).await;
    assert_eq!(parsed["ok"], true);
    assert_eq!(parsed["idempotent"], true);
    assert_eq!(parsed["event_id"], "evt-00000003");
}

#[tokio::test]
async fn payload_conflict_on_reused_event_id() {
    let server = MockServer::start().await;
    mock_token(&server).await;
    mock_pr_head(&server, 7, "abc1234def").await;
    mock_get_issue(&server, &["status:qa"]).await;
    mock_empty_comment_pages(&server).await;
    mock_create_comment(&server).await;
    mock_put_labels(&server).await;

    let state = state(&server, None).await;
    let app = build_app(state);

    let first_body = event_body("evt-00000004", "QA", json!({}));
    let first = app.clone().oneshot(post_events_request(&first_body)).await.unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);

    let conflicting_body = event_body("evt-00000004", "DEV", json!({}));
    let resp = app.oneshot(post_events_request(&conflicting_body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let parsed = json_body(resp).await;
    assert!(parsed["details"]["existing_hash"].is_string());
    assert!(parsed["details"]["new_hash"].is_string());
    assert_ne!(parsed["details"]["existing_hash"], parsed["details"]["new_hash"]);
}

#[tokio::test]
async fn fail_verdict_without_severity_is_rejected_before_any_forge_call() {
    // No mocks are registered at all: a validation failure must short-circuit
    // before any forge call is attempted.
    let server = MockServer::start().await;

    let state = state(&server, None).await;
    let app = build_app(state);

    let body = event_body(
        "evt-00000005",
        "QA",
        json!({"overall_verdict": "FAIL", "build": Value::Null}),
    );
    let resp = app.oneshot(post_events_request(&body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let parsed = json_body(resp).await;
    assert!(parsed["error"].as_str().unwrap().contains("severity"));
}

#[tokio::test]
async fn label_transition_computed_from_rules() {
    let server = MockServer::start().await;
    mock_token(&server).await;
    mock_pr_head(&server, 7, "abc1234def").await;
    mock_get_issue(&server, &["status:qa", "prio:P1"]).await;
    mock_empty_comment_pages(&server).await;
    mock_create_comment(&server).await;

    Mock::given(method("PUT"))
        .and(path("/repos/acme/web/issues/42/labels"))
        .respond_with(move |req: &wiremock::Request| {
            let body: Value = serde_json::from_slice(&req.body).unwrap();
            let mut labels: Vec<String> =
                body["labels"].as_array().unwrap().iter().map(|v| v.as_str().unwrap().to_string()).collect();
            labels.sort();
            assert_eq!(labels, vec!["prio:P1".to_string(), "status:verified".to_string()]);
            ResponseTemplate::new(200).set_body_json(json!([]))
        })
        .mount(&server)
        .await;

    let rules = json!({
        "qa.result_submitted": {
            "PASS": {"add": ["status:verified"], "remove": ["status:qa"]},
            "FAIL": {"add": ["status:rejected"], "remove": ["status:qa"]}
        }
    })
    .to_string();

    let state = state(&server, Some(&rules)).await;
    let app = build_app(state);

    let body = event_body("evt-00000006", "QA", json!({}));
    let resp = app.oneshot(post_events_request(&body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn issue_assignees_are_rendered_as_the_owner() {
    let server = MockServer::start().await;
    mock_token(&server).await;
    mock_pr_head(&server, 7, "abc1234def").await;
    mock_get_issue_with_assignees(&server, &["status:qa"], &["alice", "bob"]).await;
    mock_empty_comment_pages(&server).await;
    mock_put_labels(&server).await;

    Mock::given(method("POST"))
        .and(path("/repos/acme/web/issues/42/comments"))
        .respond_with(move |req: &wiremock::Request| {
            let body: Value = serde_json::from_slice(&req.body).unwrap();
            assert!(body["body"].as_str().unwrap().contains("- Owner: @alice"));
            ResponseTemplate::new(201).set_body_json(json!({"id": 9001, "body": ""}))
        })
        .mount(&server)
        .await;

    let state = state(&server, None).await;
    let app = build_app(state);

    let body = event_body("evt-00000008", "QA", json!({}));
    let resp = app.oneshot(post_events_request(&body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn missing_auth_header_is_rejected() {
    let server = MockServer::start().await;
    let state = state(&server, None).await;
    let app = build_app(state);

    let body = event_body("evt-00000007", "QA", json!({}));
    let req = Request::builder()
        .method("POST")
        .uri("/v2/events")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}
