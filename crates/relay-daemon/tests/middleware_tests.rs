// SPDX-License-Identifier: MIT OR Apache-2.0
use relay_daemon::middleware::{request_id_middleware, RequestId, RequestLogger};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::middleware;
use axum::routing::get;
use axum::Router;
use http_body_util::BodyExt;
use std::collections::HashSet;
use tower::ServiceExt;

/// Helper: minimal router with only the request-id middleware.
fn app_with_request_id() -> Router {
    Router::new()
        .route("/ping", get(|| async { "pong" }))
        .layer(middleware::from_fn(request_id_middleware))
}

/// Helper: router with logger middleware.
fn app_with_logger() -> Router {
    Router::new()
        .route("/ok", get(|| async { "ok" }))
        .route("/not-found", get(|| async { StatusCode::NOT_FOUND }))
        .route(
            "/error",
            get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        )
        .layer(middleware::from_fn(RequestLogger::layer))
}

// -----------------------------------------------------------------------
// RequestId tests
// -----------------------------------------------------------------------

#[tokio::test]
async fn request_id_is_generated() {
    let app = app_with_request_id();
    let resp = app
        .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let hdr = resp
        .headers()
        .get("x-request-id")
        .expect("missing x-request-id");
    let parsed: uuid::Uuid = hdr.to_str().unwrap().parse().expect("not a valid uuid");
    assert_ne!(parsed, uuid::Uuid::nil());
}

#[tokio::test]
async fn request_id_is_unique_per_request() {
    let app = app_with_request_id();

    let mut ids = HashSet::new();
    for _ in 0..5 {
        let resp = app
            .clone()
            .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let id_str = resp
            .headers()
            .get("x-request-id")
            .unwrap()
            .to_str()
            .unwrap()
            .to_owned();
        ids.insert(id_str);
    }
    assert_eq!(ids.len(), 5, "all request ids should be unique");
}

#[tokio::test]
async fn request_id_available_as_extension() {
    let app = Router::new()
        .route(
            "/ext",
            get(|ext: axum::Extension<RequestId>| async move { ext.0 .0.to_string() }),
        )
        .layer(middleware::from_fn(request_id_middleware));

    let resp = app
        .oneshot(Request::builder().uri("/ext").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let body_str = String::from_utf8(body.to_vec()).unwrap();
    let _parsed: uuid::Uuid = body_str.parse().expect("body should be a uuid");
}

// -----------------------------------------------------------------------
// RequestLogger tests
// -----------------------------------------------------------------------

#[tokio::test]
async fn logger_does_not_panic_on_200() {
    let app = app_with_logger();
    let resp = app
        .oneshot(Request::builder().uri("/ok").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn logger_does_not_panic_on_404() {
    let app = app_with_logger();
    let resp = app
        .oneshot(
            Request::builder()
                .uri("/not-found")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn logger_does_not_panic_on_500() {
    let app = app_with_logger();
    let resp = app
        .oneshot(
            Request::builder()
                .uri("/error")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

// -----------------------------------------------------------------------
// Composition tests
// -----------------------------------------------------------------------

#[tokio::test]
async fn request_id_and_logger_compose_correctly() {
    let app = Router::new()
        .route("/ping", get(|| async { "pong" }))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(middleware::from_fn(RequestLogger::layer));

    let resp = app
        .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().contains_key("x-request-id"));
}
