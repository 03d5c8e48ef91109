//! Integration tests for the service layer (HTTP facade + watcher).
//!
//! These verify observable behavior through the public surface: route
//! wiring, error status mapping, and watcher lifecycle.

#![cfg(feature = "service")]

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use common::{test_repo, write_file};
use mneme_core::{
    api::{router, AppState},
    sync::watch::{WatchEvent, WatchService},
};
use std::sync::Arc;
use tower::util::ServiceExt;

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_sync_then_get_entity_over_http() {
    common::init_logging();
    let (tmp, sync) = test_repo().await;
    write_file(
        tmp.path(),
        "design/auth.md",
        "---\ntitle: Auth\n---\n\n- [design] opaque tokens\n",
    );
    let app = router(AppState::new(Arc::new(sync)));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/sync")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let report = body_json(response).await;
    assert_eq!(report["new"][0], "design/auth.md");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/knowledge/entities/design/auth")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let entity = body_json(response).await;
    assert_eq!(entity["entity"]["permalink"], "design/auth");
    assert_eq!(entity["observations"][0]["content"], "opaque tokens");
}

#[tokio::test]
async fn test_http_error_mapping() {
    let (_tmp, sync) = test_repo().await;
    let app = router(AppState::new(Arc::new(sync)));

    // 404 for an unknown permalink
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/knowledge/entities/no/such")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // 400 for a bad timeframe
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/memory/recent?timeframe=whenever")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_search_and_context_routes() {
    let (tmp, sync) = test_repo().await;
    write_file(tmp.path(), "a.md", "- implements [[b]]\n");
    write_file(tmp.path(), "b.md", "# B\n");
    sync.sync().await.unwrap();
    let app = router(AppState::new(Arc::new(sync)));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/search?pattern=*&type=entity")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let hits = body_json(response).await;
    assert_eq!(hits.as_array().unwrap().len(), 2);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/memory/a?depth=1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let context = body_json(response).await;
    assert_eq!(context["primary_results"][0]["permalink"], "a");
    assert!(!context["related_results"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_watch_service_runs_initial_pass() {
    let (tmp, sync) = test_repo().await;
    write_file(tmp.path(), "seed.md", "# Seed\n");
    let sync = Arc::new(sync);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<WatchEvent>();
    let service = WatchService::start(sync.clone(), tx).unwrap();

    // The initial reconcile fires without any filesystem event.
    let event = tokio::time::timeout(std::time::Duration::from_secs(10), rx.recv())
        .await
        .expect("watch service should emit an initial sync event")
        .expect("channel open");
    match event {
        WatchEvent::Synced(report) => assert_eq!(report.new, vec!["seed.md"]),
        WatchEvent::Failed(e) => panic!("initial pass failed: {e}"),
    }

    service.stop();
}
