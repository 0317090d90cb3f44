//! HTTP and WebSocket surface

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use deploy_api::models::{
    DeletionResponse, DeploymentCreateResponse, DeploymentResponse, ErrorResponse, LogEntryResponse,
};
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use tokio_tungstenite::tungstenite::Message;
use tower::ServiceExt;

use webdeploy::cloud::{ResourceKind, ResourceRef};
use webdeploy::models::{DeploymentMode, DeploymentStatus};
use webdeploy::server::serve::router;
use webdeploy::server::state::ServerState;
use webdeploy::store::DeploymentStore;

use crate::support::{BuildBehavior, Harness, RecordingNotifier, ZIP};

fn app(h: &Harness) -> Router {
    let state = ServerState::new(h.state.service.clone(), h.state.heartbeat);
    router(&h.options.server, Arc::new(state))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

fn parse<T: DeserializeOwned>(body: &[u8]) -> T {
    serde_json::from_slice(body).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_archive(query: &str, archive: &'static [u8]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/api/deploy?{}", query))
        .header("content-type", "application/zip")
        .body(Body::from(archive))
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let h = Harness::new(BuildBehavior::Succeed, RecordingNotifier::default());
    let (status, body) = send(&app(&h), get("/api/health")).await;

    assert_eq!(status, StatusCode::OK);
    let health: serde_json::Value = parse(&body);
    assert_eq!(health["status"], "healthy");
    assert!(health["version"].is_string());
}

#[tokio::test(start_paused = true)]
async fn test_deploy_then_query() {
    let h = Harness::new(BuildBehavior::Succeed, RecordingNotifier::default());
    let app = app(&h);

    let (status, body) = send(
        &app,
        post_archive(
            "website_name=My-Site&mode=demo&notification_emails=a@example.com,%20b@example.com&filename=site.zip",
            ZIP,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let created: DeploymentCreateResponse = parse(&body);
    assert_eq!(created.status, DeploymentStatus::Queued);

    let finished = h.wait_terminal(&created.deployment_id).await;
    assert_eq!(finished.status, DeploymentStatus::Success);
    assert_eq!(finished.website_name, "my-site");
    assert_eq!(
        finished.notification_emails,
        vec!["a@example.com", "b@example.com"]
    );

    let (status, body) = send(
        &app,
        get(&format!("/api/deployments/{}", created.deployment_id)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let deployment: DeploymentResponse = parse(&body);
    assert_eq!(deployment.mode, DeploymentMode::Demo);
    assert_eq!(
        deployment.result_url.as_deref(),
        Some("https://digitaldatatest.com/my-site/")
    );

    let (status, body) = send(
        &app,
        get(&format!("/api/deployments/{}/logs", created.deployment_id)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let logs: Vec<LogEntryResponse> = parse(&body);
    assert_eq!(logs.first().unwrap().message, "Pipeline started");
    assert!(logs
        .windows(2)
        .all(|pair| pair[0].timestamp <= pair[1].timestamp));

    let (status, body) = send(&app, get("/api/deployments")).await;
    assert_eq!(status, StatusCode::OK);
    let listed: Vec<DeploymentResponse> = parse(&body);
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, created.deployment_id);
}

#[tokio::test]
async fn test_list_is_newest_first_and_paged() {
    let h = Harness::new(BuildBehavior::Succeed, RecordingNotifier::default());
    let (first, _) = h.queue("site-one", DeploymentMode::Demo).await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let (second, _) = h.queue("site-two", DeploymentMode::Demo).await;
    let app = app(&h);

    let (_, body) = send(&app, get("/api/deployments")).await;
    let listed: Vec<DeploymentResponse> = parse(&body);
    let ids: Vec<&str> = listed.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec![second.id.as_str(), first.id.as_str()]);

    let (_, body) = send(&app, get("/api/deployments?limit=1&offset=1")).await;
    let listed: Vec<DeploymentResponse> = parse(&body);
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, first.id);
}

#[tokio::test]
async fn test_invalid_submissions_are_rejected() {
    let h = Harness::new(BuildBehavior::Succeed, RecordingNotifier::default());
    let app = app(&h);

    let cases: [(&str, &'static [u8]); 5] = [
        ("website_name=bad_name!&mode=demo", ZIP),
        ("website_name=my-site&mode=staging", ZIP),
        ("website_name=my-site&mode=prod", ZIP),
        ("website_name=my-site&mode=demo", b"not a zip"),
        ("website_name=my-site&mode=demo", b""),
    ];
    for (query, archive) in cases {
        let (status, body) = send(&app, post_archive(query, archive)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "query {}", query);
        let error: ErrorResponse = parse(&body);
        assert!(!error.detail.is_empty());
    }

    // Nothing was recorded
    assert!(h.store.list(100, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_deployment_is_not_found() {
    let h = Harness::new(BuildBehavior::Succeed, RecordingNotifier::default());
    let app = app(&h);

    for request in [
        get("/api/deployments/missing"),
        get("/api/deployments/missing/logs"),
        Request::builder()
            .method("DELETE")
            .uri("/api/deployments/missing")
            .body(Body::empty())
            .unwrap(),
    ] {
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let error: ErrorResponse = parse(&body);
        assert_eq!(error.detail, "Deployment 'missing' not found.");
    }
}

#[tokio::test(start_paused = true)]
async fn test_delete_tears_down_demo_site() {
    let h = Harness::new(BuildBehavior::Succeed, RecordingNotifier::default());
    let (deployment, archive) = h.queue("my-site", DeploymentMode::Demo).await;
    h.state
        .orchestrator
        .run(&deployment.id, archive, deployment.config())
        .await
        .unwrap();
    let bucket = ResourceRef::new(ResourceKind::StorageBucket, "demo-my-site-bucket-demo");
    assert!(h.plane.resource(&bucket).is_some());

    let app = app(&h);
    let (status, body) = send(
        &app,
        Request::builder()
            .method("DELETE")
            .uri(format!("/api/deployments/{}", deployment.id))
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let deleted: DeletionResponse = parse(&body);
    assert!(deleted.deleted);
    assert_eq!(deleted.website_name, "my-site");
    assert_eq!(deleted.mode, DeploymentMode::Demo);

    assert!(h.plane.resource(&bucket).is_none());
    assert!(h
        .plane
        .resource(&ResourceRef::new(
            ResourceKind::BackendBucket,
            "demo-my-site-backend-demo"
        ))
        .is_none());
    let map = h
        .plane
        .resource(&ResourceRef::new(ResourceKind::UrlMap, "test-lb"))
        .unwrap();
    let rules = &map["pathMatchers"][0]["pathRules"];
    assert!(
        rules.is_null() || rules.as_array().is_some_and(|r| r.is_empty()),
        "rules left behind: {}",
        rules
    );

    assert!(h.store.get(&deployment.id).await.unwrap().is_none());
    assert!(h.store.list_logs(&deployment.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_while_active_conflicts() {
    let h = Harness::new(BuildBehavior::Succeed, RecordingNotifier::default());
    let (deployment, _) = h.queue("my-site", DeploymentMode::Demo).await;

    let (status, _) = send(
        &app(&h),
        Request::builder()
            .method("DELETE")
            .uri(format!("/api/deployments/{}", deployment.id))
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert!(h.store.get(&deployment.id).await.unwrap().is_some());
    assert!(h.plane.mutating_calls().is_empty());
}

#[tokio::test]
async fn test_websocket_streams_live_logs() {
    let h = Harness::new(
        BuildBehavior::Fail("npm exited with 1".to_string()),
        RecordingNotifier::default(),
    );
    let (deployment, archive) = h.queue("my-site", DeploymentMode::Demo).await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = app(&h);
    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    let (mut socket, _) =
        tokio_tungstenite::connect_async(format!("ws://{}/ws/logs/{}", addr, deployment.id))
            .await
            .unwrap();

    // The subscription is made once the upgrade completes
    for _ in 0..200 {
        if h.state.broker.listener_count(&deployment.id) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(h.state.broker.listener_count(&deployment.id), 1);

    let run = h
        .state
        .orchestrator
        .spawn(deployment.id.clone(), archive, deployment.config());

    let mut messages = Vec::new();
    let collect = async {
        while let Some(frame) = socket.next().await {
            let Message::Text(text) = frame.unwrap() else {
                continue;
            };
            let frame: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
            if frame["type"] != "log" {
                continue;
            }
            let message = frame["message"].as_str().unwrap().to_string();
            let done = message == "Pipeline FAILED at step BUILD";
            messages.push(message);
            if done {
                break;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), collect)
        .await
        .unwrap();
    run.await.unwrap();

    assert_eq!(messages.first().unwrap(), "Pipeline started");
    assert!(messages
        .iter()
        .any(|m| m == "Step BUILD failed: Command error: npm exited with 1"));

    // Leaving detaches the listener
    socket.send(Message::Close(None)).await.unwrap();
    for _ in 0..200 {
        if h.state.broker.listener_count(&deployment.id) == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(h.state.broker.listener_count(&deployment.id), 0);
    server.abort();
}
