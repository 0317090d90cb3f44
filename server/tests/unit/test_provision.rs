//! Production and Cloud Run deployments, end to end

use webdeploy::cloud::{ResourceKind, ResourceRef};
use webdeploy::models::{
    DeploymentConfig, DeploymentMode, DeploymentStatus, PipelineStep, StepStatus,
};
use webdeploy::store::DeploymentStore;

use crate::support::{BuildBehavior, Harness, RecordingNotifier};

fn prod_config() -> DeploymentConfig {
    DeploymentConfig {
        website_name: "shop".to_string(),
        mode: DeploymentMode::Prod,
        domain: Some("example.com".to_string()),
        notification_emails: vec![],
    }
}

fn cloudrun_config() -> DeploymentConfig {
    DeploymentConfig {
        website_name: "my-app".to_string(),
        mode: DeploymentMode::CloudRun,
        domain: None,
        notification_emails: vec![],
    }
}

#[tokio::test(start_paused = true)]
async fn test_prod_deploy_builds_the_full_stack() {
    let h = Harness::new(BuildBehavior::Succeed, RecordingNotifier::default());
    let (deployment, archive) = h.queue_with(prod_config()).await;

    let status = h
        .state
        .orchestrator
        .run(&deployment.id, archive, deployment.config())
        .await
        .unwrap();
    assert_eq!(status, DeploymentStatus::Success);

    let record = h.store.get(&deployment.id).await.unwrap().unwrap();
    assert_eq!(record.result_url.as_deref(), Some("https://example.com/"));

    for resource in [
        ResourceRef::new(ResourceKind::GlobalAddress, "example-com-ip"),
        ResourceRef::new(ResourceKind::StorageBucket, "example-com-bucket-prod"),
        ResourceRef::new(ResourceKind::BackendBucket, "example-com-backend-prod"),
        ResourceRef::new(ResourceKind::UrlMap, "example-com-url-map"),
        ResourceRef::new(ResourceKind::TargetHttpProxy, "example-com-http-proxy"),
        ResourceRef::new(ResourceKind::ForwardingRule, "example-com-http-rule"),
        ResourceRef::new(ResourceKind::DnsZone, "example-com-zone"),
    ] {
        assert!(h.plane.resource(&resource).is_some(), "missing {}", resource);
    }
    // Certificates are off by default
    assert!(h
        .plane
        .resource(&ResourceRef::new(ResourceKind::TargetHttpsProxy, "example-com-https-proxy"))
        .is_none());

    // Production sites are served from the bucket root
    let objects = h.plane.objects("example-com-bucket-prod");
    assert!(objects.contains_key("index.html"));
    assert!(objects.contains_key("assets/app.js"));

    assert!(h.plane.mutating_calls().iter().any(|call| call.verb == "invalidate"
        && call.resource == ResourceRef::new(ResourceKind::UrlMap, "example-com-url-map")));
}

#[tokio::test(start_paused = true)]
async fn test_prod_infra_failure_skips_upload() {
    let h = Harness::new(BuildBehavior::Succeed, RecordingNotifier::default());
    h.plane.fail_call(
        &ResourceRef::new(ResourceKind::GlobalAddress, "example-com-ip"),
        "create",
        403,
        "quota exceeded",
    );
    let (deployment, archive) = h.queue_with(prod_config()).await;

    let status = h
        .state
        .orchestrator
        .run(&deployment.id, archive, deployment.config())
        .await
        .unwrap();
    assert_eq!(status, DeploymentStatus::Failed);

    let record = h.store.get(&deployment.id).await.unwrap().unwrap();
    assert_eq!(record.step_status(PipelineStep::Verify), StepStatus::Completed);
    assert_eq!(record.step_status(PipelineStep::Infra), StepStatus::Failed);
    assert_eq!(record.step_status(PipelineStep::Upload), StepStatus::Skipped);
    assert_eq!(record.step_status(PipelineStep::Notify), StepStatus::Completed);
    let error = record.error_message.unwrap();
    assert!(error.starts_with("Step INFRA failed: "), "{}", error);
    assert!(error.contains("quota exceeded"), "{}", error);

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].failed_step, Some(PipelineStep::Infra));
}

#[tokio::test(start_paused = true)]
async fn test_prod_delete_removes_everything() {
    let h = Harness::new(BuildBehavior::Succeed, RecordingNotifier::default());
    let (deployment, archive) = h.queue_with(prod_config()).await;
    h.state
        .orchestrator
        .run(&deployment.id, archive, deployment.config())
        .await
        .unwrap();

    let deleted = h.state.service.delete(&deployment.id).await.unwrap();
    assert!(deleted.deleted);

    for resource in [
        ResourceRef::new(ResourceKind::GlobalAddress, "example-com-ip"),
        ResourceRef::new(ResourceKind::StorageBucket, "example-com-bucket-prod"),
        ResourceRef::new(ResourceKind::UrlMap, "example-com-url-map"),
        ResourceRef::new(ResourceKind::ForwardingRule, "example-com-http-rule"),
        ResourceRef::new(ResourceKind::DnsZone, "example-com-zone"),
    ] {
        assert!(h.plane.resource(&resource).is_none(), "left behind {}", resource);
    }
    assert!(h.store.get(&deployment.id).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_cloudrun_deploy_publishes_the_service_url() {
    let h = Harness::new(BuildBehavior::Succeed, RecordingNotifier::default());
    let (deployment, archive) = h.queue_with(cloudrun_config()).await;

    let status = h
        .state
        .orchestrator
        .run(&deployment.id, archive, deployment.config())
        .await
        .unwrap();
    assert_eq!(status, DeploymentStatus::Success);

    let record = h.store.get(&deployment.id).await.unwrap().unwrap();
    assert_eq!(
        record.result_url.as_deref(),
        Some("https://my-app-dryrun.a.run.app")
    );
    assert_eq!(record.step_status(PipelineStep::Upload), StepStatus::Completed);
    assert_eq!(h.builder.calls(), vec!["build", "verify"]);

    let service = ResourceRef::within(
        ResourceKind::RunService,
        "my-app",
        h.options.cloudrun.region.clone(),
    );
    let state = h.plane.resource(&service).unwrap();
    let image = state["template"]["containers"][0]["image"].as_str().unwrap();
    assert!(image.starts_with("europe-west1-docker.pkg.dev/acme/cloud-run-images/my-app:"));
    assert!(image.ends_with(&deployment.id[..8]));

    let logs = h.store.list_logs(&deployment.id).await.unwrap();
    assert!(logs
        .iter()
        .any(|l| l.message == format!("Container image: {}", image)));

    // Deleting removes the service
    h.state.service.delete(&deployment.id).await.unwrap();
    assert!(h.plane.resource(&service).is_none());
}
