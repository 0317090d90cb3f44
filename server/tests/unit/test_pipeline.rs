//! End-to-end pipeline runs against the dry-run control plane

use std::time::Duration;

use webdeploy::cloud::{ResourceKind, ResourceRef};
use webdeploy::filesys::file::File;
use webdeploy::models::{DeploymentMode, DeploymentStatus, LogSeverity, PipelineStep, StepStatus};
use webdeploy::pipeline::recovery::force_fail;
use webdeploy::store::DeploymentStore;

use crate::support::{BuildBehavior, Harness, RecordingNotifier};

#[tokio::test(start_paused = true)]
async fn test_demo_deploy_succeeds() {
    let h = Harness::new(BuildBehavior::Succeed, RecordingNotifier::default());
    let (deployment, archive) = h.queue("my-site", DeploymentMode::Demo).await;

    let status = h
        .state
        .orchestrator
        .run(&deployment.id, archive.clone(), deployment.config())
        .await
        .unwrap();
    assert_eq!(status, DeploymentStatus::Success);

    let record = h.store.get(&deployment.id).await.unwrap().unwrap();
    assert_eq!(record.status, DeploymentStatus::Success);
    assert!(record
        .steps_status
        .values()
        .all(|s| *s == StepStatus::Completed));
    assert_eq!(
        record.result_url.as_deref(),
        Some("https://digitaldatatest.com/my-site/")
    );
    assert_eq!(record.summary.as_deref(), Some("vite project"));
    assert!(record.error_message.is_none());
    assert!(record.started_at.is_some());
    assert!(record.completed_at.is_some());

    // Infra created the site's resources and routed it
    let created: Vec<ResourceRef> = h
        .plane
        .mutating_calls()
        .into_iter()
        .filter(|call| call.verb == "create")
        .map(|call| call.resource)
        .collect();
    assert!(created.contains(&ResourceRef::new(
        ResourceKind::StorageBucket,
        "demo-my-site-bucket-demo"
    )));
    assert!(created.contains(&ResourceRef::new(
        ResourceKind::BackendBucket,
        "demo-my-site-backend-demo"
    )));
    let map = h
        .plane
        .resource(&ResourceRef::new(ResourceKind::UrlMap, "test-lb"))
        .unwrap();
    assert_eq!(
        map["pathMatchers"][0]["pathRules"][0]["paths"],
        serde_json::json!(["/my-site", "/my-site/*"])
    );

    // Files landed under the site prefix
    let objects = h.plane.objects("demo-my-site-bucket-demo");
    assert_eq!(objects.len(), 2);
    assert_eq!(
        objects["my-site/index.html"].cache_control,
        "no-cache, no-store, must-revalidate"
    );
    assert_eq!(objects["my-site/assets/app.js"].cache_control, "public, max-age=3600");

    // Exactly one successful notification to the merged recipients
    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].success);
    assert_eq!(sent[0].url.as_deref(), Some("https://digitaldatatest.com/my-site/"));
    assert_eq!(sent[0].recipients, vec!["ops@example.com", "dev@example.com"]);

    // Scratch space and the archive are gone
    assert!(!File::new(&archive).exists().await);
    assert!(!h
        .options
        .storage
        .layout
        .work_dir()
        .subdir(&deployment.id)
        .exists()
        .await);

    let logs = h.store.list_logs(&deployment.id).await.unwrap();
    assert_eq!(logs.first().unwrap().message, "Pipeline started");
    assert_eq!(
        logs.last().unwrap().message,
        "Pipeline completed successfully. URL: https://digitaldatatest.com/my-site/"
    );
}

#[tokio::test(start_paused = true)]
async fn test_build_failure_skips_later_steps_and_notifies() {
    let h = Harness::new(
        BuildBehavior::Fail("npm exited with 1".to_string()),
        RecordingNotifier::default(),
    );
    let (deployment, archive) = h.queue("my-site", DeploymentMode::Demo).await;

    let status = h
        .state
        .orchestrator
        .run(&deployment.id, archive, deployment.config())
        .await
        .unwrap();
    assert_eq!(status, DeploymentStatus::Failed);

    let record = h.store.get(&deployment.id).await.unwrap().unwrap();
    assert_eq!(record.status, DeploymentStatus::Failed);
    for step in [PipelineStep::Extract, PipelineStep::AiInspect, PipelineStep::AiFix] {
        assert_eq!(record.step_status(step), StepStatus::Completed);
    }
    assert_eq!(record.step_status(PipelineStep::Build), StepStatus::Failed);
    for step in [PipelineStep::Verify, PipelineStep::Infra, PipelineStep::Upload] {
        assert_eq!(record.step_status(step), StepStatus::Skipped);
    }
    assert_eq!(record.step_status(PipelineStep::Notify), StepStatus::Completed);
    assert_eq!(
        record.error_message.as_deref(),
        Some("Step BUILD failed: Command error: npm exited with 1")
    );
    assert!(record.result_url.is_none());

    // Verify never ran and no infrastructure was touched
    assert_eq!(h.builder.calls(), vec!["build"]);
    assert!(h.plane.mutating_calls().is_empty());

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert!(!sent[0].success);
    assert_eq!(sent[0].failed_step, Some(PipelineStep::Build));
    assert_eq!(sent[0].error.as_deref(), Some("Command error: npm exited with 1"));

    let logs = h.store.list_logs(&deployment.id).await.unwrap();
    assert!(logs
        .iter()
        .any(|l| l.message == "Skipping step: INFRA" && l.step == Some(PipelineStep::Infra)));
    assert_eq!(logs.last().unwrap().message, "Pipeline FAILED at step BUILD");
    assert_eq!(logs.last().unwrap().level, LogSeverity::Error);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_step_fails_but_still_notifies_and_cleans_up() {
    let h = Harness::new(BuildBehavior::Panic, RecordingNotifier::default());
    let (deployment, archive) = h.queue("my-site", DeploymentMode::Demo).await;

    h.state
        .orchestrator
        .spawn(deployment.id.clone(), archive.clone(), deployment.config())
        .await
        .unwrap();

    let record = h.store.get(&deployment.id).await.unwrap().unwrap();
    assert_eq!(record.status, DeploymentStatus::Failed);
    assert_eq!(record.step_status(PipelineStep::Build), StepStatus::Failed);
    for step in [PipelineStep::Verify, PipelineStep::Infra, PipelineStep::Upload] {
        assert_eq!(record.step_status(step), StepStatus::Skipped);
    }
    assert_eq!(record.step_status(PipelineStep::Notify), StepStatus::Completed);
    let error = record.error_message.unwrap();
    assert!(error.contains("bundler crashed"), "{}", error);

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].failed_step, Some(PipelineStep::Build));

    assert!(!File::new(&archive).exists().await);
    assert!(!h
        .options
        .storage
        .layout
        .work_dir()
        .subdir(&deployment.id)
        .exists()
        .await);
}

#[tokio::test(start_paused = true)]
async fn test_rerun_with_matching_resources_makes_no_infra_calls() {
    let h = Harness::new(BuildBehavior::Succeed, RecordingNotifier::default());

    let (first, archive) = h.queue("my-site", DeploymentMode::Demo).await;
    h.state
        .orchestrator
        .run(&first.id, archive, first.config())
        .await
        .unwrap();
    let infra_calls = |calls: Vec<webdeploy::cloud::dry_run::RecordedCall>| {
        calls
            .into_iter()
            .filter(|call| call.verb != "invalidate")
            .count()
    };
    let before = infra_calls(h.plane.mutating_calls());
    assert!(before > 0);

    let (second, archive) = h.queue("my-site", DeploymentMode::Demo).await;
    let status = h
        .state
        .orchestrator
        .run(&second.id, archive, second.config())
        .await
        .unwrap();

    assert_eq!(status, DeploymentStatus::Success);
    assert_eq!(infra_calls(h.plane.mutating_calls()), before);
}

#[tokio::test(start_paused = true)]
async fn test_hung_step_hits_the_deadline() {
    let h = Harness::with_deadline(
        BuildBehavior::Hang,
        RecordingNotifier::default(),
        Duration::from_secs(60),
    );
    let (deployment, archive) = h.queue("my-site", DeploymentMode::Demo).await;

    let started = tokio::time::Instant::now();
    let status = h
        .state
        .orchestrator
        .run(&deployment.id, archive.clone(), deployment.config())
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(status, DeploymentStatus::Failed);
    assert!(elapsed >= Duration::from_secs(60));
    assert!(elapsed < Duration::from_secs(65));

    let record = h.store.get(&deployment.id).await.unwrap().unwrap();
    assert_eq!(record.status, DeploymentStatus::Failed);
    assert_eq!(
        record.error_message.as_deref(),
        Some("Pipeline timed out after 60s. The build may be too large or a step hung.")
    );
    assert!(record.completed_at.is_some());

    // No notification on the deadline path, and scratch space is still cleaned
    assert!(h.notifier.sent().is_empty());
    assert!(!File::new(&archive).exists().await);

    let logs = h.store.list_logs(&deployment.id).await.unwrap();
    assert!(logs.iter().any(|l| l.level == LogSeverity::Warning
        && l.message == "No notification is sent for a run that hit the deadline"));
}

#[tokio::test(start_paused = true)]
async fn test_notification_failure_keeps_success() {
    let h = Harness::new(BuildBehavior::Succeed, RecordingNotifier::failing());
    let (deployment, archive) = h.queue("my-site", DeploymentMode::Demo).await;

    let status = h
        .state
        .orchestrator
        .run(&deployment.id, archive, deployment.config())
        .await
        .unwrap();
    assert_eq!(status, DeploymentStatus::Success);

    let record = h.store.get(&deployment.id).await.unwrap().unwrap();
    assert_eq!(record.status, DeploymentStatus::Success);
    assert_eq!(record.step_status(PipelineStep::Notify), StepStatus::Failed);
    assert!(record.error_message.is_none());
    assert_eq!(h.notifier.sent().len(), 1);

    let logs = h.store.list_logs(&deployment.id).await.unwrap();
    assert!(logs.iter().any(|l| l.level == LogSeverity::Warning
        && l.message == "Notification failed: Notification error: mail relay down"));
}

#[tokio::test(start_paused = true)]
async fn test_forced_failure_is_not_overwritten() {
    let h = Harness::with_deadline(
        BuildBehavior::Hang,
        RecordingNotifier::default(),
        Duration::from_secs(120),
    );
    let (deployment, archive) = h.queue("my-site", DeploymentMode::Demo).await;

    let handle = h
        .state
        .orchestrator
        .spawn(deployment.id.clone(), archive, deployment.config());

    // Wait for the run to reach the hanging build
    for _ in 0..1000 {
        let record = h.store.get(&deployment.id).await.unwrap().unwrap();
        if record.step_status(PipelineStep::Build) == StepStatus::Running {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let forced = force_fail(
        &h.state.store,
        &h.state.broker,
        &deployment.id,
        "Pipeline timed out after 900s at step BUILD. Please retry.".to_string(),
    )
    .await
    .unwrap();
    assert!(forced);

    handle.await.unwrap();

    let record = h.store.get(&deployment.id).await.unwrap().unwrap();
    assert_eq!(record.status, DeploymentStatus::Failed);
    assert_eq!(
        record.error_message.as_deref(),
        Some("Pipeline timed out after 900s at step BUILD. Please retry.")
    );
    assert_eq!(record.step_status(PipelineStep::Build), StepStatus::Failed);
    assert_eq!(record.step_status(PipelineStep::Notify), StepStatus::Skipped);
}

#[tokio::test]
async fn test_run_ignores_records_that_are_not_queued() {
    let h = Harness::new(BuildBehavior::Succeed, RecordingNotifier::default());
    let (deployment, archive) = h.queue("my-site", DeploymentMode::Demo).await;
    force_fail(
        &h.state.store,
        &h.state.broker,
        &deployment.id,
        "Deployment was interrupted by a restart during step UNKNOWN. Please retry.".to_string(),
    )
    .await
    .unwrap();

    let status = h
        .state
        .orchestrator
        .run(&deployment.id, archive, deployment.config())
        .await
        .unwrap();

    assert_eq!(status, DeploymentStatus::Failed);
    assert!(h.builder.calls().is_empty());
    assert!(h.notifier.sent().is_empty());
}
