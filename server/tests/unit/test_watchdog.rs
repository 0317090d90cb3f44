//! Watchdog sweeps and restart recovery

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot;

use webdeploy::logstream::LogBroker;
use webdeploy::models::{
    Deployment, DeploymentConfig, DeploymentMode, DeploymentStatus, LogSeverity, PipelineStep,
    StepStatus,
};
use webdeploy::pipeline::recovery::{recover_interrupted, sweep_overdue};
use webdeploy::store::{DeploymentStore, MemoryStore};
use webdeploy::workers::watchdog;

fn running(name: &str, started_minutes_ago: i64) -> Deployment {
    let mut deployment = Deployment::new(
        &DeploymentConfig {
            website_name: name.to_string(),
            mode: DeploymentMode::Demo,
            domain: None,
            notification_emails: vec![],
        },
        None,
    );
    deployment.status = DeploymentStatus::Running;
    deployment.started_at = Some(Utc::now() - chrono::Duration::minutes(started_minutes_ago));
    deployment.current_step = Some(PipelineStep::Build);
    deployment
        .steps_status
        .insert(PipelineStep::Extract, StepStatus::Completed);
    deployment
        .steps_status
        .insert(PipelineStep::Build, StepStatus::Running);
    deployment
}

fn setup() -> (Arc<dyn DeploymentStore>, Arc<LogBroker>) {
    (Arc::new(MemoryStore::new()), Arc::new(LogBroker::new(16)))
}

#[tokio::test]
async fn test_sweep_fails_only_overdue_runs() {
    let (store, broker) = setup();
    let stale = running("stale-site", 30);
    let fresh = running("fresh-site", 2);
    store.create(&stale).await.unwrap();
    store.create(&fresh).await.unwrap();

    let swept = sweep_overdue(&store, &broker, Duration::from_secs(900))
        .await
        .unwrap();
    assert_eq!(swept, 1);

    let failed = store.get(&stale.id).await.unwrap().unwrap();
    assert_eq!(failed.status, DeploymentStatus::Failed);
    let message = failed.error_message.clone().unwrap();
    assert!(message.starts_with("Pipeline timed out after 18"), "{}", message);
    assert!(message.ends_with("s at step BUILD. Please retry."), "{}", message);
    assert_eq!(failed.step_status(PipelineStep::Extract), StepStatus::Completed);
    assert_eq!(failed.step_status(PipelineStep::Build), StepStatus::Failed);
    assert_eq!(failed.step_status(PipelineStep::Notify), StepStatus::Skipped);
    assert!(failed.completed_at.is_some());

    let logs = store.list_logs(&stale.id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].level, LogSeverity::Error);

    let untouched = store.get(&fresh.id).await.unwrap().unwrap();
    assert_eq!(untouched.status, DeploymentStatus::Running);

    // A second sweep finds nothing left to do
    let swept = sweep_overdue(&store, &broker, Duration::from_secs(900))
        .await
        .unwrap();
    assert_eq!(swept, 0);
}

#[tokio::test]
async fn test_sweep_ignores_runs_without_start_time() {
    let (store, broker) = setup();
    let mut odd = running("odd-site", 60);
    odd.started_at = None;
    store.create(&odd).await.unwrap();

    assert_eq!(
        sweep_overdue(&store, &broker, Duration::from_secs(60))
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn test_forced_failure_reaches_live_listeners() {
    let (store, broker) = setup();
    let stale = running("stale-site", 30);
    store.create(&stale).await.unwrap();
    let mut subscription = broker.subscribe(&stale.id);

    sweep_overdue(&store, &broker, Duration::from_secs(900))
        .await
        .unwrap();

    match subscription.next(Duration::from_secs(1)).await {
        webdeploy::logstream::Delivery::Message(entry) => {
            assert_eq!(entry.level, LogSeverity::Error);
            assert!(entry.message.starts_with("Pipeline timed out"));
        }
        other => panic!("expected a log line, got {:?}", other),
    }
}

#[tokio::test]
async fn test_worker_sweeps_until_shutdown() {
    let (store, broker) = setup();
    let stale = running("stale-site", 30);
    store.create(&stale).await.unwrap();

    let options = watchdog::Options {
        interval: Duration::from_secs(120),
        max_age: Duration::from_secs(900),
    };
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let sleeps = Arc::new(AtomicUsize::new(0));
    let counter = sleeps.clone();
    let sleep_fn = move |_: Duration| {
        counter.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now()
    };

    let worker = tokio::spawn({
        let store = store.clone();
        let broker = broker.clone();
        async move {
            watchdog::run(
                &options,
                store,
                broker,
                sleep_fn,
                Box::pin(async move {
                    let _ = shutdown_rx.await;
                }),
            )
            .await
        }
    });

    for _ in 0..500 {
        if store.get(&stale.id).await.unwrap().unwrap().status == DeploymentStatus::Failed {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(
        store.get(&stale.id).await.unwrap().unwrap().status,
        DeploymentStatus::Failed
    );
    assert!(sleeps.load(Ordering::SeqCst) >= 1);

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), worker)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_restart_recovery_fails_leftover_runs() {
    let (store, broker) = setup();
    let interrupted = running("busy-site", 1);
    let mut finished = running("done-site", 1);
    finished.status = DeploymentStatus::Success;
    store.create(&interrupted).await.unwrap();
    store.create(&finished).await.unwrap();

    assert_eq!(recover_interrupted(&store, &broker).await.unwrap(), 1);

    let recovered = store.get(&interrupted.id).await.unwrap().unwrap();
    assert_eq!(recovered.status, DeploymentStatus::Failed);
    assert_eq!(
        recovered.error_message.as_deref(),
        Some("Deployment was interrupted by a restart during step BUILD. Please retry.")
    );
    let finished = store.get(&finished.id).await.unwrap().unwrap();
    assert_eq!(finished.status, DeploymentStatus::Success);
}
