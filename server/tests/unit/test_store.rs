//! Behaviour shared by every store backend

use std::sync::Arc;

use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

use webdeploy::errors::DeployError;
use webdeploy::models::{
    Deployment, DeploymentConfig, DeploymentMode, DeploymentStatus, LogEntry, LogSeverity,
    PipelineStep, StepStatus,
};
use webdeploy::storage::layout::StorageLayout;
use webdeploy::store::{DeploymentStore, FileStore, MemoryStore};

async fn backends() -> (TempDir, Vec<(&'static str, Arc<dyn DeploymentStore>)>) {
    let root = tempfile::tempdir().unwrap();
    let file_store = FileStore::open(&StorageLayout::new(root.path()))
        .await
        .unwrap();
    let stores: Vec<(&'static str, Arc<dyn DeploymentStore>)> = vec![
        ("memory", Arc::new(MemoryStore::new())),
        ("file", Arc::new(file_store)),
    ];
    (root, stores)
}

fn deployment(name: &str) -> Deployment {
    Deployment::new(
        &DeploymentConfig {
            website_name: name.to_string(),
            mode: DeploymentMode::Demo,
            domain: None,
            notification_emails: vec![],
        },
        None,
    )
}

#[tokio::test]
async fn test_new_record_is_queued_with_pending_steps() {
    let (_root, stores) = backends().await;
    for (name, store) in stores {
        let record = deployment("my-site");
        store.create(&record).await.unwrap();

        let stored = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeploymentStatus::Queued, "{}", name);
        assert!(stored.current_step.is_none(), "{}", name);
        for step in PipelineStep::ALL {
            assert_eq!(stored.step_status(step), StepStatus::Pending, "{}", name);
        }
        assert!(store.list_logs(&record.id).await.unwrap().is_empty(), "{}", name);
    }
}

#[tokio::test]
async fn test_modify_missing_and_declined() {
    let (_root, stores) = backends().await;
    for (name, store) in stores {
        let missing = assert_err!(store.modify("nope", Box::new(|_| true)).await);
        assert!(matches!(missing, DeployError::NotFound(_)), "{}", name);

        let record = deployment("my-site");
        store.create(&record).await.unwrap();
        let written = assert_ok!(
            store
                .modify(
                    &record.id,
                    Box::new(|deployment| {
                        deployment.status = DeploymentStatus::Success;
                        false
                    }),
                )
                .await
        );
        assert!(!written, "{}", name);
        let stored = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeploymentStatus::Queued, "{}", name);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writes_are_not_lost() {
    let (_root, stores) = backends().await;
    for (name, store) in stores {
        let record = deployment("my-site");
        store.create(&record).await.unwrap();

        let mut tasks = Vec::new();
        for step in PipelineStep::ALL {
            let store = store.clone();
            let id = record.id.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .modify(
                        &id,
                        Box::new(move |deployment| {
                            deployment.steps_status.insert(step, StepStatus::Completed);
                            true
                        }),
                    )
                    .await
                    .unwrap();
            }));
        }
        let summary_store = store.clone();
        let id = record.id.clone();
        tasks.push(tokio::spawn(async move {
            summary_store
                .modify(
                    &id,
                    Box::new(|deployment| {
                        deployment.summary = Some("vite project".to_string());
                        true
                    }),
                )
                .await
                .unwrap();
        }));
        for task in tasks {
            task.await.unwrap();
        }

        let stored = store.get(&record.id).await.unwrap().unwrap();
        for step in PipelineStep::ALL {
            assert_eq!(stored.step_status(step), StepStatus::Completed, "{}", name);
        }
        assert_eq!(stored.summary.as_deref(), Some("vite project"), "{}", name);
    }
}

#[tokio::test]
async fn test_logs_keep_append_order() {
    let (_root, stores) = backends().await;
    for (name, store) in stores {
        let record = deployment("my-site");
        store.create(&record).await.unwrap();
        let other = deployment("other-site");
        store.create(&other).await.unwrap();

        for i in 0..20 {
            let step = PipelineStep::ALL[i % PipelineStep::ALL.len()];
            store
                .append_log(&LogEntry::new(
                    &record.id,
                    LogSeverity::Info,
                    Some(step),
                    format!("line {}", i),
                ))
                .await
                .unwrap();
        }
        store
            .append_log(&LogEntry::new(&other.id, LogSeverity::Error, None, "elsewhere"))
            .await
            .unwrap();

        let logs = store.list_logs(&record.id).await.unwrap();
        let messages: Vec<String> = logs.iter().map(|l| l.message.clone()).collect();
        let expected: Vec<String> = (0..20).map(|i| format!("line {}", i)).collect();
        assert_eq!(messages, expected, "{}", name);
        assert_eq!(store.list_logs(&other.id).await.unwrap().len(), 1, "{}", name);
    }
}

#[tokio::test]
async fn test_list_by_status_and_delete() {
    let (_root, stores) = backends().await;
    for (name, store) in stores {
        let queued = deployment("queued-site");
        let mut running = deployment("running-site");
        running.status = DeploymentStatus::Running;
        let mut done = deployment("done-site");
        done.status = DeploymentStatus::Success;
        for record in [&queued, &running, &done] {
            store.create(record).await.unwrap();
        }

        let mut active: Vec<String> = store
            .list_by_status(&[DeploymentStatus::Queued, DeploymentStatus::Running])
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.website_name)
            .collect();
        active.sort();
        assert_eq!(active, vec!["queued-site", "running-site"], "{}", name);

        assert!(store.delete(&done.id).await.unwrap(), "{}", name);
        assert!(!store.delete(&done.id).await.unwrap(), "{}", name);
        assert_eq!(store.list(100, 0).await.unwrap().len(), 2, "{}", name);
    }
}
