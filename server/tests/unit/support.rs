//! Shared fixtures: fake collaborators and a wired-up service

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;

use webdeploy::app::options::AppOptions;
use webdeploy::app::state::{AppState, CloudHandles};
use webdeploy::cloud::{DryRunControlPlane, ResourceKind, ResourceRef};
use webdeploy::errors::DeployError;
use webdeploy::filesys::dir::Dir;
use webdeploy::logstream::ProgressSink;
use webdeploy::models::{Deployment, DeploymentConfig, DeploymentMode};
use webdeploy::pipeline::{
    BuildRequest, Builder, Collaborators, Notification, Notifier, ProjectDescriptor,
    SourceProcessor,
};
use webdeploy::services::{PassthroughInspector, StorageUploader};
use webdeploy::storage::layout::StorageLayout;
use webdeploy::storage::settings::StoreBackend;
use webdeploy::store::{DeploymentStore, MemoryStore};

pub const ZIP: &[u8] = b"PK\x03\x04fake-archive";

/// Writes a small built site into the work directory
pub struct SiteSource;

#[async_trait]
impl SourceProcessor for SiteSource {
    async fn process(
        &self,
        _archive: &Path,
        work_dir: &Dir,
        _mode: DeploymentMode,
        sink: &dyn ProgressSink,
    ) -> Result<ProjectDescriptor, DeployError> {
        let source_dir = work_dir.path().join("source");
        let output_dir = source_dir.join("dist");
        tokio::fs::create_dir_all(output_dir.join("assets")).await?;
        tokio::fs::write(output_dir.join("index.html"), "<h1>hello</h1>").await?;
        tokio::fs::write(output_dir.join("assets").join("app.js"), "console.log(1)").await?;
        sink.info("Extracted fixture site".to_string()).await;

        Ok(ProjectDescriptor {
            source_dir,
            output_dir,
            is_static: false,
            framework: Some("vite".to_string()),
            has_router: false,
        })
    }
}

/// How the fake builder behaves on `build`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildBehavior {
    Succeed,
    Fail(String),
    Hang,
    Panic,
}

pub struct FakeBuilder {
    behavior: BuildBehavior,
    pub calls: Mutex<Vec<&'static str>>,
}

impl FakeBuilder {
    pub fn new(behavior: BuildBehavior) -> Self {
        Self {
            behavior,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Builder for FakeBuilder {
    async fn build(
        &self,
        _project: &ProjectDescriptor,
        _request: &BuildRequest,
        _sink: &dyn ProgressSink,
    ) -> Result<(), DeployError> {
        self.calls.lock().unwrap().push("build");
        match &self.behavior {
            BuildBehavior::Succeed => Ok(()),
            BuildBehavior::Fail(message) => Err(DeployError::CommandError(message.clone())),
            BuildBehavior::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
            BuildBehavior::Panic => panic!("bundler crashed"),
        }
    }

    async fn verify(
        &self,
        _project: &ProjectDescriptor,
        _request: &BuildRequest,
        _sink: &dyn ProgressSink,
    ) -> Result<(), DeployError> {
        self.calls.lock().unwrap().push("verify");
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub fail: bool,
    pub sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), DeployError> {
        self.sent.lock().unwrap().push(notification.clone());
        if self.fail {
            return Err(DeployError::NotificationError("mail relay down".to_string()));
        }
        Ok(())
    }
}

/// The demo load balancer every demo site is routed through
pub fn seed_demo_lb(plane: &DryRunControlPlane) {
    plane.seed(
        ResourceRef::new(ResourceKind::UrlMap, "test-lb"),
        json!({
            "name": "test-lb",
            "hostRules": [{ "hosts": ["digitaldatatest.com"], "pathMatcher": "demo" }],
            "pathMatchers": [{ "name": "demo", "pathRules": [] }],
        }),
    );
}

pub struct Harness {
    pub root: TempDir,
    pub options: AppOptions,
    pub store: Arc<MemoryStore>,
    pub plane: Arc<DryRunControlPlane>,
    pub builder: Arc<FakeBuilder>,
    pub notifier: Arc<RecordingNotifier>,
    pub state: AppState,
}

impl Harness {
    pub fn new(behavior: BuildBehavior, notifier: RecordingNotifier) -> Self {
        Self::with_deadline(behavior, notifier, Duration::from_secs(900))
    }

    pub fn with_deadline(
        behavior: BuildBehavior,
        notifier: RecordingNotifier,
        max_duration: Duration,
    ) -> Self {
        let root = tempfile::tempdir().unwrap();
        let mut options = AppOptions::default();
        options.storage.layout = StorageLayout::new(root.path());
        options.storage.backend = StoreBackend::Memory;
        options.pipeline.max_duration = max_duration;
        options.notification.recipients = vec!["ops@example.com".to_string()];

        let store = Arc::new(MemoryStore::new());
        let plane = Arc::new(DryRunControlPlane::new("acme", 1));
        seed_demo_lb(&plane);

        let builder = Arc::new(FakeBuilder::new(behavior));
        let notifier = Arc::new(notifier);
        let collaborators = Collaborators {
            source: Arc::new(SiteSource),
            inspector: Arc::new(PassthroughInspector),
            builder: builder.clone(),
            uploader: Arc::new(StorageUploader::new(plane.clone())),
            notifier: notifier.clone(),
        };

        let state = AppState::assemble(
            &options,
            store.clone(),
            CloudHandles::dry_run(plane.clone()),
            collaborators,
        );

        Self {
            root,
            options,
            store,
            plane,
            builder,
            notifier,
            state,
        }
    }

    /// Store a queued record and its archive, returning the record
    pub async fn queue(&self, website_name: &str, mode: DeploymentMode) -> (Deployment, PathBuf) {
        self.queue_with(DeploymentConfig {
            website_name: website_name.to_string(),
            mode,
            domain: None,
            notification_emails: vec!["dev@example.com".to_string()],
        })
        .await
    }

    pub async fn queue_with(&self, config: DeploymentConfig) -> (Deployment, PathBuf) {
        let deployment = Deployment::new(&config, Some("site.zip".to_string()));
        let archive = self.options.storage.layout.upload_file(&deployment.id);
        archive.write_bytes(ZIP).await.unwrap();
        self.store.create(&deployment).await.unwrap();
        (deployment, archive.path().to_path_buf())
    }

    /// Poll the store until the record leaves Queued/Running
    pub async fn wait_terminal(&self, id: &str) -> Deployment {
        for _ in 0..400 {
            let deployment = self.store.get(id).await.unwrap().unwrap();
            if deployment.status.is_terminal() {
                return deployment;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("deployment {} never finished", id);
    }
}
