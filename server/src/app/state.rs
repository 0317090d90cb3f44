//! Application state management

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::app::options::AppOptions;
use crate::app::service::DeploymentService;
use crate::cloud::{
    ControlPlane, DryRunControlPlane, GcpControlPlane, ObjectSink, OperationTimeouts,
    ResourceEnsurer,
};
use crate::errors::DeployError;
use crate::logstream::LogBroker;
use crate::pipeline::{Collaborators, Notifier, Orchestrator, PipelineOptions};
use crate::provision::{
    CloudRunProvisioner, DemoProvisioner, ProdProvisioner, Provisioner, ProvisionerSet,
};
use crate::services::{
    ArchiveExtractor, CommandBuilder, GmailNotifier, LogNotifier, PassthroughInspector,
    StorageUploader, WebhookNotifier,
};
use crate::storage::settings::{CloudBackend, CloudSettings, StoreBackend};
use crate::store::{DeploymentStore, FileStore, MemoryStore};

/// Control plane handles shared by provisioning and uploads
#[derive(Clone)]
pub struct CloudHandles {
    pub plane: Arc<dyn ControlPlane>,
    pub objects: Arc<dyn ObjectSink>,
    pub project_id: String,
}

impl CloudHandles {
    pub fn dry_run(plane: Arc<DryRunControlPlane>) -> Self {
        Self {
            project_id: plane.project_id().to_string(),
            plane: plane.clone(),
            objects: plane,
        }
    }

    /// Connect to the configured backend
    pub async fn connect(settings: &CloudSettings) -> Result<Self, DeployError> {
        match settings.backend {
            CloudBackend::Gcp => {
                let plane = Arc::new(GcpControlPlane::connect(&settings.project_id).await?);
                Ok(Self {
                    project_id: plane.project_id().to_string(),
                    plane: plane.clone(),
                    objects: plane,
                })
            }
            CloudBackend::DryRun => {
                let project_id = if settings.project_id.is_empty() {
                    "dry-run"
                } else {
                    settings.project_id.as_str()
                };
                info!("Using the dry-run control plane for project {}", project_id);
                Ok(Self::dry_run(Arc::new(DryRunControlPlane::new(
                    project_id,
                    settings.dry_run_polls,
                ))))
            }
        }
    }
}

/// Main application state
pub struct AppState {
    /// Deployment records and their logs
    pub store: Arc<dyn DeploymentStore>,

    /// Live log fan-out
    pub broker: Arc<LogBroker>,

    /// Runs pipelines in the background
    pub orchestrator: Arc<Orchestrator>,

    /// Submission and query operations
    pub service: Arc<DeploymentService>,

    /// Idle time before a live log listener gets a heartbeat
    pub heartbeat: Duration,
}

impl AppState {
    /// Initialize application state from options
    pub async fn init(options: &AppOptions) -> Result<Self, DeployError> {
        info!("Initializing application state...");

        let layout = &options.storage.layout;
        layout.setup().await?;

        let store: Arc<dyn DeploymentStore> = match options.storage.backend {
            StoreBackend::File => Arc::new(FileStore::open(layout).await?),
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
        };

        let cloud = CloudHandles::connect(&options.cloud).await?;
        let collaborators = default_collaborators(options, &cloud)?;

        Ok(Self::assemble(options, store, cloud, collaborators))
    }

    /// Wire the pipeline and service around the given store, control plane
    /// and collaborators
    pub fn assemble(
        options: &AppOptions,
        store: Arc<dyn DeploymentStore>,
        cloud: CloudHandles,
        collaborators: Collaborators,
    ) -> Self {
        let broker = Arc::new(LogBroker::new(options.log_stream.listener_capacity));

        let ensurer = ResourceEnsurer::new(
            cloud.plane.clone(),
            OperationTimeouts {
                compute: Duration::from_secs(options.cloud.operation_timeout_secs),
                run: Duration::from_secs(options.cloud.run_operation_timeout_secs),
            },
        );

        let provisioners = ProvisionerSet::new(vec![
            Arc::new(DemoProvisioner::new(ensurer.clone(), options.demo.clone()))
                as Arc<dyn Provisioner>,
            Arc::new(ProdProvisioner::new(ensurer.clone(), options.prod.clone())),
            Arc::new(CloudRunProvisioner::new(
                ensurer.clone(),
                options.cloudrun.clone(),
            )),
        ]);

        let pipeline_options = PipelineOptions {
            max_duration: options.pipeline.max_duration,
            project_id: cloud.project_id.clone(),
            region: options.cloudrun.region.clone(),
            artifact_repo: options.cloudrun.artifact_repo.clone(),
            recipients: options.notification.recipients.clone(),
            work_root: options.storage.layout.work_dir(),
        };

        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            broker.clone(),
            provisioners.clone(),
            ensurer,
            collaborators,
            pipeline_options,
        ));

        let service = Arc::new(DeploymentService::new(
            store.clone(),
            broker.clone(),
            orchestrator.clone(),
            provisioners,
            options.storage.layout.clone(),
        ));

        Self {
            store,
            broker,
            orchestrator,
            service,
            heartbeat: options.log_stream.heartbeat,
        }
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), DeployError> {
        info!(
            "Shutting down application state ({} live log channels)...",
            self.broker.channel_count()
        );
        Ok(())
    }
}

/// Collaborators backed by local tools and the connected control plane
pub fn default_collaborators(
    options: &AppOptions,
    cloud: &CloudHandles,
) -> Result<Collaborators, DeployError> {
    let notification = &options.notification;
    let notifier: Arc<dyn Notifier> = match (&notification.gmail, &notification.webhook_url) {
        (Some(gmail), _) => {
            info!("Outcome notifications are emailed as {}", gmail.delegated_user);
            Arc::new(GmailNotifier::from_settings(gmail)?)
        }
        (None, Some(url)) if !url.trim().is_empty() => {
            info!("Outcome notifications are posted to {}", url);
            Arc::new(WebhookNotifier::new(url)?)
        }
        _ => Arc::new(LogNotifier),
    };

    Ok(Collaborators {
        source: Arc::new(ArchiveExtractor::default()),
        inspector: Arc::new(PassthroughInspector),
        builder: Arc::new(CommandBuilder::new(
            &cloud.project_id,
            options.pipeline.command_timeout,
        )),
        uploader: Arc::new(StorageUploader::new(cloud.objects.clone())),
        notifier,
    })
}
