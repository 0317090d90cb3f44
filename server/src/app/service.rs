//! Submission and query operations behind the HTTP API

use std::sync::{Arc, OnceLock};

use deploy_api::models::{DeletionResponse, DeploymentCreateResponse};
use regex::Regex;
use tracing::{error, info, warn};

use crate::errors::DeployError;
use crate::logstream::{LogBroker, LogSubscription, ProgressSink};
use crate::models::{
    Deployment, DeploymentConfig, DeploymentMode, DeploymentStatus, LogEntry, LogSeverity,
};
use crate::pipeline::Orchestrator;
use crate::provision::{ProvisionRequest, ProvisionerSet};
use crate::storage::layout::StorageLayout;
use crate::store::DeploymentStore;

const SLUG_PATTERN: &str = r"^[a-z0-9][a-z0-9-]*[a-z0-9]$";
const MIN_NAME_LEN: usize = 2;
const MAX_NAME_LEN: usize = 63;
const ZIP_MAGIC: &[u8] = b"PK";

static SLUG_RE: OnceLock<Regex> = OnceLock::new();

fn slug_re() -> Result<&'static Regex, DeployError> {
    if let Some(re) = SLUG_RE.get() {
        return Ok(re);
    }
    let re = Regex::new(SLUG_PATTERN).map_err(|e| DeployError::Internal(e.to_string()))?;
    Ok(SLUG_RE.get_or_init(|| re))
}

/// Raw submission parameters, validated by [`DeploymentService::submit`]
#[derive(Debug, Clone, Default)]
pub struct SubmitRequest {
    pub website_name: String,
    pub mode: String,
    pub domain: Option<String>,
    /// Comma separated list
    pub notification_emails: Option<String>,
    pub archive_name: Option<String>,
}

impl SubmitRequest {
    /// Check every field and turn the request into a deployment config
    pub fn validate(&self, archive: &[u8]) -> Result<DeploymentConfig, DeployError> {
        let mode: DeploymentMode = self.mode.parse().map_err(DeployError::ValidationError)?;

        let website_name = self.website_name.trim().to_lowercase();
        if website_name.len() < MIN_NAME_LEN
            || website_name.len() > MAX_NAME_LEN
            || !slug_re()?.is_match(&website_name)
        {
            return Err(DeployError::ValidationError(format!(
                "Invalid website_name '{}'. Must be lowercase, alphanumeric with hyphens, \
                 between {} and {} characters (e.g. 'my-site').",
                self.website_name, MIN_NAME_LEN, MAX_NAME_LEN
            )));
        }

        let domain = self
            .domain
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_lowercase);
        if mode == DeploymentMode::Prod && domain.is_none() {
            return Err(DeployError::ValidationError(
                "A domain is required for production deployments.".to_string(),
            ));
        }

        if archive.is_empty() {
            return Err(DeployError::ValidationError(
                "Uploaded archive is empty.".to_string(),
            ));
        }
        if !archive.starts_with(ZIP_MAGIC) {
            return Err(DeployError::ValidationError(
                "Uploaded file must be a .zip archive.".to_string(),
            ));
        }

        let notification_emails = self
            .notification_emails
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string)
            .collect();

        Ok(DeploymentConfig {
            website_name,
            mode,
            domain,
            notification_emails,
        })
    }
}

/// Front door for deployments: accepts submissions, answers queries and
/// tears deployments down
pub struct DeploymentService {
    store: Arc<dyn DeploymentStore>,
    broker: Arc<LogBroker>,
    orchestrator: Arc<Orchestrator>,
    provisioners: ProvisionerSet,
    layout: StorageLayout,
}

impl DeploymentService {
    pub fn new(
        store: Arc<dyn DeploymentStore>,
        broker: Arc<LogBroker>,
        orchestrator: Arc<Orchestrator>,
        provisioners: ProvisionerSet,
        layout: StorageLayout,
    ) -> Self {
        Self {
            store,
            broker,
            orchestrator,
            provisioners,
            layout,
        }
    }

    /// Validate, persist the archive and the queued record, then start the
    /// run in the background
    pub async fn submit(
        &self,
        request: SubmitRequest,
        archive: &[u8],
    ) -> Result<DeploymentCreateResponse, DeployError> {
        let config = request.validate(archive)?;
        let deployment = Deployment::new(&config, request.archive_name.clone());

        let upload = self.layout.upload_file(&deployment.id);
        upload.write_bytes(archive).await?;
        info!(
            "Saved {} byte archive for deployment {} -> {}",
            archive.len(),
            deployment.id,
            upload.path().display()
        );

        if let Err(e) = self.store.create(&deployment).await {
            if let Err(cleanup) = upload.delete().await {
                warn!("Failed to remove archive {}: {}", upload.path().display(), cleanup);
            }
            return Err(e);
        }

        self.orchestrator.spawn(
            deployment.id.clone(),
            upload.path().to_path_buf(),
            config.clone(),
        );

        info!(
            "Deployment {} queued (mode={}, website={})",
            deployment.id, config.mode, config.website_name
        );
        Ok(DeploymentCreateResponse {
            deployment_id: deployment.id,
            status: DeploymentStatus::Queued,
        })
    }

    pub async fn get(&self, id: &str) -> Result<Deployment, DeployError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| DeployError::NotFound(format!("Deployment '{}' not found.", id)))
    }

    pub async fn list(&self, limit: usize, offset: usize) -> Result<Vec<Deployment>, DeployError> {
        self.store.list(limit, offset).await
    }

    pub async fn logs(&self, id: &str) -> Result<Vec<LogEntry>, DeployError> {
        self.get(id).await?;
        self.store.list_logs(id).await
    }

    /// Tear down the deployment's cloud resources, then remove its record and
    /// logs. Non-critical teardown failures come back as warnings; a critical
    /// one keeps the record so the deletion can be retried.
    pub async fn delete(&self, id: &str) -> Result<DeletionResponse, DeployError> {
        let deployment = self.get(id).await?;
        if deployment.is_active() {
            return Err(DeployError::Conflict(format!(
                "Deployment '{}' is still {}; wait for it to finish before deleting it.",
                id, deployment.status
            )));
        }

        let provisioner = self.provisioners.get(deployment.mode)?;
        let request =
            ProvisionRequest::new(&deployment.website_name, deployment.domain.as_deref());
        let sink = TeardownLog { deployment_id: id };
        let report = provisioner.delete(&request, &sink).await.map_err(|e| {
            error!("Teardown of deployment {} failed: {}", id, e);
            match e {
                e @ (DeployError::ValidationError(_) | DeployError::ConfigError(_)) => e,
                other => DeployError::ProvisionError(format!(
                    "{} cleanup failed: {}",
                    deployment.mode, other
                )),
            }
        })?;
        for warning in &report.warnings {
            warn!("Teardown of deployment {}: {}", id, warning);
        }

        let deleted = self.store.delete(id).await?;
        self.broker.close(id);
        if let Err(e) = self.layout.upload_file(id).delete().await {
            warn!("Failed to remove archive of deployment {}: {}", id, e);
        }

        info!("Deployment {} deleted ({} warnings)", id, report.warnings.len());
        Ok(DeletionResponse {
            deleted,
            deployment_id: id.to_string(),
            mode: deployment.mode,
            website_name: deployment.website_name,
            warnings: report.warnings,
        })
    }

    /// Attach a live listener to a deployment's log stream
    pub fn subscribe(&self, id: &str) -> LogSubscription {
        self.broker.subscribe(id)
    }
}

/// Teardown progress goes to the service log only; the record is about to go
struct TeardownLog<'a> {
    deployment_id: &'a str,
}

#[async_trait::async_trait]
impl ProgressSink for TeardownLog<'_> {
    async fn emit(&self, level: LogSeverity, message: String) {
        match level {
            LogSeverity::Info => info!("[DELETE {}] {}", self.deployment_id, message),
            LogSeverity::Warning => warn!("[DELETE {}] {}", self.deployment_id, message),
            LogSeverity::Error => error!("[DELETE {}] {}", self.deployment_id, message),
        }
    }
}
