//! Run-scoped artifacts

use std::path::PathBuf;

use tracing::warn;

use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::DeploymentConfig;
use crate::pipeline::collaborators::ProjectDescriptor;
use crate::provision::ProvisionResult;

/// What earlier steps hand to later ones during a single run
#[derive(Debug)]
pub struct PipelineContext {
    pub deployment_id: String,
    pub config: DeploymentConfig,
    pub archive: PathBuf,
    pub work_dir: Dir,
    pub project: Option<ProjectDescriptor>,
    pub summary: Option<String>,
    pub image_uri: Option<String>,
    pub provisioned: Option<ProvisionResult>,
}

impl PipelineContext {
    pub fn new(deployment_id: &str, config: DeploymentConfig, archive: PathBuf, work_root: &Dir) -> Self {
        Self {
            deployment_id: deployment_id.to_string(),
            config,
            archive,
            work_dir: work_root.subdir(deployment_id),
            project: None,
            summary: None,
            image_uri: None,
            provisioned: None,
        }
    }

    pub fn is_static(&self) -> bool {
        self.project.as_ref().map(|p| p.is_static).unwrap_or(false)
    }

    pub fn result_url(&self) -> Option<&str> {
        self.provisioned.as_ref().map(|p| p.url.as_str())
    }

    /// Remove the work directory and the uploaded archive
    pub async fn cleanup(&self) {
        if let Err(e) = self.work_dir.delete().await {
            warn!(
                "Failed to remove work directory {}: {}",
                self.work_dir.path().display(),
                e
            );
        }
        if let Err(e) = File::new(&self.archive).delete().await {
            warn!("Failed to remove archive {}: {}", self.archive.display(), e);
        }
    }
}
