//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// On-disk layout under the service's data directory
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub base_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// One JSON document per deployment
    pub fn deployments_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("deployments"))
    }

    /// One JSON-lines log file per deployment
    pub fn deployment_logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("deployment-logs"))
    }

    /// Uploaded archives awaiting a run
    pub fn uploads_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("uploads"))
    }

    /// Per-run scratch space, removed when each run ends
    pub fn work_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("work"))
    }

    pub fn upload_file(&self, deployment_id: &str) -> File {
        self.uploads_dir().file(&format!("{}.zip", deployment_id))
    }

    /// Create every directory of the layout
    pub async fn setup(&self) -> Result<(), DeployError> {
        self.deployments_dir().create().await?;
        self.deployment_logs_dir().create().await?;
        self.uploads_dir().create().await?;
        self.work_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::new("./data")
    }
}
