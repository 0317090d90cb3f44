//! Seams between the orchestrator and the work it delegates

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::logstream::ProgressSink;
use crate::models::{DeploymentMode, PipelineStep};

/// What the source processor found in an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectDescriptor {
    /// Project root after extraction
    pub source_dir: PathBuf,
    /// Directory holding the files to serve once built
    pub output_dir: PathBuf,
    /// Plain files, nothing to install or build
    pub is_static: bool,
    pub framework: Option<String>,
    pub has_router: bool,
}

/// Inputs of a build or verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub website_name: String,
    pub mode: DeploymentMode,
    /// Target image, for Cloud Run deployments
    pub image_uri: Option<String>,
}

/// Outcome of a run, handed to the notifier
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub deployment_id: String,
    pub website_name: String,
    pub mode: DeploymentMode,
    pub success: bool,
    pub url: Option<String>,
    pub error: Option<String>,
    pub failed_step: Option<PipelineStep>,
    pub summary: Option<String>,
    pub recipients: Vec<String>,
}

/// Turns an uploaded archive into a project tree
#[async_trait]
pub trait SourceProcessor: Send + Sync {
    async fn process(
        &self,
        archive: &Path,
        work_dir: &Dir,
        mode: DeploymentMode,
        sink: &dyn ProgressSink,
    ) -> Result<ProjectDescriptor, DeployError>;
}

/// Reviews and repairs a project before it is built
#[async_trait]
pub trait Inspector: Send + Sync {
    /// Summary of what was found, if anything worth keeping
    async fn inspect(
        &self,
        project: &ProjectDescriptor,
        sink: &dyn ProgressSink,
    ) -> Result<Option<String>, DeployError>;

    async fn fix(&self, project: &ProjectDescriptor, sink: &dyn ProgressSink) -> Result<(), DeployError>;
}

/// Produces the servable artifact and checks it
#[async_trait]
pub trait Builder: Send + Sync {
    async fn build(
        &self,
        project: &ProjectDescriptor,
        request: &BuildRequest,
        sink: &dyn ProgressSink,
    ) -> Result<(), DeployError>;

    async fn verify(
        &self,
        project: &ProjectDescriptor,
        request: &BuildRequest,
        sink: &dyn ProgressSink,
    ) -> Result<(), DeployError>;
}

/// Copies built files into a bucket
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Returns how many files were uploaded
    async fn upload(
        &self,
        output_dir: &Path,
        bucket: &str,
        prefix: &str,
        sink: &dyn ProgressSink,
    ) -> Result<usize, DeployError>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), DeployError>;
}

/// Every collaborator a run needs
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn SourceProcessor>,
    pub inspector: Arc<dyn Inspector>,
    pub builder: Arc<dyn Builder>,
    pub uploader: Arc<dyn Uploader>,
    pub notifier: Arc<dyn Notifier>,
}
