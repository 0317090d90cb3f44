//! npm and Cloud Build based builder

use std::time::Duration;

use async_trait::async_trait;

use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::logstream::ProgressSink;
use crate::models::DeploymentMode;
use crate::pipeline::{BuildRequest, Builder, ProjectDescriptor};
use crate::services::command::{run_command, CommandLine, CommandOutput};
use crate::services::extractor::has_index;

const ERROR_TAIL: usize = 1000;

/// Builds Node projects with npm and container images with `gcloud builds`
pub struct CommandBuilder {
    project_id: String,
    timeout: Duration,
}

impl CommandBuilder {
    pub fn new(project_id: &str, timeout: Duration) -> Self {
        Self {
            project_id: project_id.to_string(),
            timeout,
        }
    }

    async fn install(&self, project: &ProjectDescriptor, sink: &dyn ProgressSink) -> Result<(), DeployError> {
        let lockfile = File::new(project.source_dir.join("package-lock.json"));
        let install = if lockfile.exists().await {
            CommandLine::new("npm", &["ci"])
        } else {
            CommandLine::new("npm", &["install"])
        };

        let output = run_command(&install, &project.source_dir, self.timeout, sink).await?;
        if output.success {
            return Ok(());
        }

        if output.error_tail(usize::MAX).contains("ERESOLVE") {
            sink.warn("Peer dependency conflict, retrying with --legacy-peer-deps".to_string())
                .await;
            let retry = CommandLine::new("npm", &["install", "--legacy-peer-deps"]);
            let output = run_command(&retry, &project.source_dir, self.timeout, sink).await?;
            return check("npm install", &output);
        }
        check(&install.display(), &output)
    }
}

fn check(what: &str, output: &CommandOutput) -> Result<(), DeployError> {
    if output.success {
        return Ok(());
    }
    Err(DeployError::CommandError(format!(
        "{} failed with exit code {}: {}",
        what,
        output
            .code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "none".to_string()),
        output.error_tail(ERROR_TAIL)
    )))
}

/// Public path the site is served under
pub fn base_path(request: &BuildRequest) -> String {
    match request.mode {
        DeploymentMode::Demo => format!("/{}/", request.website_name),
        _ => "/".to_string(),
    }
}

#[async_trait]
impl Builder for CommandBuilder {
    async fn build(
        &self,
        project: &ProjectDescriptor,
        request: &BuildRequest,
        sink: &dyn ProgressSink,
    ) -> Result<(), DeployError> {
        if request.mode == DeploymentMode::CloudRun {
            if !File::new(project.source_dir.join("Dockerfile")).exists().await {
                return Err(DeployError::ValidationError(
                    "Cloud Run deployments need a Dockerfile at the project root".to_string(),
                ));
            }
            sink.info("Dockerfile found, image is built during verification".to_string())
                .await;
            return Ok(());
        }

        self.install(project, sink).await?;

        let base = base_path(request);
        sink.info(format!("Building with VITE_BASE={}", base)).await;
        let build = CommandLine::new("npm", &["run", "build"]).env("VITE_BASE", &base);
        let output = run_command(&build, &project.source_dir, self.timeout, sink).await?;
        check("npm run build", &output)
    }

    async fn verify(
        &self,
        project: &ProjectDescriptor,
        request: &BuildRequest,
        sink: &dyn ProgressSink,
    ) -> Result<(), DeployError> {
        if request.mode == DeploymentMode::CloudRun {
            let image = request.image_uri.as_deref().ok_or_else(|| {
                DeployError::Internal("no image URI for a Cloud Run build".to_string())
            })?;
            let submit = CommandLine::new(
                "gcloud",
                &[
                    "builds",
                    "submit",
                    "--tag",
                    image,
                    "--project",
                    self.project_id.as_str(),
                    "--quiet",
                ],
            );
            let output = run_command(&submit, &project.source_dir, self.timeout, sink).await?;
            check("gcloud builds submit", &output)?;
            sink.info(format!("Image pushed: {}", image)).await;
            return Ok(());
        }

        if !has_index(&project.output_dir).await {
            return Err(DeployError::ValidationError(format!(
                "Build completed but {} has no index.html",
                project.output_dir.display()
            )));
        }
        sink.info(format!("Build output ready in {}", project.output_dir.display()))
            .await;
        Ok(())
    }
}
