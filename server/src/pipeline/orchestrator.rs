//! Pipeline orchestrator
//!
//! Runs the eight steps of one deployment in order under a single deadline.
//! A failed step makes every later step except Notify skip, Notify always
//! runs, and the final status is written only while the record is still
//! running so a forced failure is never overwritten. A panicking step counts
//! as a failed step, and the work directory is removed on every exit.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::cloud::naming::image_uri;
use crate::cloud::ResourceEnsurer;
use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::logstream::{DeploymentLogger, LogBroker, ProgressSink};
use crate::models::{
    DeploymentConfig, DeploymentMode, DeploymentStatus, LogSeverity, PipelineStep, StepStatus,
};
use crate::pipeline::collaborators::{BuildRequest, Collaborators, Notification, ProjectDescriptor};
use crate::pipeline::context::PipelineContext;
use crate::pipeline::fsm::{PipelineEvent, PipelineFsm, StepPlan};
use crate::pipeline::recovery::force_fail;
use crate::provision::{ProvisionRequest, ProvisionerSet};
use crate::store::{DeploymentStore, Mutation};

/// Orchestrator options
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Hard deadline for a whole run
    pub max_duration: Duration,

    /// Cloud project hosting images and resources
    pub project_id: String,

    /// Cloud Run region, used for image URIs
    pub region: String,

    /// Artifact Registry repository for Cloud Run images
    pub artifact_repo: String,

    /// Recipients added to every deployment's notification
    pub recipients: Vec<String>,

    /// Parent of each run's work directory
    pub work_root: Dir,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_duration: Duration::from_secs(900),
            project_id: String::new(),
            region: "europe-west1".to_string(),
            artifact_repo: "cloud-run-images".to_string(),
            recipients: Vec::new(),
            work_root: Dir::new("./data/work"),
        }
    }
}

pub struct Orchestrator {
    store: Arc<dyn DeploymentStore>,
    broker: Arc<LogBroker>,
    provisioners: ProvisionerSet,
    ensurer: ResourceEnsurer,
    collaborators: Collaborators,
    options: PipelineOptions,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn DeploymentStore>,
        broker: Arc<LogBroker>,
        provisioners: ProvisionerSet,
        ensurer: ResourceEnsurer,
        collaborators: Collaborators,
        options: PipelineOptions,
    ) -> Self {
        Self {
            store,
            broker,
            provisioners,
            ensurer,
            collaborators,
            options,
        }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Run the pipeline in the background under a supervisor that fails the
    /// record if the run errors out or panics
    pub fn spawn(
        self: &Arc<Self>,
        deployment_id: String,
        archive: PathBuf,
        config: DeploymentConfig,
    ) -> JoinHandle<()> {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            let runner = orchestrator.clone();
            let run_id = deployment_id.clone();
            let run = tokio::spawn(async move { runner.run(&run_id, archive, config).await });

            let message = match run.await {
                Ok(Ok(status)) => {
                    info!("Deployment {} finished with status {}", deployment_id, status);
                    return;
                }
                Ok(Err(e)) => {
                    error!("Pipeline of deployment {} aborted: {}", deployment_id, e);
                    format!("Pipeline aborted: {}. Please retry.", e)
                }
                Err(e) if e.is_panic() => {
                    error!("Pipeline of deployment {} panicked", deployment_id);
                    "Pipeline crashed unexpectedly. Please retry.".to_string()
                }
                Err(e) => {
                    warn!("Pipeline of deployment {} was cancelled: {}", deployment_id, e);
                    "Pipeline was cancelled. Please retry.".to_string()
                }
            };

            if let Err(e) = force_fail(
                &orchestrator.store,
                &orchestrator.broker,
                &deployment_id,
                message,
            )
            .await
            {
                error!("Failed to mark deployment {} as failed: {}", deployment_id, e);
            }
        })
    }

    /// Run every step of a deployment and return its final status
    pub async fn run(
        &self,
        deployment_id: &str,
        archive: PathBuf,
        config: DeploymentConfig,
    ) -> Result<DeploymentStatus, DeployError> {
        let logger = DeploymentLogger::new(deployment_id, self.store.clone(), self.broker.clone());
        let mut context = PipelineContext::new(deployment_id, config, archive, &self.options.work_root);

        let outcome = AssertUnwindSafe(tokio::time::timeout(
            self.options.max_duration,
            self.execute(&mut context, &logger),
        ))
        .catch_unwind()
        .await;
        context.cleanup().await;

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => self.abandon(deployment_id, &logger).await,
            Err(panic) => Err(DeployError::Internal(format!(
                "pipeline panicked: {}",
                panic_message(&*panic)
            ))),
        }
    }

    async fn abandon(
        &self,
        deployment_id: &str,
        logger: &DeploymentLogger,
    ) -> Result<DeploymentStatus, DeployError> {
        let timeout = DeployError::PipelineTimeout(self.options.max_duration);
        let message = format!(
            "{}. The build may be too large or a step hung.",
            timeout
        );
        let now = Utc::now();
        let error_message = message.clone();
        let written = self
            .store
            .modify(
                deployment_id,
                Box::new(move |deployment| {
                    if !deployment.is_active() {
                        return false;
                    }
                    deployment.status = DeploymentStatus::Failed;
                    deployment.error_message = Some(error_message);
                    deployment.completed_at = Some(now);
                    true
                }),
            )
            .await?;

        if written {
            logger.log(LogSeverity::Error, timeout.to_string()).await;
            logger
                .log(
                    LogSeverity::Warning,
                    "No notification is sent for a run that hit the deadline",
                )
                .await;
        }
        Ok(DeploymentStatus::Failed)
    }

    // ===== STEP SEQUENCING =====

    async fn execute(
        &self,
        context: &mut PipelineContext,
        logger: &DeploymentLogger,
    ) -> Result<DeploymentStatus, DeployError> {
        let id = context.deployment_id.clone();
        let mut fsm = PipelineFsm::new();
        transition(&mut fsm, PipelineEvent::Start)?;

        let started_at = Utc::now();
        let started = self
            .store
            .modify(
                &id,
                Box::new(move |deployment| {
                    if deployment.status != DeploymentStatus::Queued {
                        return false;
                    }
                    deployment.status = DeploymentStatus::Running;
                    deployment.started_at = Some(started_at);
                    true
                }),
            )
            .await?;
        if !started {
            warn!("Deployment {} is no longer queued, not running it", id);
            return self.current_status(&id).await;
        }
        logger.log(LogSeverity::Info, "Pipeline started").await;

        for step in PipelineStep::ALL {
            let step_logger = logger.for_step(step);

            if fsm.plan(step) == StepPlan::Skip {
                transition(&mut fsm, PipelineEvent::StepSkipped(step))?;
                self.write_while_running(&id, set_step(step, StepStatus::Skipped))
                    .await?;
                step_logger
                    .log(LogSeverity::Info, format!("Skipping step: {}", step))
                    .await;
                continue;
            }

            transition(&mut fsm, PipelineEvent::StepStarted(step))?;
            self.write_while_running(
                &id,
                Box::new(move |deployment| {
                    deployment.steps_status.insert(step, StepStatus::Running);
                    deployment.current_step = Some(step);
                    true
                }),
            )
            .await?;
            step_logger
                .log(LogSeverity::Info, format!("Starting step: {}", step))
                .await;

            let timer = Instant::now();
            let failure = fsm.failure().map(|(s, e)| (s, e.to_string()));
            let result = AssertUnwindSafe(self.run_step(step, context, failure, &step_logger))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    error!("Step {} of deployment {} panicked", step, id);
                    Err(DeployError::Internal(format!(
                        "step panicked: {}",
                        panic_message(&*panic)
                    )))
                });

            match result {
                Ok(()) => {
                    transition(&mut fsm, PipelineEvent::StepCompleted(step))?;
                    self.write_while_running(&id, set_step(step, StepStatus::Completed))
                        .await?;
                    step_logger
                        .log(
                            LogSeverity::Info,
                            format!(
                                "Step {} completed in {:.1}s",
                                step,
                                timer.elapsed().as_secs_f64()
                            ),
                        )
                        .await;
                }
                Err(e) if step == PipelineStep::Notify => {
                    transition(&mut fsm, PipelineEvent::StepFailed(step, e.to_string()))?;
                    self.write_while_running(&id, set_step(step, StepStatus::Failed))
                        .await?;
                    step_logger
                        .log(LogSeverity::Warning, format!("Notification failed: {}", e))
                        .await;
                }
                Err(e) => {
                    let message = e.to_string();
                    transition(&mut fsm, PipelineEvent::StepFailed(step, message.clone()))?;
                    let error = DeployError::StepError { step, message }.to_string();
                    let error_message = error.clone();
                    self.write_while_running(
                        &id,
                        Box::new(move |deployment| {
                            deployment.steps_status.insert(step, StepStatus::Failed);
                            deployment.error_message = Some(error_message);
                            true
                        }),
                    )
                    .await?;
                    step_logger.log(LogSeverity::Error, error).await;
                }
            }
        }

        transition(&mut fsm, PipelineEvent::Finish)?;
        self.finalize(context, &fsm, logger).await
    }

    async fn finalize(
        &self,
        context: &PipelineContext,
        fsm: &PipelineFsm,
        logger: &DeploymentLogger,
    ) -> Result<DeploymentStatus, DeployError> {
        let id = &context.deployment_id;
        let now = Utc::now();

        match fsm.failure() {
            Some((step, _)) => {
                let written = self
                    .write_while_running(
                        id,
                        Box::new(move |deployment| {
                            deployment.status = DeploymentStatus::Failed;
                            deployment.completed_at = Some(now);
                            true
                        }),
                    )
                    .await?;
                if !written {
                    return self.current_status(id).await;
                }
                logger
                    .log(LogSeverity::Error, format!("Pipeline FAILED at step {}", step))
                    .await;
                Ok(DeploymentStatus::Failed)
            }
            None => {
                let url = context.result_url().map(str::to_string);
                let summary = context.summary.clone();
                let result_url = url.clone();
                let written = self
                    .write_while_running(
                        id,
                        Box::new(move |deployment| {
                            deployment.status = DeploymentStatus::Success;
                            deployment.result_url = result_url;
                            if summary.is_some() {
                                deployment.summary = summary;
                            }
                            deployment.completed_at = Some(now);
                            true
                        }),
                    )
                    .await?;
                if !written {
                    return self.current_status(id).await;
                }
                logger
                    .log(
                        LogSeverity::Info,
                        format!(
                            "Pipeline completed successfully. URL: {}",
                            url.as_deref().unwrap_or("-")
                        ),
                    )
                    .await;
                Ok(DeploymentStatus::Success)
            }
        }
    }

    /// Apply `mutation` only while the record is running
    async fn write_while_running(&self, id: &str, mutation: Mutation) -> Result<bool, DeployError> {
        let written = self
            .store
            .modify(
                id,
                Box::new(move |deployment| {
                    if deployment.status != DeploymentStatus::Running {
                        return false;
                    }
                    mutation(deployment)
                }),
            )
            .await?;
        if !written {
            warn!("Deployment {} is no longer running, update dropped", id);
        }
        Ok(written)
    }

    async fn current_status(&self, id: &str) -> Result<DeploymentStatus, DeployError> {
        self.store
            .get(id)
            .await?
            .map(|deployment| deployment.status)
            .ok_or_else(|| DeployError::NotFound(format!("deployment {}", id)))
    }

    // ===== STEP HANDLERS =====

    async fn run_step(
        &self,
        step: PipelineStep,
        context: &mut PipelineContext,
        failure: Option<(PipelineStep, String)>,
        sink: &dyn ProgressSink,
    ) -> Result<(), DeployError> {
        match step {
            PipelineStep::Extract => self.extract(context, sink).await,
            PipelineStep::AiInspect => self.inspect(context, sink).await,
            PipelineStep::AiFix => self.fix(context, sink).await,
            PipelineStep::Build => self.build(context, sink).await,
            PipelineStep::Verify => self.verify(context, sink).await,
            PipelineStep::Infra => self.infra(context, sink).await,
            PipelineStep::Upload => self.upload(context, sink).await,
            PipelineStep::Notify => self.notify(context, failure, sink).await,
        }
    }

    async fn extract(&self, context: &mut PipelineContext, sink: &dyn ProgressSink) -> Result<(), DeployError> {
        context.work_dir.create().await?;
        let project = self
            .collaborators
            .source
            .process(&context.archive, &context.work_dir, context.config.mode, sink)
            .await?;

        let kind = if project.is_static {
            "static site".to_string()
        } else {
            match &project.framework {
                Some(framework) => format!("{} project", framework),
                None => "generic project".to_string(),
            }
        };
        sink.info(format!(
            "Detected {} in {}",
            kind,
            project.source_dir.display()
        ))
        .await;
        context.project = Some(project);
        Ok(())
    }

    async fn inspect(&self, context: &mut PipelineContext, sink: &dyn ProgressSink) -> Result<(), DeployError> {
        if context.is_static() {
            sink.info("Static site, inspection not needed".to_string()).await;
            return Ok(());
        }
        let project = project(context)?;
        let summary = self.collaborators.inspector.inspect(project, sink).await?;
        if let Some(summary) = &summary {
            sink.info(format!("Inspection summary: {}", summary)).await;
        }
        context.summary = summary;
        Ok(())
    }

    async fn fix(&self, context: &mut PipelineContext, sink: &dyn ProgressSink) -> Result<(), DeployError> {
        if context.is_static() {
            sink.info("Static site, no fixes to apply".to_string()).await;
            return Ok(());
        }
        let project = project(context)?;
        self.collaborators.inspector.fix(project, sink).await
    }

    async fn build(&self, context: &mut PipelineContext, sink: &dyn ProgressSink) -> Result<(), DeployError> {
        if context.config.mode == DeploymentMode::CloudRun {
            let image = image_uri(
                &self.options.region,
                &self.options.project_id,
                &self.options.artifact_repo,
                &context.config.website_name,
                &context.deployment_id,
            )?;
            sink.info(format!("Container image: {}", image)).await;
            context.image_uri = Some(image);
        } else if context.is_static() {
            sink.info("Static site, nothing to build".to_string()).await;
            return Ok(());
        }

        let request = build_request(context);
        let project = project(context)?;
        self.collaborators.builder.build(project, &request, sink).await
    }

    async fn verify(&self, context: &mut PipelineContext, sink: &dyn ProgressSink) -> Result<(), DeployError> {
        let project = project(context)?;
        if context.is_static() {
            let index = File::new(project.output_dir.join("index.html"));
            if !index.exists().await {
                return Err(DeployError::ValidationError(
                    "index.html not found in the site root".to_string(),
                ));
            }
            sink.info("Found index.html".to_string()).await;
            return Ok(());
        }

        let request = build_request(context);
        self.collaborators.builder.verify(project, &request, sink).await
    }

    async fn infra(&self, context: &mut PipelineContext, sink: &dyn ProgressSink) -> Result<(), DeployError> {
        let provisioner = self.provisioners.get(context.config.mode)?;
        let mut request = ProvisionRequest::new(
            &context.config.website_name,
            context.config.domain.as_deref(),
        );
        if let Some(image) = &context.image_uri {
            request = request.with_image(image.clone());
        }

        let provisioned = provisioner.deploy(&request, sink).await?;
        context.provisioned = Some(provisioned);
        Ok(())
    }

    async fn upload(&self, context: &mut PipelineContext, sink: &dyn ProgressSink) -> Result<(), DeployError> {
        if context.config.mode == DeploymentMode::CloudRun {
            sink.info("Cloud Run serves the container image, nothing to upload".to_string())
                .await;
            return Ok(());
        }

        let project = project(context)?;
        let provisioned = context.provisioned.as_ref().ok_or_else(|| {
            DeployError::Internal("upload requested before infrastructure".to_string())
        })?;
        let bucket = provisioned.bucket.as_deref().ok_or_else(|| {
            DeployError::Internal("provisioning returned no bucket".to_string())
        })?;

        let count = self
            .collaborators
            .uploader
            .upload(&project.output_dir, bucket, &provisioned.object_prefix, sink)
            .await?;
        sink.info(format!("Uploaded {} files to gs://{}", count, bucket))
            .await;

        if let Some(target) = &provisioned.cache_target {
            match self
                .ensurer
                .invalidate_cache(&target.url_map, &target.path)
                .await
            {
                Ok(()) => {
                    sink.info(format!("Invalidated CDN cache for {}", target.path))
                        .await
                }
                Err(e) => sink.warn(format!("CDN cache invalidation failed: {}", e)).await,
            }
        }
        Ok(())
    }

    async fn notify(
        &self,
        context: &PipelineContext,
        failure: Option<(PipelineStep, String)>,
        sink: &dyn ProgressSink,
    ) -> Result<(), DeployError> {
        let recipients = merge_recipients(&self.options.recipients, &context.config.notification_emails);
        let (failed_step, error) = match failure {
            Some((step, error)) => (Some(step), Some(error)),
            None => (None, None),
        };

        let notification = Notification {
            deployment_id: context.deployment_id.clone(),
            website_name: context.config.website_name.clone(),
            mode: context.config.mode,
            success: failed_step.is_none(),
            url: context.result_url().map(str::to_string),
            error,
            failed_step,
            summary: context.summary.clone(),
            recipients,
        };

        self.collaborators.notifier.notify(&notification).await?;
        sink.info(format!(
            "Notification sent to {} recipient(s)",
            notification.recipients.len()
        ))
        .await;
        Ok(())
    }
}

fn transition(fsm: &mut PipelineFsm, event: PipelineEvent) -> Result<(), DeployError> {
    fsm.process(event).map_err(DeployError::Internal)
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

fn set_step(step: PipelineStep, status: StepStatus) -> Mutation {
    Box::new(move |deployment| {
        deployment.steps_status.insert(step, status);
        true
    })
}

fn project(context: &PipelineContext) -> Result<&ProjectDescriptor, DeployError> {
    context
        .project
        .as_ref()
        .ok_or_else(|| DeployError::Internal("no project was extracted".to_string()))
}

fn build_request(context: &PipelineContext) -> BuildRequest {
    BuildRequest {
        website_name: context.config.website_name.clone(),
        mode: context.config.mode,
        image_uri: context.image_uri.clone(),
    }
}

/// Configured recipients first, then the deployment's own, without repeats
pub fn merge_recipients(configured: &[String], requested: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::new();
    for recipient in configured.iter().chain(requested) {
        let recipient = recipient.trim();
        if recipient.is_empty() || merged.iter().any(|r| r.eq_ignore_ascii_case(recipient)) {
            continue;
        }
        merged.push(recipient.to_string());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_recipients() {
        let configured = vec!["ops@example.com".to_string()];
        let requested = vec![
            "dev@example.com".to_string(),
            "OPS@example.com".to_string(),
            " ".to_string(),
            "dev@example.com".to_string(),
        ];
        assert_eq!(
            merge_recipients(&configured, &requested),
            vec!["ops@example.com", "dev@example.com"]
        );
    }
}
