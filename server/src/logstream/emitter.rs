//! Deployment-scoped log emitter

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::logstream::broker::LogBroker;
use crate::models::{LogEntry, LogSeverity, PipelineStep};
use crate::store::DeploymentStore;

/// Receives progress lines from long-running collaborators
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn emit(&self, level: LogSeverity, message: String);

    async fn info(&self, message: String) {
        self.emit(LogSeverity::Info, message).await
    }

    async fn warn(&self, message: String) {
        self.emit(LogSeverity::Warning, message).await
    }
}

/// Writes each line to tracing, the deployment's persisted history, and its
/// live listeners
#[derive(Clone)]
pub struct DeploymentLogger {
    deployment_id: String,
    step: Option<PipelineStep>,
    store: Arc<dyn DeploymentStore>,
    broker: Arc<LogBroker>,
}

impl DeploymentLogger {
    pub fn new(deployment_id: &str, store: Arc<dyn DeploymentStore>, broker: Arc<LogBroker>) -> Self {
        Self {
            deployment_id: deployment_id.to_string(),
            step: None,
            store,
            broker,
        }
    }

    /// Same sink, tagging lines with `step`
    pub fn for_step(&self, step: PipelineStep) -> Self {
        Self {
            step: Some(step),
            ..self.clone()
        }
    }

    pub fn deployment_id(&self) -> &str {
        &self.deployment_id
    }

    pub async fn log(&self, level: LogSeverity, message: impl Into<String>) {
        let entry = LogEntry::new(&self.deployment_id, level, self.step, message);
        let step = self.step.map(|s| s.as_str()).unwrap_or("-");

        match level {
            LogSeverity::Info => info!(deployment = %self.deployment_id, step, "{}", entry.message),
            LogSeverity::Warning => warn!(deployment = %self.deployment_id, step, "{}", entry.message),
            LogSeverity::Error => error!(deployment = %self.deployment_id, step, "{}", entry.message),
        }

        self.broker.publish(entry.clone());
        if let Err(e) = self.store.append_log(&entry).await {
            warn!(
                "Failed to persist log line of deployment {}: {}",
                self.deployment_id, e
            );
        }
    }
}

#[async_trait]
impl ProgressSink for DeploymentLogger {
    async fn emit(&self, level: LogSeverity, message: String) {
        self.log(level, message).await
    }
}
