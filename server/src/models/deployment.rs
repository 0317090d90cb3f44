//! Deployment models

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use deploy_api::models::{DeploymentResponse, LogEntryResponse};
use serde::{Deserialize, Serialize};

use crate::models::{DeploymentMode, DeploymentStatus, LogSeverity, PipelineStep, StepStatus};
use crate::utils::generate_uuid;

/// What the user asked to deploy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    pub website_name: String,
    pub mode: DeploymentMode,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub notification_emails: Vec<String>,
}

/// Persisted deployment record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    pub website_name: String,
    pub mode: DeploymentMode,
    #[serde(default)]
    pub domain: Option<String>,
    pub status: DeploymentStatus,
    #[serde(default)]
    pub current_step: Option<PipelineStep>,
    pub steps_status: BTreeMap<PipelineStep, StepStatus>,
    #[serde(default)]
    pub result_url: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub notification_emails: Vec<String>,
    #[serde(default)]
    pub archive_name: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Deployment {
    /// New queued record with every step pending
    pub fn new(config: &DeploymentConfig, archive_name: Option<String>) -> Self {
        Self {
            id: generate_uuid(),
            website_name: config.website_name.clone(),
            mode: config.mode,
            domain: config.domain.clone(),
            status: DeploymentStatus::Queued,
            current_step: None,
            steps_status: PipelineStep::ALL
                .iter()
                .map(|step| (*step, StepStatus::Pending))
                .collect(),
            result_url: None,
            summary: None,
            error_message: None,
            notification_emails: config.notification_emails.clone(),
            archive_name,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn config(&self) -> DeploymentConfig {
        DeploymentConfig {
            website_name: self.website_name.clone(),
            mode: self.mode,
            domain: self.domain.clone(),
            notification_emails: self.notification_emails.clone(),
        }
    }

    pub fn step_status(&self, step: PipelineStep) -> StepStatus {
        self.steps_status
            .get(&step)
            .copied()
            .unwrap_or(StepStatus::Pending)
    }

    /// Status can still be changed by a run or the watchdog
    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            DeploymentStatus::Queued | DeploymentStatus::Running
        )
    }

    /// Apply the forced-failure marking used by recovery and the watchdog
    pub fn force_fail(&mut self, message: String, at: DateTime<Utc>) {
        for status in self.steps_status.values_mut() {
            *status = match *status {
                StepStatus::Running => StepStatus::Failed,
                StepStatus::Pending => StepStatus::Skipped,
                other => other,
            };
        }
        self.status = DeploymentStatus::Failed;
        self.error_message = Some(message);
        self.completed_at = Some(at);
    }

    pub fn to_response(&self) -> DeploymentResponse {
        DeploymentResponse {
            id: self.id.clone(),
            website_name: self.website_name.clone(),
            mode: self.mode,
            domain: self.domain.clone(),
            status: self.status,
            current_step: self.current_step,
            steps_status: self.steps_status.clone(),
            result_url: self.result_url.clone(),
            summary: self.summary.clone(),
            error_message: self.error_message.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

/// One line of a deployment's log history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub deployment_id: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogSeverity,
    #[serde(default)]
    pub step: Option<PipelineStep>,
    pub message: String,
}

impl LogEntry {
    pub fn new(
        deployment_id: &str,
        level: LogSeverity,
        step: Option<PipelineStep>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            deployment_id: deployment_id.to_string(),
            timestamp: Utc::now(),
            level,
            step,
            message: message.into(),
        }
    }

    pub fn to_response(&self) -> LogEntryResponse {
        LogEntryResponse {
            timestamp: self.timestamp,
            level: self.level,
            step: self.step,
            message: self.message.clone(),
        }
    }
}
