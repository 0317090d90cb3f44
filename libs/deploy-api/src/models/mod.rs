//! API models

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Target environment of a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    Demo,
    Prod,
    #[serde(rename = "cloudrun")]
    CloudRun,
}

impl DeploymentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentMode::Demo => "demo",
            DeploymentMode::Prod => "prod",
            DeploymentMode::CloudRun => "cloudrun",
        }
    }
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "demo" => Ok(DeploymentMode::Demo),
            "prod" => Ok(DeploymentMode::Prod),
            "cloudrun" => Ok(DeploymentMode::CloudRun),
            other => Err(format!(
                "Invalid mode '{}': must be one of demo, prod, cloudrun",
                other
            )),
        }
    }
}

/// Overall deployment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Queued,
    Running,
    Success,
    Failed,
}

impl DeploymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Success | DeploymentStatus::Failed)
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeploymentStatus::Queued => "queued",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Success => "success",
            DeploymentStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One stage of the fixed pipeline, declared in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStep {
    Extract,
    AiInspect,
    AiFix,
    Build,
    Verify,
    Infra,
    Upload,
    Notify,
}

impl PipelineStep {
    pub const ALL: [PipelineStep; 8] = [
        PipelineStep::Extract,
        PipelineStep::AiInspect,
        PipelineStep::AiFix,
        PipelineStep::Build,
        PipelineStep::Verify,
        PipelineStep::Infra,
        PipelineStep::Upload,
        PipelineStep::Notify,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStep::Extract => "EXTRACT",
            PipelineStep::AiInspect => "AI_INSPECT",
            PipelineStep::AiFix => "AI_FIX",
            PipelineStep::Build => "BUILD",
            PipelineStep::Verify => "VERIFY",
            PipelineStep::Infra => "INFRA",
            PipelineStep::Upload => "UPLOAD",
            PipelineStep::Notify => "NOTIFY",
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single pipeline step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// Severity of a deployment log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogSeverity {
    Info,
    Warning,
    Error,
}

/// Deployment as returned by the query endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentResponse {
    pub id: String,
    pub website_name: String,
    pub mode: DeploymentMode,
    pub domain: Option<String>,
    pub status: DeploymentStatus,
    pub current_step: Option<PipelineStep>,
    pub steps_status: BTreeMap<PipelineStep, StepStatus>,
    pub result_url: Option<String>,
    pub summary: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Response to an accepted submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentCreateResponse {
    pub deployment_id: String,
    pub status: DeploymentStatus,
}

/// One persisted log line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntryResponse {
    pub timestamp: DateTime<Utc>,
    pub level: LogSeverity,
    pub step: Option<PipelineStep>,
    pub message: String,
}

/// Response to a deletion request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionResponse {
    pub deleted: bool,
    pub deployment_id: String,
    pub mode: DeploymentMode,
    pub website_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

/// Error body returned by every failing endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}

/// Frame sent to live log listeners
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LogFrame {
    Log(LogEntryResponse),
    Heartbeat,
}
