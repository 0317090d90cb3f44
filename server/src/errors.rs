//! Error types for the deployment service

use std::time::Duration;

use thiserror::Error;

use crate::models::PipelineStep;

/// Main error type for the deployment service
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Step {step} failed: {message}")]
    StepError { step: PipelineStep, message: String },

    #[error("Operation {operation} timed out after {}s", timeout.as_secs())]
    OperationTimeout { operation: String, timeout: Duration },

    #[error("Operation {operation} failed: {detail}")]
    OperationFailed { operation: String, detail: String },

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Control plane error ({status}): {message}")]
    ControlPlane { status: u16, message: String },

    #[error("Pipeline timed out after {}s", .0.as_secs())]
    PipelineTimeout(Duration),

    #[error("Provisioning error: {0}")]
    ProvisionError(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Command error: {0}")]
    CommandError(String),

    #[error("Notification error: {0}")]
    NotificationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeployError {
    /// Whether a control-plane call failing with this error may be retried
    pub fn is_transient(&self) -> bool {
        match self {
            DeployError::ControlPlane { status, .. } => *status == 429 || *status >= 500,
            DeployError::HttpError(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

impl From<anyhow::Error> for DeployError {
    fn from(err: anyhow::Error) -> Self {
        DeployError::Internal(err.to_string())
    }
}

impl From<gcp_auth::Error> for DeployError {
    fn from(err: gcp_auth::Error) -> Self {
        DeployError::AuthError(err.to_string())
    }
}
