//! Domain models

pub mod deployment;

pub use deploy_api::models::{
    DeploymentMode, DeploymentStatus, LogSeverity, PipelineStep, StepStatus,
};
pub use deployment::{Deployment, DeploymentConfig, LogEntry};
