//! Server state

use std::sync::Arc;
use std::time::Duration;

use crate::app::service::DeploymentService;

/// Server state shared across handlers
pub struct ServerState {
    pub service: Arc<DeploymentService>,

    /// Idle time before a live log listener gets a heartbeat frame
    pub heartbeat: Duration,
}

impl ServerState {
    pub fn new(service: Arc<DeploymentService>, heartbeat: Duration) -> Self {
        Self { service, heartbeat }
    }
}
