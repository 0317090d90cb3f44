//! Waits for asynchronous control-plane operations

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::cloud::control_plane::{ControlPlane, Operation, OperationApi, OperationState};
use crate::errors::DeployError;
use crate::utils::RetryPolicy;

#[derive(Clone)]
pub struct OperationPoller {
    plane: Arc<dyn ControlPlane>,
}

impl OperationPoller {
    pub fn new(plane: Arc<dyn ControlPlane>) -> Self {
        Self { plane }
    }

    /// Block until `operation` finishes or `timeout` elapses
    ///
    /// Polls on a backoff that starts short and grows up to the policy cap;
    /// the final sleep is clipped so the deadline is honored exactly.
    pub async fn wait(&self, operation: &Operation, timeout: Duration) -> Result<(), DeployError> {
        if operation.is_immediate() {
            return Ok(());
        }

        let policy = match operation.api {
            OperationApi::Run => RetryPolicy::RUN_POLL,
            _ => RetryPolicy::COMPUTE_POLL,
        };
        let deadline = Instant::now() + timeout;
        let mut attempt = 0u32;

        loop {
            match self.plane.operation_state(operation).await? {
                OperationState::Done => {
                    debug!("Operation {} done after {} polls", operation.name, attempt + 1);
                    return Ok(());
                }
                OperationState::Failed(detail) => {
                    return Err(DeployError::OperationFailed {
                        operation: operation.name.clone(),
                        detail,
                    });
                }
                OperationState::Pending => {}
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(DeployError::OperationTimeout {
                    operation: operation.name.clone(),
                    timeout,
                });
            }
            let delay = policy.delay_for_attempt(attempt).min(deadline - now);
            tokio::time::sleep(delay).await;
            attempt = attempt.saturating_add(1);
        }
    }
}
