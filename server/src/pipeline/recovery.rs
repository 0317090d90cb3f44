//! Forced failure of deployments whose run is gone or overran its budget

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::errors::DeployError;
use crate::logstream::{DeploymentLogger, LogBroker};
use crate::models::{Deployment, DeploymentStatus, LogSeverity};
use crate::store::DeploymentStore;

fn step_label(deployment: &Deployment) -> &'static str {
    deployment
        .current_step
        .map(|step| step.as_str())
        .unwrap_or("UNKNOWN")
}

/// Fail a queued or running deployment: running steps become failed and
/// pending ones skipped. Returns whether the record was changed; records that
/// already reached a terminal status are left alone.
pub async fn force_fail(
    store: &Arc<dyn DeploymentStore>,
    broker: &Arc<LogBroker>,
    deployment_id: &str,
    message: String,
) -> Result<bool, DeployError> {
    let now = Utc::now();
    let error_message = message.clone();
    let written = store
        .modify(
            deployment_id,
            Box::new(move |deployment| {
                if !deployment.is_active() {
                    return false;
                }
                deployment.force_fail(error_message, now);
                true
            }),
        )
        .await?;

    if written {
        DeploymentLogger::new(deployment_id, store.clone(), broker.clone())
            .log(LogSeverity::Error, message)
            .await;
    }
    Ok(written)
}

/// Fail every deployment left queued or running by a previous process
pub async fn recover_interrupted(
    store: &Arc<dyn DeploymentStore>,
    broker: &Arc<LogBroker>,
) -> Result<usize, DeployError> {
    let stale = store
        .list_by_status(&[DeploymentStatus::Running, DeploymentStatus::Queued])
        .await?;

    let mut recovered = 0;
    for deployment in stale {
        let message = format!(
            "Deployment was interrupted by a restart during step {}. Please retry.",
            step_label(&deployment)
        );
        if force_fail(store, broker, &deployment.id, message).await? {
            warn!(
                "Recovered interrupted deployment {} (was {} at step {})",
                deployment.id,
                deployment.status,
                step_label(&deployment)
            );
            recovered += 1;
        }
    }

    if recovered > 0 {
        info!("Recovered {} interrupted deployment(s)", recovered);
    }
    Ok(recovered)
}

/// Fail running deployments started more than `max_age` ago
pub async fn sweep_overdue(
    store: &Arc<dyn DeploymentStore>,
    broker: &Arc<LogBroker>,
    max_age: Duration,
) -> Result<usize, DeployError> {
    let running = store.list_by_status(&[DeploymentStatus::Running]).await?;
    let now = Utc::now();

    let mut swept = 0;
    for deployment in running {
        let Some(started_at) = deployment.started_at else {
            continue;
        };
        let elapsed = match (now - started_at).to_std() {
            Ok(elapsed) => elapsed,
            Err(_) => continue,
        };
        if elapsed <= max_age {
            continue;
        }

        let message = format!(
            "Pipeline timed out after {}s at step {}. Please retry.",
            elapsed.as_secs(),
            step_label(&deployment)
        );
        if force_fail(store, broker, &deployment.id, message).await? {
            warn!(
                "Watchdog failed deployment {} (running for {}s, limit {}s)",
                deployment.id,
                elapsed.as_secs(),
                max_age.as_secs()
            );
            swept += 1;
        }
    }
    Ok(swept)
}
