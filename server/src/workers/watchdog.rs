//! Stale deployment watchdog

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::logstream::LogBroker;
use crate::pipeline::recovery::sweep_overdue;
use crate::store::DeploymentStore;

/// Watchdog worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Time between sweeps
    pub interval: Duration,

    /// Running deployments older than this are failed
    pub max_age: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(120),
            max_age: Duration::from_secs(900),
        }
    }
}

/// Run the watchdog worker
pub async fn run<S, F>(
    options: &Options,
    store: Arc<dyn DeploymentStore>,
    broker: Arc<LogBroker>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!(
        "Watchdog worker starting (interval {:?}, max age {:?})...",
        options.interval, options.max_age
    );

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Watchdog worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }

        debug!("Sweeping for overdue deployments...");
        match sweep_overdue(&store, &broker, options.max_age).await {
            Ok(0) => {}
            Ok(swept) => info!("Watchdog failed {} overdue deployment(s)", swept),
            Err(e) => error!("Watchdog sweep failed: {}", e),
        }
    }
}
