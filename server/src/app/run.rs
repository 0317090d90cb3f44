//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::errors::DeployError;
use crate::pipeline::recovery::recover_interrupted;
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::workers::watchdog;

/// Run the deployment service until `shutdown_signal` resolves
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), DeployError> {
    info!("Initializing deployment service...");

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    // Initialize the app state
    if let Err(e) = init(&options, shutdown_tx.clone(), &mut shutdown_manager).await {
        error!("Failed to start the deployment service: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    // Shutdown
    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<Arc<AppState>, DeployError> {
    let app_state = init_app_state(options, shutdown_manager).await?;

    recover_on_startup(&app_state).await;

    if options.enable_watchdog {
        init_watchdog_worker(
            options.watchdog.clone(),
            app_state.clone(),
            shutdown_manager,
            shutdown_tx.subscribe(),
        )
        .await?;
    }

    init_http_server(
        options,
        app_state.clone(),
        shutdown_manager,
        shutdown_tx.subscribe(),
    )
    .await?;

    Ok(app_state)
}

async fn init_app_state(
    options: &AppOptions,
    shutdown_manager: &mut ShutdownManager,
) -> Result<Arc<AppState>, DeployError> {
    let app_state = Arc::new(AppState::init(options).await?);
    shutdown_manager.with_app_state(app_state.clone())?;
    Ok(app_state)
}

/// Fail every record a previous process left queued or running
async fn recover_on_startup(app_state: &AppState) {
    match recover_interrupted(&app_state.store, &app_state.broker).await {
        Ok(0) => info!("No interrupted deployments to recover"),
        Ok(count) => warn!("Marked {} interrupted deployment(s) as failed", count),
        Err(e) => error!("Startup recovery failed: {}", e),
    }
}

async fn init_watchdog_worker(
    options: watchdog::Options,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DeployError> {
    info!("Initializing watchdog worker...");

    let store = app_state.store.clone();
    let broker = app_state.broker.clone();

    let watchdog_handle = tokio::spawn(async move {
        watchdog::run(
            &options,
            store,
            broker,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_watchdog_worker_handle(watchdog_handle)?;
    Ok(())
}

async fn init_http_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DeployError> {
    info!("Initializing HTTP server...");

    let server_state = ServerState::new(app_state.service.clone(), app_state.heartbeat);

    let server_handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_http_server_handle(server_handle)?;
    Ok(())
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    app_state: Option<Arc<AppState>>,
    http_server_handle: Option<JoinHandle<Result<(), DeployError>>>,
    watchdog_worker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            app_state: None,
            http_server_handle: None,
            watchdog_worker_handle: None,
        }
    }

    pub fn with_app_state(&mut self, state: Arc<AppState>) -> Result<(), DeployError> {
        if self.app_state.is_some() {
            return Err(DeployError::ShutdownError("app_state already set".to_string()));
        }
        self.app_state = Some(state);
        Ok(())
    }

    pub fn with_watchdog_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), DeployError> {
        if self.watchdog_worker_handle.is_some() {
            return Err(DeployError::ShutdownError("watchdog_handle already set".to_string()));
        }
        self.watchdog_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_http_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), DeployError>>,
    ) -> Result<(), DeployError> {
        if self.http_server_handle.is_some() {
            return Err(DeployError::ShutdownError("server_handle already set".to_string()));
        }
        self.http_server_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), DeployError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), DeployError> {
        info!("Shutting down deployment service...");

        // 1. Watchdog worker
        if let Some(handle) = self.watchdog_worker_handle.take() {
            handle.await.map_err(|e| DeployError::ShutdownError(e.to_string()))?;
        }

        // 2. HTTP server
        if let Some(handle) = self.http_server_handle.take() {
            handle.await.map_err(|e| DeployError::ShutdownError(e.to_string()))??;
        }

        // 3. App state; runs still in flight are failed by recovery on next start
        if let Some(app_state) = self.app_state.take() {
            app_state.shutdown().await?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
