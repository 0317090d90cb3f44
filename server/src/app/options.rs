//! Application configuration options

use std::time::Duration;

use crate::storage::layout::StorageLayout;
use crate::storage::settings::{
    CloudRunSettings, CloudSettings, DemoSettings, NotificationSettings, ProdSettings, Settings,
    StoreBackend,
};
use crate::workers::watchdog;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage configuration
    pub storage: StorageOptions,

    /// Server configuration
    pub server: ServerOptions,

    /// Pipeline run limits
    pub pipeline: PipelineLimits,

    /// Enable the stale deployment watchdog
    pub enable_watchdog: bool,

    /// Watchdog worker options
    pub watchdog: watchdog::Options,

    /// Live log streaming
    pub log_stream: LogStreamOptions,

    /// Control plane selection and operation timeouts
    pub cloud: CloudSettings,

    pub demo: DemoSettings,

    pub prod: ProdSettings,

    pub cloudrun: CloudRunSettings,

    pub notification: NotificationSettings,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            storage: StorageOptions::default(),
            server: ServerOptions::default(),
            pipeline: PipelineLimits::default(),
            enable_watchdog: true,
            watchdog: watchdog::Options::default(),
            log_stream: LogStreamOptions::default(),
            cloud: CloudSettings::default(),
            demo: DemoSettings::default(),
            prod: ProdSettings::default(),
            cloudrun: CloudRunSettings::default(),
            notification: NotificationSettings::default(),
        }
    }
}

impl AppOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            storage: StorageOptions {
                layout: StorageLayout::new(&settings.storage.base_dir),
                backend: settings.storage.backend,
            },
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
                cors_origins: settings.server.cors_origins.clone(),
                max_upload_bytes: settings.server.max_upload_mb * 1024 * 1024,
            },
            pipeline: PipelineLimits {
                max_duration: Duration::from_secs(settings.pipeline.max_duration_secs),
                command_timeout: Duration::from_secs(settings.pipeline.command_timeout_secs),
            },
            enable_watchdog: settings.watchdog.enabled,
            watchdog: watchdog::Options {
                interval: Duration::from_secs(settings.watchdog.interval_secs),
                max_age: Duration::from_secs(settings.watchdog.max_age_secs),
            },
            log_stream: LogStreamOptions {
                listener_capacity: settings.log_stream.listener_capacity,
                heartbeat: Duration::from_secs(settings.log_stream.heartbeat_secs),
            },
            cloud: settings.cloud.clone(),
            demo: settings.demo.clone(),
            prod: settings.prod.clone(),
            cloudrun: settings.cloudrun.clone(),
            notification: settings.notification.clone(),
        }
    }
}

/// Lifecycle options for the service
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Storage configuration options
#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// Storage layout paths
    pub layout: StorageLayout,

    /// Where deployment records live
    pub backend: StoreBackend,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            layout: StorageLayout::default(),
            backend: StoreBackend::default(),
        }
    }
}

/// Pipeline limits
#[derive(Debug, Clone, Copy)]
pub struct PipelineLimits {
    /// Hard deadline for a whole run
    pub max_duration: Duration,

    /// Upper bound for one external command
    pub command_timeout: Duration,
}

impl Default for PipelineLimits {
    fn default() -> Self {
        Self {
            max_duration: Duration::from_secs(900),
            command_timeout: Duration::from_secs(600),
        }
    }
}

/// Live log streaming options
#[derive(Debug, Clone, Copy)]
pub struct LogStreamOptions {
    /// Lines buffered per listener
    pub listener_capacity: usize,

    /// Idle time before a heartbeat frame
    pub heartbeat: Duration,
}

impl Default for LogStreamOptions {
    fn default() -> Self {
        Self {
            listener_capacity: 100,
            heartbeat: Duration::from_secs(30),
        }
    }
}

/// HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Origins allowed by CORS, any origin when empty
    pub cors_origins: Vec<String>,

    /// Request body limit for archive uploads
    pub max_upload_bytes: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: Vec::new(),
            max_upload_bytes: 512 * 1024 * 1024,
        }
    }
}
