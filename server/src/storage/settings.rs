//! Settings file management

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;

/// Service settings, read from a JSON file
///
/// Every field has a default so a partial (or absent) file is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_level: LogLevel,

    #[serde(default)]
    pub logging: LoggingSettings,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub pipeline: PipelineSettings,

    #[serde(default)]
    pub watchdog: WatchdogSettings,

    #[serde(default)]
    pub log_stream: LogStreamSettings,

    #[serde(default)]
    pub cloud: CloudSettings,

    #[serde(default)]
    pub demo: DemoSettings,

    #[serde(default)]
    pub prod: ProdSettings,

    #[serde(default)]
    pub cloudrun: CloudRunSettings,

    #[serde(default)]
    pub notification: NotificationSettings,
}

fn default_true() -> bool {
    true
}

/// Log output settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// JSON lines on stdout
    #[serde(default)]
    pub json: bool,

    /// Directory for a daily rolling log file
    #[serde(default)]
    pub log_dir: Option<String>,
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Origins allowed by CORS, any origin when empty
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Largest accepted archive upload
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,
}

fn default_max_upload_mb() -> usize {
    512
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
            max_upload_mb: default_max_upload_mb(),
        }
    }
}

/// Which deployment store to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    File,
    Memory,
}

/// Local storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default = "default_base_dir")]
    pub base_dir: String,

    #[serde(default)]
    pub backend: StoreBackend,
}

fn default_base_dir() -> String {
    "./data".to_string()
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            backend: StoreBackend::default(),
        }
    }
}

/// Pipeline run settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Hard deadline for a whole run
    #[serde(default = "default_max_duration")]
    pub max_duration_secs: u64,

    /// Upper bound for a single build or verify command
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

fn default_max_duration() -> u64 {
    900
}

fn default_command_timeout() -> u64 {
    600
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_duration_secs: default_max_duration(),
            command_timeout_secs: default_command_timeout(),
        }
    }
}

/// Stale deployment watchdog settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_watchdog_interval")]
    pub interval_secs: u64,

    /// Running deployments older than this are failed
    #[serde(default = "default_max_duration")]
    pub max_age_secs: u64,
}

fn default_watchdog_interval() -> u64 {
    120
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_watchdog_interval(),
            max_age_secs: default_max_duration(),
        }
    }
}

/// Live log streaming settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogStreamSettings {
    #[serde(default = "default_listener_capacity")]
    pub listener_capacity: usize,

    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,
}

fn default_listener_capacity() -> usize {
    100
}

fn default_heartbeat() -> u64 {
    30
}

impl Default for LogStreamSettings {
    fn default() -> Self {
        Self {
            listener_capacity: default_listener_capacity(),
            heartbeat_secs: default_heartbeat(),
        }
    }
}

/// Which control plane provisioning talks to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CloudBackend {
    #[default]
    Gcp,
    DryRun,
}

/// Cloud project settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudSettings {
    #[serde(default)]
    pub backend: CloudBackend,

    #[serde(default)]
    pub project_id: String,

    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_secs: u64,

    #[serde(default = "default_run_operation_timeout")]
    pub run_operation_timeout_secs: u64,

    /// Polls a dry-run operation takes to finish
    #[serde(default = "default_dry_run_polls")]
    pub dry_run_polls: u32,
}

fn default_operation_timeout() -> u64 {
    300
}

fn default_run_operation_timeout() -> u64 {
    600
}

fn default_dry_run_polls() -> u32 {
    1
}

impl Default for CloudSettings {
    fn default() -> Self {
        Self {
            backend: CloudBackend::default(),
            project_id: String::new(),
            operation_timeout_secs: default_operation_timeout(),
            run_operation_timeout_secs: default_run_operation_timeout(),
            dry_run_polls: default_dry_run_polls(),
        }
    }
}

/// Shared demo load balancer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoSettings {
    #[serde(default = "default_demo_domain")]
    pub domain: String,

    #[serde(default = "default_demo_url_map")]
    pub url_map_name: String,

    #[serde(default = "default_bucket_location")]
    pub bucket_location: String,
}

fn default_demo_domain() -> String {
    "digitaldatatest.com".to_string()
}

fn default_demo_url_map() -> String {
    "test-lb".to_string()
}

fn default_bucket_location() -> String {
    "US".to_string()
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            domain: default_demo_domain(),
            url_map_name: default_demo_url_map(),
            bucket_location: default_bucket_location(),
        }
    }
}

/// Dedicated production stack settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProdSettings {
    #[serde(default = "default_bucket_location")]
    pub bucket_location: String,

    #[serde(default)]
    pub auto_create_ssl_cert: bool,

    #[serde(default = "default_true")]
    pub auto_create_dns_zone: bool,
}

impl Default for ProdSettings {
    fn default() -> Self {
        Self {
            bucket_location: default_bucket_location(),
            auto_create_ssl_cert: false,
            auto_create_dns_zone: true,
        }
    }
}

/// Managed container service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudRunSettings {
    #[serde(default = "default_region")]
    pub region: String,

    #[serde(default = "default_artifact_repo")]
    pub artifact_repo: String,

    #[serde(default = "default_memory")]
    pub memory: String,

    #[serde(default = "default_cpu")]
    pub cpu: String,

    #[serde(default = "default_max_instances")]
    pub max_instances: u32,

    #[serde(default)]
    pub min_instances: u32,

    #[serde(default = "default_container_port")]
    pub container_port: u16,
}

fn default_region() -> String {
    "europe-west1".to_string()
}

fn default_artifact_repo() -> String {
    "cloud-run-images".to_string()
}

fn default_memory() -> String {
    "512Mi".to_string()
}

fn default_cpu() -> String {
    "1".to_string()
}

fn default_max_instances() -> u32 {
    10
}

fn default_container_port() -> u16 {
    8080
}

impl Default for CloudRunSettings {
    fn default() -> Self {
        Self {
            region: default_region(),
            artifact_repo: default_artifact_repo(),
            memory: default_memory(),
            cpu: default_cpu(),
            max_instances: default_max_instances(),
            min_instances: 0,
            container_port: default_container_port(),
        }
    }
}

/// Outcome notification settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationSettings {
    /// Recipients added to every deployment
    #[serde(default)]
    pub recipients: Vec<String>,

    /// Endpoint receiving a JSON POST per finished run
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Email delivery through the Gmail API; takes precedence over the webhook
    #[serde(default)]
    pub gmail: Option<GmailSettings>,
}

/// Gmail API delivery with a delegated service account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GmailSettings {
    /// Mailbox the service account sends as
    pub delegated_user: String,

    /// Service account key; `GOOGLE_APPLICATION_CREDENTIALS` when unset
    #[serde(default)]
    pub credentials_file: Option<PathBuf>,

    #[serde(default = "default_gmail_api_url")]
    pub api_url: String,
}

fn default_gmail_api_url() -> String {
    "https://gmail.googleapis.com".to_string()
}
