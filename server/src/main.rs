//! webdeploy - Entry Point
//!
//! Accepts zipped website sources over HTTP, builds them and publishes them
//! to a shared demo load balancer, a dedicated production stack or Cloud Run.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use webdeploy::app::options::AppOptions;
use webdeploy::app::run::run;
use webdeploy::filesys::file::File;
use webdeploy::logs::{init_logging, LogLevel, LogOptions};
use webdeploy::storage::settings::{CloudBackend, Settings};
use webdeploy::utils::version_info;

use tracing::{error, info};

const DEFAULT_CONFIG_PATH: &str = "./webdeploy.json";

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", version.version),
        }
        return;
    }

    // Retrieve the settings file; a missing file means defaults
    let config_path = cli_args
        .get("config")
        .cloned()
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let mut settings = match load_settings(&config_path).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read settings file {}: {}", config_path, e);
            return;
        }
    };

    // Command line overrides
    if let Some(level) = cli_args.get("log-level") {
        match level.parse::<LogLevel>() {
            Ok(level) => settings.log_level = level,
            Err(e) => {
                eprintln!("{}", e);
                return;
            }
        }
    }
    if let Some(port) = cli_args.get("port") {
        match port.parse::<u16>() {
            Ok(port) => settings.server.port = port,
            Err(_) => {
                eprintln!("Invalid port: {}", port);
                return;
            }
        }
    }
    if cli_args.contains_key("dry-run") {
        settings.cloud.backend = CloudBackend::DryRun;
    }

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level,
        log_dir: settings.logging.log_dir.as_ref().map(PathBuf::from),
        json_format: settings.logging.json,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    // Run the server
    let options = AppOptions::from_settings(&settings);

    info!(
        "Running webdeploy {} ({}) with options: {:?}",
        version.version, version.git_hash, options
    );
    let result = run(options, await_shutdown_signal()).await;
    if let Err(e) = result {
        error!("Failed to run the deployment service: {e}");
        std::process::exit(1);
    }
}

async fn load_settings(path: &str) -> Result<Settings, webdeploy::errors::DeployError> {
    let file = File::new(path);
    if !file.exists().await {
        return Ok(Settings::default());
    }
    file.read_json::<Settings>().await
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Failed to install signal handlers, falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    info!("Ctrl+C received, shutting down...");
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, shutting down...");
    }
}
