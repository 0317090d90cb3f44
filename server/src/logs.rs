//! Process logging
//!
//! Service logs go through `tracing`; per-deployment log lines shown to users
//! live in the deployment store and are unrelated to this module.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt as layer_fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

use crate::errors::DeployError;

/// Dependencies that are chatty at debug level; they stay at `warn` unless
/// the service itself runs at `trace`
const NOISY_TARGETS: [&str; 4] = ["hyper", "h2", "reqwest", "rustls"];

const LOG_FILE_PREFIX: &str = "webdeploy.log";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

const LEVEL_NAMES: [(LogLevel, &str); 5] = [
    (LogLevel::Trace, "trace"),
    (LogLevel::Debug, "debug"),
    (LogLevel::Info, "info"),
    (LogLevel::Warn, "warn"),
    (LogLevel::Error, "error"),
];

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        LEVEL_NAMES
            .iter()
            .find(|(level, _)| level == self)
            .map(|(_, name)| *name)
            .unwrap_or("info")
    }

    /// `EnvFilter` directives for this level
    pub fn directives(&self) -> String {
        let mut directives = vec![self.as_str().to_string()];
        if *self != LogLevel::Trace {
            let floor = (*self).max(LogLevel::Warn).as_str();
            for target in NOISY_TARGETS {
                directives.push(format!("{}={}", target, floor));
            }
        }
        directives.join(",")
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = match s.trim().to_lowercase().as_str() {
            "warning" => "warn".to_string(),
            other => other.to_string(),
        };
        LEVEL_NAMES
            .iter()
            .find(|(_, name)| *name == wanted)
            .map(|(level, _)| *level)
            .ok_or_else(|| format!("Invalid log level: {}", s))
    }
}

impl Serialize for LogLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer)?
            .parse()
            .map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone)]
pub struct LogOptions {
    pub log_level: LogLevel,

    /// Write logs to stdout
    pub stdout: bool,

    /// Directory for a daily rolling log file, disabled when `None`
    pub log_dir: Option<PathBuf>,

    /// Emit JSON lines on stdout instead of the human format
    pub json_format: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            stdout: true,
            log_dir: None,
            json_format: false,
        }
    }
}

/// Install the global subscriber
///
/// `RUST_LOG` overrides the configured level. Keep the returned guard alive
/// while the rolling file is in use; dropping it flushes the writer.
pub fn init_logging(options: LogOptions) -> Result<Option<WorkerGuard>, DeployError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(options.log_level.directives())
            .map_err(|e| DeployError::ConfigError(format!("bad log filter: {}", e)))?,
    };

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    if options.stdout {
        let stdout = layer_fmt::layer().with_target(true);
        layers.push(match options.json_format {
            true => stdout.json().boxed(),
            false => stdout.boxed(),
        });
    }

    let guard = match &options.log_dir {
        Some(log_dir) => {
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX));
            layers.push(
                layer_fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_ansi(false)
                    .boxed(),
            );
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| DeployError::ConfigError(e.to_string()))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_levels() {
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!(" debug ".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_level_serde() {
        let level: LogLevel = serde_json::from_str("\"error\"").unwrap();
        assert_eq!(level, LogLevel::Error);
        assert_eq!(serde_json::to_string(&LogLevel::Trace).unwrap(), "\"trace\"");
    }

    #[test]
    fn test_directives_quiet_dependencies() {
        assert_eq!(
            LogLevel::Debug.directives(),
            "debug,hyper=warn,h2=warn,reqwest=warn,rustls=warn"
        );
        assert_eq!(
            LogLevel::Error.directives(),
            "error,hyper=error,h2=error,reqwest=error,rustls=error"
        );
        assert_eq!(LogLevel::Trace.directives(), "trace");
    }
}
