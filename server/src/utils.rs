//! Utility functions

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::DeployError;

/// Version information for the service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("WEBDEPLOY_GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("WEBDEPLOY_BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Exponential backoff policy shared by operation polling and API retries
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    /// Policy for transient control-plane API failures
    pub const API: RetryPolicy = RetryPolicy {
        max_attempts: 5,
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(30),
        multiplier: 2.0,
    };

    /// Polling cadence for global compute operations
    pub const COMPUTE_POLL: RetryPolicy = RetryPolicy {
        max_attempts: u32::MAX,
        base_delay: Duration::from_secs(2),
        max_delay: Duration::from_secs(10),
        multiplier: 1.3,
    };

    /// Polling cadence for Cloud Run rollouts
    pub const RUN_POLL: RetryPolicy = RetryPolicy {
        max_attempts: u32::MAX,
        base_delay: Duration::from_secs(5),
        max_delay: Duration::from_secs(15),
        multiplier: 1.3,
    };

    /// Delay to wait after the given zero-based attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = delay_secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Run `operation` until it succeeds, fails permanently, or attempts run out
    pub async fn retry<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, DeployError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DeployError>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < self.max_attempts => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        "{} failed (attempt {}/{}): {}, retrying in {:?}",
                        label,
                        attempt + 1,
                        self.max_attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::API
    }
}

/// Generate a random UUID v4
pub fn generate_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}
