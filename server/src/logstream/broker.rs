//! Per-deployment fan-out of log lines to live listeners

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

use crate::models::LogEntry;

/// Registry of live log channels, keyed by deployment id
///
/// Each listener owns one receiver of the deployment's broadcast channel. A
/// listener that falls more than `capacity` lines behind loses the oldest lines
/// and keeps receiving the most recent ones; publishers never wait on it.
/// tokio rounds the channel size up to a power of two, so the exact bound is
/// enforced on the receiving side.
pub struct LogBroker {
    channels: Mutex<HashMap<String, broadcast::Sender<LogEntry>>>,
    capacity: usize,
}

impl LogBroker {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Push `entry` to every listener of its deployment and return how many
    /// there were. Never blocks; callable from any thread.
    pub fn publish(&self, entry: LogEntry) -> usize {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        match channels.get(&entry.deployment_id) {
            Some(sender) => sender.send(entry).unwrap_or(0),
            None => 0,
        }
    }

    /// Attach a listener to a deployment's log stream
    pub fn subscribe(self: &Arc<Self>, deployment_id: &str) -> LogSubscription {
        let receiver = {
            let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
            channels
                .entry(deployment_id.to_string())
                .or_insert_with(|| broadcast::channel(self.capacity).0)
                .subscribe()
        };
        debug!("Log listener attached to deployment {}", deployment_id);

        LogSubscription {
            broker: Arc::clone(self),
            deployment_id: deployment_id.to_string(),
            receiver: Some(receiver),
            capacity: self.capacity,
        }
    }

    /// Drop the deployment's channel; attached listeners drain and then close
    pub fn close(&self, deployment_id: &str) {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels.remove(deployment_id);
    }

    pub fn listener_count(&self, deployment_id: &str) -> usize {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels
            .get(deployment_id)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Deployments that currently have a registered channel
    pub fn channel_count(&self) -> usize {
        self.channels.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn detach(&self, deployment_id: &str) {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let empty = channels
            .get(deployment_id)
            .map(|sender| sender.receiver_count() == 0)
            .unwrap_or(false);
        if empty {
            channels.remove(deployment_id);
            debug!("Pruned log channel of deployment {}", deployment_id);
        }
    }
}

/// What a listener gets from [`LogSubscription::next`]
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Message(LogEntry),
    /// Nothing arrived within the idle timeout
    Heartbeat,
    /// The channel was closed by the broker
    Closed,
}

/// A live listener; dropping it detaches from the broker
pub struct LogSubscription {
    broker: Arc<LogBroker>,
    deployment_id: String,
    receiver: Option<broadcast::Receiver<LogEntry>>,
    capacity: usize,
}

impl LogSubscription {
    pub fn deployment_id(&self) -> &str {
        &self.deployment_id
    }

    /// Wait for the next line, or a heartbeat after `idle_timeout`
    pub async fn next(&mut self, idle_timeout: Duration) -> Delivery {
        let Some(receiver) = self.receiver.as_mut() else {
            return Delivery::Closed;
        };

        let deadline = tokio::time::Instant::now() + idle_timeout;
        loop {
            match tokio::time::timeout_at(deadline, receiver.recv()).await {
                // Older than the newest `capacity` lines
                Ok(Ok(_)) if receiver.len() >= self.capacity => {}
                Ok(Ok(entry)) => return Delivery::Message(entry),
                Ok(Err(RecvError::Lagged(missed))) => {
                    debug!(
                        "Log listener of deployment {} lagged, {} lines dropped",
                        self.deployment_id, missed
                    );
                }
                Ok(Err(RecvError::Closed)) => return Delivery::Closed,
                Err(_) => return Delivery::Heartbeat,
            }
        }
    }
}

impl Drop for LogSubscription {
    fn drop(&mut self) {
        drop(self.receiver.take());
        self.broker.detach(&self.deployment_id);
    }
}
