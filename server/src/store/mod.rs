//! Deployment persistence
//!
//! The orchestrator and the watchdog both write through [`DeploymentStore`].
//! All writes go through [`DeploymentStore::modify`], which applies a closure
//! to the current record as one read-modify-write per deployment id.

pub mod file;
pub mod memory;

use async_trait::async_trait;

use crate::errors::DeployError;
use crate::models::{Deployment, DeploymentStatus, LogEntry};

pub use file::FileStore;
pub use memory::MemoryStore;

/// Mutation applied to a stored record. Returning `false` leaves it untouched.
pub type Mutation = Box<dyn FnOnce(&mut Deployment) -> bool + Send>;

#[async_trait]
pub trait DeploymentStore: Send + Sync {
    async fn create(&self, deployment: &Deployment) -> Result<(), DeployError>;

    async fn get(&self, id: &str) -> Result<Option<Deployment>, DeployError>;

    /// Newest first
    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<Deployment>, DeployError>;

    async fn list_by_status(
        &self,
        statuses: &[DeploymentStatus],
    ) -> Result<Vec<Deployment>, DeployError>;

    /// Apply `mutation` to the record, returning whether it was written.
    /// Fails with [`DeployError::NotFound`] when the record does not exist.
    async fn modify(&self, id: &str, mutation: Mutation) -> Result<bool, DeployError>;

    /// Remove the record and its logs, returning whether it existed
    async fn delete(&self, id: &str) -> Result<bool, DeployError>;

    async fn append_log(&self, entry: &LogEntry) -> Result<(), DeployError>;

    /// Oldest first
    async fn list_logs(&self, id: &str) -> Result<Vec<LogEntry>, DeployError>;
}

/// Sort newest first and apply `offset`/`limit`
pub(crate) fn paginate(mut records: Vec<Deployment>, limit: usize, offset: usize) -> Vec<Deployment> {
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    records.into_iter().skip(offset).take(limit).collect()
}
