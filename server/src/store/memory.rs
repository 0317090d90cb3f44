//! In-memory deployment store

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::errors::DeployError;
use crate::models::{Deployment, DeploymentStatus, LogEntry};
use crate::store::{paginate, DeploymentStore, Mutation};

/// Store that keeps everything in process memory
#[derive(Default)]
pub struct MemoryStore {
    deployments: RwLock<HashMap<String, Deployment>>,
    logs: RwLock<HashMap<String, Vec<LogEntry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn create(&self, deployment: &Deployment) -> Result<(), DeployError> {
        let mut deployments = self.deployments.write().unwrap_or_else(|e| e.into_inner());
        if deployments.contains_key(&deployment.id) {
            return Err(DeployError::StorageError(format!(
                "deployment {} already exists",
                deployment.id
            )));
        }
        deployments.insert(deployment.id.clone(), deployment.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Deployment>, DeployError> {
        let deployments = self.deployments.read().unwrap_or_else(|e| e.into_inner());
        Ok(deployments.get(id).cloned())
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<Deployment>, DeployError> {
        let deployments = self.deployments.read().unwrap_or_else(|e| e.into_inner());
        Ok(paginate(deployments.values().cloned().collect(), limit, offset))
    }

    async fn list_by_status(
        &self,
        statuses: &[DeploymentStatus],
    ) -> Result<Vec<Deployment>, DeployError> {
        let deployments = self.deployments.read().unwrap_or_else(|e| e.into_inner());
        Ok(deployments
            .values()
            .filter(|d| statuses.contains(&d.status))
            .cloned()
            .collect())
    }

    async fn modify(&self, id: &str, mutation: Mutation) -> Result<bool, DeployError> {
        let mut deployments = self.deployments.write().unwrap_or_else(|e| e.into_inner());
        let current = deployments
            .get(id)
            .ok_or_else(|| DeployError::NotFound(format!("deployment {}", id)))?;

        let mut next = current.clone();
        if !mutation(&mut next) {
            return Ok(false);
        }
        deployments.insert(id.to_string(), next);
        Ok(true)
    }

    async fn delete(&self, id: &str) -> Result<bool, DeployError> {
        let removed = self
            .deployments
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
            .is_some();
        self.logs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        Ok(removed)
    }

    async fn append_log(&self, entry: &LogEntry) -> Result<(), DeployError> {
        let mut logs = self.logs.write().unwrap_or_else(|e| e.into_inner());
        logs.entry(entry.deployment_id.clone())
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn list_logs(&self, id: &str) -> Result<Vec<LogEntry>, DeployError> {
        let logs = self.logs.read().unwrap_or_else(|e| e.into_inner());
        Ok(logs.get(id).cloned().unwrap_or_default())
    }
}
