//! JSON-file deployment store
//!
//! Layout: `deployments/<id>.json` holds the record, `deployment-logs/<id>.jsonl`
//! holds its log lines. Writes for one id are serialized by a per-id lock;
//! different ids never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::warn;

use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::{Deployment, DeploymentStatus, LogEntry};
use crate::storage::layout::StorageLayout;
use crate::store::{paginate, DeploymentStore, Mutation};

pub struct FileStore {
    records_dir: Dir,
    logs_dir: Dir,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl FileStore {
    pub async fn open(layout: &StorageLayout) -> Result<Self, DeployError> {
        let records_dir = layout.deployments_dir();
        let logs_dir = layout.deployment_logs_dir();
        records_dir.create().await?;
        logs_dir.create().await?;
        Ok(Self {
            records_dir,
            logs_dir,
            locks: Mutex::new(HashMap::new()),
        })
    }

    fn record_file(&self, id: &str) -> Result<File, DeployError> {
        check_id(id)?;
        Ok(self.records_dir.file(&format!("{}.json", id)))
    }

    fn log_file(&self, id: &str) -> Result<File, DeployError> {
        check_id(id)?;
        Ok(self.logs_dir.file(&format!("{}.jsonl", id)))
    }

    fn lock_for(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(id.to_string()).or_default().clone()
    }

    fn forget_lock(&self, id: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.remove(id);
    }

    /// Drop the id's lock once its record is terminal and nobody else holds it
    fn release_lock(&self, id: &str, lock: Arc<tokio::sync::Mutex<()>>, terminal: bool) {
        drop(lock);
        if !terminal {
            return;
        }
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks.get(id).is_some_and(|held| Arc::strong_count(held) == 1) {
            locks.remove(id);
        }
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    async fn read_record(&self, id: &str) -> Result<Option<Deployment>, DeployError> {
        let file = self.record_file(id)?;
        if !file.exists().await {
            return Ok(None);
        }
        Ok(Some(file.read_json().await?))
    }

    async fn read_all(&self) -> Result<Vec<Deployment>, DeployError> {
        let mut records = Vec::new();
        for path in self.records_dir.list_files().await? {
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match File::new(&path).read_json::<Deployment>().await {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable deployment file {:?}: {}", path, e),
            }
        }
        Ok(records)
    }
}

/// Ids become file names, so only accept what the service generates
fn check_id(id: &str) -> Result<(), DeployError> {
    let valid = !id.is_empty()
        && id.len() <= 64
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(DeployError::ValidationError(format!(
            "invalid deployment id '{}'",
            id
        )))
    }
}

#[async_trait]
impl DeploymentStore for FileStore {
    async fn create(&self, deployment: &Deployment) -> Result<(), DeployError> {
        let lock = self.lock_for(&deployment.id);
        let _guard = lock.lock().await;

        let file = self.record_file(&deployment.id)?;
        if file.exists().await {
            return Err(DeployError::StorageError(format!(
                "deployment {} already exists",
                deployment.id
            )));
        }
        file.write_json(deployment).await
    }

    async fn get(&self, id: &str) -> Result<Option<Deployment>, DeployError> {
        if check_id(id).is_err() {
            return Ok(None);
        }
        self.read_record(id).await
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<Deployment>, DeployError> {
        Ok(paginate(self.read_all().await?, limit, offset))
    }

    async fn list_by_status(
        &self,
        statuses: &[DeploymentStatus],
    ) -> Result<Vec<Deployment>, DeployError> {
        let mut records = self.read_all().await?;
        records.retain(|d| statuses.contains(&d.status));
        Ok(records)
    }

    async fn modify(&self, id: &str, mutation: Mutation) -> Result<bool, DeployError> {
        let lock = self.lock_for(id);
        let (result, terminal) = {
            let _guard = lock.lock().await;
            match self.read_record(id).await {
                Ok(Some(mut record)) => {
                    let result = match mutation(&mut record) {
                        true => match self.record_file(id) {
                            Ok(file) => file.write_json(&record).await.map(|_| true),
                            Err(e) => Err(e),
                        },
                        false => Ok(false),
                    };
                    (result, record.status.is_terminal())
                }
                Ok(None) => (
                    Err(DeployError::NotFound(format!("deployment {}", id))),
                    true,
                ),
                Err(e) => (Err(e), true),
            }
        };
        self.release_lock(id, lock, terminal);
        result
    }

    async fn delete(&self, id: &str) -> Result<bool, DeployError> {
        let existed = {
            let lock = self.lock_for(id);
            let _guard = lock.lock().await;

            let file = self.record_file(id)?;
            let existed = file.exists().await;
            file.delete().await?;
            self.log_file(id)?.delete().await?;
            existed
        };
        self.forget_lock(id);
        Ok(existed)
    }

    async fn append_log(&self, entry: &LogEntry) -> Result<(), DeployError> {
        self.log_file(&entry.deployment_id)?
            .append_json_line(entry)
            .await
    }

    async fn list_logs(&self, id: &str) -> Result<Vec<LogEntry>, DeployError> {
        if check_id(id).is_err() {
            return Ok(Vec::new());
        }
        self.log_file(id)?.read_json_lines().await
    }
}
