//! File operations

use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::errors::DeployError;

/// A file wrapper with path
#[derive(Debug, Clone)]
pub struct File {
    path: PathBuf,
}

impl File {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    pub async fn read_string(&self) -> Result<String, DeployError> {
        let mut file = fs::File::open(&self.path).await?;
        let mut contents = String::new();
        file.read_to_string(&mut contents).await?;
        Ok(contents)
    }

    pub async fn read_bytes(&self) -> Result<Vec<u8>, DeployError> {
        Ok(fs::read(&self.path).await?)
    }

    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T, DeployError> {
        let contents = self.read_string().await?;
        let value = serde_json::from_str(&contents)?;
        Ok(value)
    }

    /// Read a JSON-lines file, skipping lines that fail to parse
    pub async fn read_json_lines<T: DeserializeOwned>(&self) -> Result<Vec<T>, DeployError> {
        if !self.exists().await {
            return Ok(Vec::new());
        }
        let contents = self.read_string().await?;
        Ok(contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }

    pub async fn write_bytes(&self, contents: &[u8]) -> Result<(), DeployError> {
        self.ensure_parent().await?;
        let mut file = fs::File::create(&self.path).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Serialize `value` as pretty JSON and replace the file atomically
    pub async fn write_json<T: Serialize>(&self, value: &T) -> Result<(), DeployError> {
        let contents = serde_json::to_vec_pretty(value)?;
        self.write_atomic(&contents).await
    }

    /// Append `value` as a single JSON line
    pub async fn append_json_line<T: Serialize>(&self, value: &T) -> Result<(), DeployError> {
        self.ensure_parent().await?;
        let mut line = serde_json::to_vec(value)?;
        line.push(b'\n');
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    pub async fn delete(&self) -> Result<(), DeployError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomic write using a temporary sibling file
    pub async fn write_atomic(&self, contents: &[u8]) -> Result<(), DeployError> {
        self.ensure_parent().await?;
        let temp_path = self.path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }

    async fn ensure_parent(&self) -> Result<(), DeployError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Line {
        n: u32,
    }

    #[tokio::test]
    async fn test_json_lines_append_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let file = File::new(dir.path().join("nested").join("log.jsonl"));

        assert!(file.read_json_lines::<Line>().await.unwrap().is_empty());

        file.append_json_line(&Line { n: 1 }).await.unwrap();
        file.append_json_line(&Line { n: 2 }).await.unwrap();

        let lines: Vec<Line> = file.read_json_lines().await.unwrap();
        assert_eq!(lines, vec![Line { n: 1 }, Line { n: 2 }]);
    }

    #[tokio::test]
    async fn test_write_json_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let file = File::new(dir.path().join("record.json"));

        file.write_json(&Line { n: 1 }).await.unwrap();
        file.write_json(&Line { n: 5 }).await.unwrap();

        assert_eq!(file.read_json::<Line>().await.unwrap(), Line { n: 5 });
        assert!(!File::new(dir.path().join("record.tmp")).exists().await);
    }

    #[tokio::test]
    async fn test_delete_missing_file_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let file = File::new(dir.path().join("absent.json"));
        file.delete().await.unwrap();
    }
}
