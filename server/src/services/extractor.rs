//! Archive extraction and project detection

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::logstream::ProgressSink;
use crate::models::DeploymentMode;
use crate::pipeline::{ProjectDescriptor, SourceProcessor};
use crate::services::command::{run_command, CommandLine};

const ROUTER_PACKAGES: &[&str] = &[
    "react-router-dom",
    "react-router",
    "vue-router",
    "@tanstack/react-router",
];

/// Unpacks archives with `unzip` and works out what kind of project they hold
pub struct ArchiveExtractor {
    timeout: Duration,
}

impl ArchiveExtractor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn unpack(&self, archive: &Path, dest: &Dir, sink: &dyn ProgressSink) -> Result<(), DeployError> {
        dest.create().await?;
        let archive = archive.to_string_lossy();
        let dest_path = dest.path().to_string_lossy();
        let line = CommandLine::new("unzip", &["-q", "-o", archive.as_ref(), "-d", dest_path.as_ref()]);

        let output = run_command(&line, dest.path(), self.timeout, sink).await?;
        if !output.success {
            return Err(DeployError::ValidationError(format!(
                "Archive could not be extracted: {}",
                output.error_tail(500)
            )));
        }
        Ok(())
    }
}

impl Default for ArchiveExtractor {
    fn default() -> Self {
        Self::new(Duration::from_secs(120))
    }
}

#[async_trait]
impl SourceProcessor for ArchiveExtractor {
    async fn process(
        &self,
        archive: &Path,
        work_dir: &Dir,
        mode: DeploymentMode,
        sink: &dyn ProgressSink,
    ) -> Result<ProjectDescriptor, DeployError> {
        let extract_dir = work_dir.subdir("source");
        self.unpack(archive, &extract_dir, sink).await?;

        let root = project_root(&extract_dir).await?;
        debug!("Project root is {}", root.path().display());

        if mode == DeploymentMode::CloudRun {
            return generic_project(&root).await;
        }
        web_project(&root, sink).await
    }
}

/// Descend into the single top-level folder most archives wrap their files in
async fn project_root(extract_dir: &Dir) -> Result<Dir, DeployError> {
    let visible = |path: &PathBuf| {
        path.file_name()
            .map(|name| {
                let name = name.to_string_lossy();
                !name.starts_with('.') && name != "__MACOSX"
            })
            .unwrap_or(false)
    };

    let files: Vec<PathBuf> = extract_dir.list_files().await?.into_iter().filter(visible).collect();
    let dirs: Vec<PathBuf> = extract_dir.list_dirs().await?.into_iter().filter(visible).collect();

    match (files.len(), dirs.as_slice()) {
        (0, []) => Err(DeployError::ValidationError("Archive is empty".to_string())),
        (0, [single]) => Ok(Dir::new(single.clone())),
        _ => Ok(extract_dir.clone()),
    }
}

/// Cloud Run projects are built from their Dockerfile as-is
async fn generic_project(root: &Dir) -> Result<ProjectDescriptor, DeployError> {
    let framework = if root.file("Dockerfile").exists().await {
        Some("docker")
    } else if root.file("package.json").exists().await {
        Some("node")
    } else if root.file("requirements.txt").exists().await {
        Some("python")
    } else if root.file("go.mod").exists().await {
        Some("go")
    } else {
        None
    };

    Ok(ProjectDescriptor {
        source_dir: root.path().to_path_buf(),
        output_dir: root.path().to_path_buf(),
        is_static: false,
        framework: framework.map(str::to_string),
        has_router: false,
    })
}

/// A Node project with a build script, or plain files served as they are
async fn web_project(root: &Dir, sink: &dyn ProgressSink) -> Result<ProjectDescriptor, DeployError> {
    let package_json = root.file("package.json");
    if package_json.exists().await {
        let manifest: Value = package_json.read_json().await.map_err(|e| {
            DeployError::ValidationError(format!("package.json is not valid JSON: {}", e))
        })?;
        let framework = if has_dependency(&manifest, "vite") {
            "vite"
        } else {
            "node"
        };
        let has_router = ROUTER_PACKAGES
            .iter()
            .any(|package| has_dependency(&manifest, package));
        if has_router {
            sink.info("Detected client-side router".to_string()).await;
        }
        if manifest.pointer("/scripts/build").is_none() {
            sink.warn("package.json has no build script".to_string()).await;
        }

        return Ok(ProjectDescriptor {
            source_dir: root.path().to_path_buf(),
            output_dir: root.path().join("dist"),
            is_static: false,
            framework: Some(framework.to_string()),
            has_router,
        });
    }

    for candidate in [root.clone(), root.subdir("dist"), root.subdir("build")] {
        if candidate.file("index.html").exists().await {
            return Ok(ProjectDescriptor {
                source_dir: root.path().to_path_buf(),
                output_dir: candidate.path().to_path_buf(),
                is_static: true,
                framework: None,
                has_router: false,
            });
        }
    }

    Err(DeployError::ValidationError(
        "Archive contains neither a package.json nor an index.html".to_string(),
    ))
}

fn has_dependency(manifest: &Value, package: &str) -> bool {
    ["dependencies", "devDependencies"]
        .iter()
        .any(|section| manifest.get(section).and_then(|deps| deps.get(package)).is_some())
}

/// Whether `dir` holds a servable site entry point
pub async fn has_index(dir: &Path) -> bool {
    File::new(dir.join("index.html")).exists().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LogSeverity;

    struct Quiet;

    #[async_trait]
    impl ProgressSink for Quiet {
        async fn emit(&self, _level: LogSeverity, _message: String) {}
    }

    async fn write(dir: &Dir, name: &str, contents: &str) {
        dir.create().await.unwrap();
        dir.file(name).write_bytes(contents.as_bytes()).await.unwrap();
    }

    #[tokio::test]
    async fn test_single_folder_is_unwrapped() {
        let root = tempfile::tempdir().unwrap();
        let extract = Dir::new(root.path());
        write(&extract.subdir("my-site"), "index.html", "<html/>").await;
        extract.subdir("__MACOSX").create().await.unwrap();

        let project_dir = project_root(&extract).await.unwrap();
        assert_eq!(project_dir.path(), root.path().join("my-site"));
    }

    #[tokio::test]
    async fn test_vite_project_with_router() {
        let root = tempfile::tempdir().unwrap();
        let dir = Dir::new(root.path());
        write(
            &dir,
            "package.json",
            r#"{"scripts":{"build":"vite build"},"dependencies":{"react-router-dom":"6"},"devDependencies":{"vite":"5"}}"#,
        )
        .await;

        let project = web_project(&dir, &Quiet).await.unwrap();
        assert!(!project.is_static);
        assert!(project.has_router);
        assert_eq!(project.framework.as_deref(), Some("vite"));
        assert_eq!(project.output_dir, root.path().join("dist"));
    }

    #[tokio::test]
    async fn test_static_site_fallback() {
        let root = tempfile::tempdir().unwrap();
        let dir = Dir::new(root.path());
        write(&dir, "index.html", "<html/>").await;

        let project = web_project(&dir, &Quiet).await.unwrap();
        assert!(project.is_static);
        assert_eq!(project.output_dir, root.path());
        assert!(has_index(&project.output_dir).await);
    }

    #[tokio::test]
    async fn test_unrecognized_archive_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let dir = Dir::new(root.path());
        write(&dir, "notes.txt", "hello").await;

        let result = web_project(&dir, &Quiet).await;
        assert!(matches!(result, Err(DeployError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_generic_project_detects_dockerfile() {
        let root = tempfile::tempdir().unwrap();
        let dir = Dir::new(root.path());
        write(&dir, "Dockerfile", "FROM nginx").await;

        let project = generic_project(&dir).await.unwrap();
        assert_eq!(project.framework.as_deref(), Some("docker"));
        assert!(!project.is_static);
    }
}
