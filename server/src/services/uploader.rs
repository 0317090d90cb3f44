//! Bucket uploads of built sites

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::debug;

use crate::cloud::ObjectSink;
use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::logstream::ProgressSink;
use crate::pipeline::Uploader;

const HTML_CACHE_CONTROL: &str = "no-cache, no-store, must-revalidate";
const ASSET_CACHE_CONTROL: &str = "public, max-age=3600";
const MAX_PARALLEL_UPLOADS: usize = 10;

/// Puts every file of a directory into a bucket, in parallel
pub struct StorageUploader {
    objects: Arc<dyn ObjectSink>,
}

impl StorageUploader {
    pub fn new(objects: Arc<dyn ObjectSink>) -> Self {
        Self { objects }
    }

    async fn put(&self, root: &Path, relative: PathBuf, bucket: &str, prefix: &str) -> Result<(), DeployError> {
        let name = object_name(prefix, &relative);
        let body = File::new(root.join(&relative)).read_bytes().await?;
        let content_type = mime_guess::from_path(&relative)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        debug!("Uploading gs://{}/{} ({})", bucket, name, content_type);
        self.objects
            .put_object(bucket, &name, body, &content_type, cache_control(&relative))
            .await
    }
}

/// Object name for a file, always using `/` separators
pub fn object_name(prefix: &str, relative: &Path) -> String {
    let parts: Vec<String> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    format!("{}{}", prefix, parts.join("/"))
}

/// HTML is always revalidated, everything else may be cached briefly
pub fn cache_control(path: &Path) -> &'static str {
    let is_html = path
        .extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            ext == "html" || ext == "htm"
        })
        .unwrap_or(false);
    if is_html {
        HTML_CACHE_CONTROL
    } else {
        ASSET_CACHE_CONTROL
    }
}

#[async_trait]
impl Uploader for StorageUploader {
    async fn upload(
        &self,
        output_dir: &Path,
        bucket: &str,
        prefix: &str,
        sink: &dyn ProgressSink,
    ) -> Result<usize, DeployError> {
        let files = Dir::new(output_dir).walk_files().await?;
        if files.is_empty() {
            return Err(DeployError::ValidationError(format!(
                "Nothing to upload in {}",
                output_dir.display()
            )));
        }

        sink.info(format!(
            "Uploading {} files to gs://{}/{}",
            files.len(),
            bucket,
            prefix
        ))
        .await;

        let count = files.len();
        stream::iter(files)
            .map(|relative| self.put(output_dir, relative, bucket, prefix))
            .buffer_unordered(MAX_PARALLEL_UPLOADS)
            .try_collect::<Vec<()>>()
            .await?;
        Ok(count)
    }
}
