//! Default project inspector

use async_trait::async_trait;

use crate::errors::DeployError;
use crate::logstream::ProgressSink;
use crate::pipeline::{Inspector, ProjectDescriptor};

/// Accepts every project as it is
pub struct PassthroughInspector;

#[async_trait]
impl Inspector for PassthroughInspector {
    async fn inspect(
        &self,
        project: &ProjectDescriptor,
        sink: &dyn ProgressSink,
    ) -> Result<Option<String>, DeployError> {
        sink.info("No inspector configured, project accepted as uploaded".to_string())
            .await;
        let framework = project.framework.as_deref().unwrap_or("generic");
        let summary = if project.has_router {
            format!("{} project with client-side routing", framework)
        } else {
            format!("{} project", framework)
        };
        Ok(Some(summary))
    }

    async fn fix(&self, _project: &ProjectDescriptor, sink: &dyn ProgressSink) -> Result<(), DeployError> {
        sink.info("No fixes applied".to_string()).await;
        Ok(())
    }
}
