//! Cloud Run mode: one public service per site

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::cloud::naming::safe_name;
use crate::cloud::{ResourceEnsurer, ResourceKind, ResourceRef, ResourceSpec};
use crate::errors::DeployError;
use crate::logstream::ProgressSink;
use crate::models::DeploymentMode;
use crate::provision::{
    ensure_logged, policy_grant, ProvisionRequest, ProvisionResult, Provisioner, Teardown,
    TeardownReport,
};
use crate::storage::settings::CloudRunSettings;

pub struct CloudRunProvisioner {
    ensurer: ResourceEnsurer,
    settings: CloudRunSettings,
}

impl CloudRunProvisioner {
    pub fn new(ensurer: ResourceEnsurer, settings: CloudRunSettings) -> Self {
        Self { ensurer, settings }
    }

    fn service_body(&self, image_uri: &str) -> Value {
        let s = &self.settings;
        json!({
            "template": {
                "containers": [{
                    "image": image_uri,
                    "ports": [{ "containerPort": s.container_port }],
                    "resources": { "limits": { "memory": s.memory, "cpu": s.cpu } },
                }],
                "scaling": {
                    "maxInstanceCount": s.max_instances,
                    "minInstanceCount": s.min_instances,
                },
            },
        })
    }
}

#[async_trait]
impl Provisioner for CloudRunProvisioner {
    fn mode(&self) -> DeploymentMode {
        DeploymentMode::CloudRun
    }

    async fn deploy(
        &self,
        request: &ProvisionRequest,
        sink: &dyn ProgressSink,
    ) -> Result<ProvisionResult, DeployError> {
        let image_uri = request.image_uri.as_deref().ok_or_else(|| {
            DeployError::ProvisionError("no container image to deploy".to_string())
        })?;
        let name = safe_name(&request.website_name)?;
        let region = &self.settings.region;
        sink.info(format!(
            "Deploying {} to Cloud Run service '{}' in {}",
            image_uri, name, region
        ))
        .await;

        let service = ResourceRef::within(ResourceKind::RunService, name.clone(), region.clone());
        let state = ensure_logged(
            &self.ensurer,
            &ResourceSpec::with_fields(service.clone(), self.service_body(image_uri), vec!["template"]),
            sink,
        )
        .await?;

        ensure_logged(
            &self.ensurer,
            &policy_grant(
                ResourceRef::within(ResourceKind::RunServiceIamPolicy, name.clone(), region.clone()),
                "roles/run.invoker",
                "allUsers",
            ),
            sink,
        )
        .await?;

        let url = state
            .get("uri")
            .and_then(Value::as_str)
            .filter(|uri| !uri.is_empty())
            .ok_or_else(|| DeployError::ProvisionError(format!("{} has no URL", service)))?
            .to_string();
        sink.info(format!("Cloud Run service live at {}", url)).await;

        Ok(ProvisionResult {
            url,
            bucket: None,
            object_prefix: String::new(),
            cache_target: None,
            service: Some(name),
        })
    }

    async fn delete(
        &self,
        request: &ProvisionRequest,
        sink: &dyn ProgressSink,
    ) -> Result<TeardownReport, DeployError> {
        let name = safe_name(&request.website_name)?;
        let mut teardown = Teardown::new(&self.ensurer, sink);
        teardown
            .remove(
                &ResourceRef::within(ResourceKind::RunService, name, self.settings.region.clone()),
                true,
            )
            .await?;
        Ok(teardown.finish())
    }
}
