//! Demo mode: one bucket per site behind the shared load balancer
//!
//! Every site is served under `https://{demo_domain}/{name}/` through a path
//! rule appended to a URL map that already exists and is shared by all demo
//! sites.

use async_trait::async_trait;
use serde_json::json;

use crate::cloud::naming::DemoNames;
use crate::cloud::{ResourceEnsurer, ResourceKind, ResourceRef, ResourceSpec};
use crate::errors::DeployError;
use crate::logstream::ProgressSink;
use crate::models::DeploymentMode;
use crate::provision::{
    add_path_rule, backend_body, bucket_body, ensure_logged, policy_grant, remove_path_rule,
    self_link, CacheTarget, ProvisionRequest, ProvisionResult, Provisioner, Teardown,
    TeardownReport, BACKEND_FIELDS, BUCKET_FIELDS,
};
use crate::storage::settings::DemoSettings;

pub struct DemoProvisioner {
    ensurer: ResourceEnsurer,
    settings: DemoSettings,
}

impl DemoProvisioner {
    pub fn new(ensurer: ResourceEnsurer, settings: DemoSettings) -> Self {
        Self { ensurer, settings }
    }

    fn url_map(&self) -> ResourceRef {
        ResourceRef::new(ResourceKind::UrlMap, self.settings.url_map_name.clone())
    }

    fn site_paths(website_name: &str) -> Vec<String> {
        vec![format!("/{}", website_name), format!("/{}/*", website_name)]
    }
}

#[async_trait]
impl Provisioner for DemoProvisioner {
    fn mode(&self) -> DeploymentMode {
        DeploymentMode::Demo
    }

    async fn deploy(
        &self,
        request: &ProvisionRequest,
        sink: &dyn ProgressSink,
    ) -> Result<ProvisionResult, DeployError> {
        let names = DemoNames::for_site(&request.website_name)?;
        let domain = &self.settings.domain;
        sink.info(format!(
            "Provisioning demo infrastructure for '{}'",
            request.website_name
        ))
        .await;

        let bucket = ResourceRef::new(ResourceKind::StorageBucket, names.bucket.clone());
        let bucket_spec = ResourceSpec::with_fields(
            bucket,
            bucket_body(
                &names.bucket,
                &self.settings.bucket_location,
                &format!("https://{}", domain),
            ),
            BUCKET_FIELDS.to_vec(),
        );
        ensure_logged(&self.ensurer, &bucket_spec, sink).await?;

        let policy = ResourceRef::new(ResourceKind::BucketIamPolicy, names.bucket.clone());
        ensure_logged(
            &self.ensurer,
            &policy_grant(policy, "roles/storage.objectViewer", "allUsers"),
            sink,
        )
        .await?;

        let backend = ResourceRef::new(ResourceKind::BackendBucket, names.backend.clone());
        let backend_spec = ResourceSpec::with_fields(
            backend.clone(),
            backend_body(&names.backend, &names.bucket),
            BACKEND_FIELDS.to_vec(),
        );
        let backend_state = ensure_logged(&self.ensurer, &backend_spec, sink).await?;
        let backend_link = self_link(&backend_state, &backend)?;

        let host = domain.clone();
        let paths = Self::site_paths(&request.website_name);
        let route_spec = ResourceSpec::merged(self.url_map(), json!({}), move |live| {
            add_path_rule(live, &host, &paths, &backend_link)
        })
        .existing();
        ensure_logged(&self.ensurer, &route_spec, sink).await?;

        let url = format!("https://{}/{}/", domain, request.website_name);
        sink.info(format!("Demo infrastructure ready: {}", url)).await;

        Ok(ProvisionResult {
            url,
            bucket: Some(names.bucket),
            object_prefix: format!("{}/", request.website_name),
            cache_target: Some(CacheTarget {
                url_map: self.settings.url_map_name.clone(),
                path: format!("/{}/*", request.website_name),
            }),
            service: None,
        })
    }

    async fn delete(
        &self,
        request: &ProvisionRequest,
        sink: &dyn ProgressSink,
    ) -> Result<TeardownReport, DeployError> {
        let names = DemoNames::for_site(&request.website_name)?;
        let mut teardown = Teardown::new(&self.ensurer, sink);

        let host = self.settings.domain.clone();
        let paths = Self::site_paths(&request.website_name);
        let unroute_spec = ResourceSpec::merged(self.url_map(), json!({}), move |live| {
            remove_path_rule(live, &host, &paths)
        })
        .existing();
        teardown.detach(&unroute_spec, true).await?;

        teardown
            .remove(&ResourceRef::new(ResourceKind::BackendBucket, names.backend), false)
            .await?;
        teardown
            .remove(&ResourceRef::new(ResourceKind::StorageBucket, names.bucket), false)
            .await?;

        Ok(teardown.finish())
    }
}
