//! Per-mode infrastructure provisioning and teardown

pub mod cloudrun;
pub mod demo;
pub mod prod;

use std::sync::Arc;

use async_trait::async_trait;
use gcp_api::models::{PathRule, Policy, UrlMap};
use serde_json::{json, Value};

use crate::cloud::{EnsureOutcome, Removal, ResourceEnsurer, ResourceRef, ResourceSpec};
use crate::errors::DeployError;
use crate::logstream::ProgressSink;
use crate::models::DeploymentMode;

pub use cloudrun::CloudRunProvisioner;
pub use demo::DemoProvisioner;
pub use prod::ProdProvisioner;

/// What a provisioner is asked to stand up or tear down
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionRequest {
    pub website_name: String,
    pub domain: Option<String>,
    /// Container image, for Cloud Run deployments
    pub image_uri: Option<String>,
}

impl ProvisionRequest {
    pub fn new(website_name: &str, domain: Option<&str>) -> Self {
        Self {
            website_name: website_name.to_string(),
            domain: domain.map(str::to_string),
            image_uri: None,
        }
    }

    pub fn with_image(mut self, image_uri: impl Into<String>) -> Self {
        self.image_uri = Some(image_uri.into());
        self
    }

    pub(crate) fn require_domain(&self) -> Result<&str, DeployError> {
        self.domain
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .ok_or_else(|| DeployError::ValidationError("prod mode requires a domain".to_string()))
    }
}

/// CDN content to invalidate once new files are in place
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheTarget {
    pub url_map: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionResult {
    pub url: String,
    /// Bucket that receives the site files
    pub bucket: Option<String>,
    /// Prefix prepended to every uploaded object
    pub object_prefix: String,
    pub cache_target: Option<CacheTarget>,
    pub service: Option<String>,
}

/// Non-critical failures collected while tearing down
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub warnings: Vec<String>,
}

#[async_trait]
pub trait Provisioner: Send + Sync {
    fn mode(&self) -> DeploymentMode;

    async fn deploy(
        &self,
        request: &ProvisionRequest,
        sink: &dyn ProgressSink,
    ) -> Result<ProvisionResult, DeployError>;

    async fn delete(
        &self,
        request: &ProvisionRequest,
        sink: &dyn ProgressSink,
    ) -> Result<TeardownReport, DeployError>;
}

/// One provisioner per deployment mode
#[derive(Clone)]
pub struct ProvisionerSet {
    provisioners: Vec<Arc<dyn Provisioner>>,
}

impl ProvisionerSet {
    pub fn new(provisioners: Vec<Arc<dyn Provisioner>>) -> Self {
        Self { provisioners }
    }

    pub fn get(&self, mode: DeploymentMode) -> Result<Arc<dyn Provisioner>, DeployError> {
        self.provisioners
            .iter()
            .find(|p| p.mode() == mode)
            .cloned()
            .ok_or_else(|| DeployError::ConfigError(format!("no provisioner for mode {}", mode)))
    }
}

// ===== SHARED STEPS =====

/// Ensure `spec` and report the outcome to `sink`
pub(crate) async fn ensure_logged(
    ensurer: &ResourceEnsurer,
    spec: &ResourceSpec,
    sink: &dyn ProgressSink,
) -> Result<Value, DeployError> {
    sink.info(format!("Checking {}", spec.resource)).await;
    let outcome = ensurer.ensure(spec).await?;
    sink.info(format!("{}: {}", capitalize(&spec.resource.to_string()), outcome.verb()))
        .await;
    Ok(outcome.into_state())
}

pub(crate) fn self_link(state: &Value, resource: &ResourceRef) -> Result<String, DeployError> {
    state
        .get("selfLink")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| DeployError::ProvisionError(format!("{} has no selfLink", resource)))
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Storage bucket body: uniform access, SPA website config, CORS for `origin`
pub(crate) fn bucket_body(name: &str, location: &str, origin: &str) -> Value {
    json!({
        "name": name,
        "location": location,
        "iamConfiguration": { "uniformBucketLevelAccess": { "enabled": true } },
        "versioning": { "enabled": false },
        "website": { "mainPageSuffix": "index.html", "notFoundPage": "index.html" },
        "cors": [{
            "origin": [origin],
            "method": ["GET", "HEAD", "OPTIONS"],
            "responseHeader": ["Content-Type", "Access-Control-Allow-Origin", "x-goog-meta-*"],
            "maxAgeSeconds": 3600,
        }],
    })
}

pub(crate) const BUCKET_FIELDS: &[&str] = &["website", "cors"];

/// CDN backend bucket body in front of `bucket`
pub(crate) fn backend_body(name: &str, bucket: &str) -> Value {
    json!({
        "name": name,
        "bucketName": bucket,
        "enableCdn": true,
        "cdnPolicy": {
            "cacheMode": "CACHE_ALL_STATIC",
            "defaultTtl": 3600,
            "maxTtl": 86400,
            "clientTtl": 3600,
            "negativeCaching": true,
            "negativeCachingPolicy": [
                { "code": 404, "ttl": 120 },
                { "code": 410, "ttl": 120 },
            ],
        },
        "compressionMode": "AUTOMATIC",
        "customResponseHeaders": ["X-Content-Type-Options:nosniff"],
    })
}

pub(crate) const BACKEND_FIELDS: &[&str] = &[
    "bucketName",
    "enableCdn",
    "cdnPolicy",
    "compressionMode",
    "customResponseHeaders",
];

/// Policy spec granting `role` to `member`, keeping every other binding
pub(crate) fn policy_grant(resource: ResourceRef, role: &'static str, member: &'static str) -> ResourceSpec {
    ResourceSpec::merged(resource, json!({}), move |live| {
        let mut policy: Policy = serde_json::from_value(live.clone())?;
        if policy.grant(role, member) {
            Ok(Some(serde_json::to_value(policy)?))
        } else {
            Ok(None)
        }
    })
}

/// Add a rule routing `paths` to `service` under the matcher serving `host`
///
/// Present rules covering every path are a no-op; rules covering only some
/// of the paths are replaced; unrelated rules are kept as they are.
pub(crate) fn add_path_rule(
    live: &Value,
    host: &str,
    paths: &[String],
    service: &str,
) -> Result<Option<Value>, DeployError> {
    let mut map: UrlMap = serde_json::from_value(live.clone())?;
    let matcher_name = map
        .matcher_for_host(host)
        .ok_or_else(|| {
            DeployError::ProvisionError(format!(
                "no host rule for '{}' in URL map '{}'",
                host, map.name
            ))
        })?
        .to_string();
    let map_name = map.name.clone();
    let matcher = map.path_matcher_mut(&matcher_name).ok_or_else(|| {
        DeployError::ProvisionError(format!(
            "path matcher '{}' missing from URL map '{}'",
            matcher_name, map_name
        ))
    })?;

    if paths
        .iter()
        .all(|p| matcher.path_rules.iter().any(|rule| rule.covers(p)))
    {
        return Ok(None);
    }

    matcher
        .path_rules
        .retain(|rule| !paths.iter().any(|p| rule.covers(p)));
    matcher
        .path_rules
        .push(PathRule::new(paths.to_vec(), service));

    Ok(Some(url_map_patch(&map)?))
}

/// Drop every rule touching `paths` from the matcher serving `host`
pub(crate) fn remove_path_rule(
    live: &Value,
    host: &str,
    paths: &[String],
) -> Result<Option<Value>, DeployError> {
    let mut map: UrlMap = serde_json::from_value(live.clone())?;
    let Some(matcher_name) = map.matcher_for_host(host).map(str::to_string) else {
        return Ok(None);
    };
    let Some(matcher) = map.path_matcher_mut(&matcher_name) else {
        return Ok(None);
    };

    let before = matcher.path_rules.len();
    matcher
        .path_rules
        .retain(|rule| !paths.iter().any(|p| rule.covers(p)));
    if matcher.path_rules.len() == before {
        return Ok(None);
    }
    Ok(Some(url_map_patch(&map)?))
}

fn url_map_patch(map: &UrlMap) -> Result<Value, DeployError> {
    let mut patch = json!({ "pathMatchers": serde_json::to_value(&map.path_matchers)? });
    if let Some(fingerprint) = map.extra.get("fingerprint") {
        patch["fingerprint"] = fingerprint.clone();
    }
    Ok(patch)
}

/// Removes resources in order, collecting warnings for non-critical ones
pub(crate) struct Teardown<'a> {
    ensurer: &'a ResourceEnsurer,
    sink: &'a dyn ProgressSink,
    report: TeardownReport,
}

impl<'a> Teardown<'a> {
    pub(crate) fn new(ensurer: &'a ResourceEnsurer, sink: &'a dyn ProgressSink) -> Self {
        Self {
            ensurer,
            sink,
            report: TeardownReport::default(),
        }
    }

    /// Remove `resource`; a critical failure aborts the teardown
    pub(crate) async fn remove(&mut self, resource: &ResourceRef, critical: bool) -> Result<(), DeployError> {
        let result = self.ensurer.remove(resource).await;
        self.settle(resource, result, critical).await
    }

    /// Apply a merge spec that strips our entries out of a shared resource
    pub(crate) async fn detach(&mut self, spec: &ResourceSpec, critical: bool) -> Result<(), DeployError> {
        let result = match self.ensurer.fetch(&spec.resource).await {
            Ok(None) => Ok(Removal::AlreadyAbsent),
            Ok(Some(_)) => self.ensurer.ensure(spec).await.map(|outcome| match outcome {
                EnsureOutcome::Unchanged(_) => Removal::AlreadyAbsent,
                _ => Removal::Deleted,
            }),
            Err(e) => Err(e),
        };
        self.settle(&spec.resource, result, critical).await
    }

    async fn settle(
        &mut self,
        resource: &ResourceRef,
        result: Result<Removal, DeployError>,
        critical: bool,
    ) -> Result<(), DeployError> {
        match result {
            Ok(Removal::AlreadyAbsent) => {
                self.sink.info(format!("{} already removed", capitalize(&resource.to_string()))).await;
                Ok(())
            }
            Ok(Removal::Deleted) => {
                self.sink.info(format!("{} removed", capitalize(&resource.to_string()))).await;
                Ok(())
            }
            Err(e) if critical => {
                self.sink
                    .warn(format!("Failed to remove {}: {}", resource, e))
                    .await;
                Err(DeployError::ProvisionError(format!(
                    "failed to remove {}: {}",
                    resource, e
                )))
            }
            Err(e) => {
                let warning = format!("Failed to remove {}: {}", resource, e);
                self.sink.warn(warning.clone()).await;
                self.report.warnings.push(warning);
                Ok(())
            }
        }
    }

    pub(crate) fn finish(self) -> TeardownReport {
        self.report
    }
}
