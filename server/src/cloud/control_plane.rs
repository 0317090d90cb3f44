//! Control plane abstraction
//!
//! A [`ControlPlane`] exposes the five raw verbs provisioning needs: get,
//! create, patch, delete and operation polling. It reports absence and
//! conflicts as [`DeployError::NotFound`] and [`DeployError::AlreadyExists`];
//! turning those into idempotent outcomes is the ensurer's job.
//!
//! [`DeployError::NotFound`]: crate::errors::DeployError::NotFound
//! [`DeployError::AlreadyExists`]: crate::errors::DeployError::AlreadyExists

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::DeployError;

/// Kinds of external resources the provisioners manage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    StorageBucket,
    BucketIamPolicy,
    BackendBucket,
    UrlMap,
    GlobalAddress,
    SslCertificate,
    TargetHttpProxy,
    TargetHttpsProxy,
    ForwardingRule,
    DnsZone,
    DnsRecordSet,
    RunService,
    RunServiceIamPolicy,
}

impl ResourceKind {
    pub fn label(&self) -> &'static str {
        match self {
            ResourceKind::StorageBucket => "storage bucket",
            ResourceKind::BucketIamPolicy => "bucket IAM policy",
            ResourceKind::BackendBucket => "backend bucket",
            ResourceKind::UrlMap => "URL map",
            ResourceKind::GlobalAddress => "static IP",
            ResourceKind::SslCertificate => "SSL certificate",
            ResourceKind::TargetHttpProxy => "HTTP proxy",
            ResourceKind::TargetHttpsProxy => "HTTPS proxy",
            ResourceKind::ForwardingRule => "forwarding rule",
            ResourceKind::DnsZone => "DNS zone",
            ResourceKind::DnsRecordSet => "DNS record set",
            ResourceKind::RunService => "Cloud Run service",
            ResourceKind::RunServiceIamPolicy => "Cloud Run IAM policy",
        }
    }

    /// Global compute collection, for kinds that live in one
    pub fn compute_collection(&self) -> Option<&'static str> {
        match self {
            ResourceKind::BackendBucket => Some("backendBuckets"),
            ResourceKind::UrlMap => Some("urlMaps"),
            ResourceKind::GlobalAddress => Some("addresses"),
            ResourceKind::SslCertificate => Some("sslCertificates"),
            ResourceKind::TargetHttpProxy => Some("targetHttpProxies"),
            ResourceKind::TargetHttpsProxy => Some("targetHttpsProxies"),
            ResourceKind::ForwardingRule => Some("forwardingRules"),
            _ => None,
        }
    }

    /// IAM policies are set, never created or deleted
    pub fn is_policy(&self) -> bool {
        matches!(
            self,
            ResourceKind::BucketIamPolicy | ResourceKind::RunServiceIamPolicy
        )
    }
}

/// Name of one external resource
///
/// `parent` scopes resources that live under another one: the managed zone
/// of a record set, or the region of a Cloud Run service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub name: String,
    pub parent: Option<String>,
}

impl ResourceRef {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            parent: None,
        }
    }

    pub fn within(kind: ResourceKind, name: impl Into<String>, parent: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            parent: Some(parent.into()),
        }
    }

    /// Record set `record_type` for `dns_name` inside `zone`
    pub fn record_set(zone: &str, dns_name: &str, record_type: &str) -> Self {
        Self::within(
            ResourceKind::DnsRecordSet,
            format!("{}/{}", dns_name, record_type),
            zone,
        )
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.kind.label(), self.name)
    }
}

/// Which API an operation handle belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationApi {
    Compute,
    Run,
    /// The call completed synchronously, nothing to poll
    Immediate,
}

/// Handle of an asynchronous control-plane operation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Operation {
    pub name: String,
    pub api: OperationApi,
}

impl Operation {
    pub fn compute(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            api: OperationApi::Compute,
        }
    }

    pub fn run(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            api: OperationApi::Run,
        }
    }

    pub fn immediate(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            api: OperationApi::Immediate,
        }
    }

    pub fn is_immediate(&self) -> bool {
        self.api == OperationApi::Immediate
    }
}

/// Polled state of an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationState {
    Pending,
    Done,
    Failed(String),
}

#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Live state of the resource, `None` when it does not exist
    async fn get(&self, resource: &ResourceRef) -> Result<Option<Value>, DeployError>;

    async fn create(&self, resource: &ResourceRef, body: &Value) -> Result<Operation, DeployError>;

    async fn patch(&self, resource: &ResourceRef, body: &Value) -> Result<Operation, DeployError>;

    async fn delete(&self, resource: &ResourceRef) -> Result<Operation, DeployError>;

    async fn operation_state(&self, operation: &Operation) -> Result<OperationState, DeployError>;

    /// Invalidate cached CDN content matching `path` behind `url_map`
    async fn invalidate_cache(&self, url_map: &str, path: &str) -> Result<Operation, DeployError>;
}

/// Destination of uploaded site files
#[async_trait]
pub trait ObjectSink: Send + Sync {
    async fn put_object(
        &self,
        bucket: &str,
        name: &str,
        body: Vec<u8>,
        content_type: &str,
        cache_control: &str,
    ) -> Result<(), DeployError>;
}
