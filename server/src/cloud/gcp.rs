//! Google Cloud REST control plane

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gcp_api::models::{ComputeOperation, ErrorEnvelope, ObjectList, RunOperation};
use gcp_auth::TokenProvider;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info};
use url::Url;

use crate::cloud::control_plane::{
    ControlPlane, ObjectSink, Operation, OperationApi, OperationState, ResourceKind, ResourceRef,
};
use crate::cloud::naming::COMPUTE_API;
use crate::errors::DeployError;
use crate::utils::RetryPolicy;

const SCOPES: &[&str] = &["https://www.googleapis.com/auth/cloud-platform"];
const STORAGE_API: &str = "https://storage.googleapis.com/storage/v1";
const UPLOAD_API: &str = "https://storage.googleapis.com/upload/storage/v1";
const DNS_API: &str = "https://dns.googleapis.com/dns/v1";
const RUN_API: &str = "https://run.googleapis.com/v2";

/// Body of one request, cloned for each retry attempt
#[derive(Clone)]
enum Payload {
    Empty,
    Json(Value),
    Multipart { boundary: String, body: Vec<u8> },
}

pub struct GcpControlPlane {
    project_id: String,
    client: reqwest::Client,
    token_provider: Arc<dyn TokenProvider>,
}

impl GcpControlPlane {
    /// Discover credentials from the environment; an empty `project_id`
    /// falls back to the project of those credentials
    pub async fn connect(project_id: &str) -> Result<Self, DeployError> {
        let token_provider = gcp_auth::provider().await?;

        let project_id = if project_id.is_empty() {
            token_provider.project_id().await?.to_string()
        } else {
            project_id.to_string()
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        info!("Using Google Cloud project {}", project_id);
        Ok(Self {
            project_id,
            client,
            token_provider,
        })
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    // ===== URLS =====

    fn resource_url(&self, resource: &ResourceRef) -> Result<Url, DeployError> {
        let p = self.project_id.as_str();
        let name = resource.name.as_str();
        match resource.kind {
            ResourceKind::StorageBucket => endpoint(STORAGE_API, &["b", name]),
            ResourceKind::BucketIamPolicy => endpoint(STORAGE_API, &["b", name, "iam"]),
            ResourceKind::DnsZone => endpoint(DNS_API, &["projects", p, "managedZones", name]),
            ResourceKind::DnsRecordSet => {
                let zone = parent(resource)?;
                let (dns_name, record_type) = name.rsplit_once('/').ok_or_else(|| {
                    DeployError::Internal(format!("malformed record set name '{}'", name))
                })?;
                endpoint(
                    DNS_API,
                    &["projects", p, "managedZones", zone, "rrsets", dns_name, record_type],
                )
            }
            ResourceKind::RunService | ResourceKind::RunServiceIamPolicy => {
                let region = parent(resource)?;
                endpoint(RUN_API, &["projects", p, "locations", region, "services", name])
            }
            kind => {
                let collection = kind.compute_collection().ok_or_else(|| {
                    DeployError::Internal(format!("no endpoint for {}", kind.label()))
                })?;
                endpoint(COMPUTE_API, &["projects", p, "global", collection, name])
            }
        }
    }

    fn collection_url(&self, resource: &ResourceRef) -> Result<Url, DeployError> {
        let p = self.project_id.as_str();
        match resource.kind {
            ResourceKind::StorageBucket => {
                let mut url = endpoint(STORAGE_API, &["b"])?;
                url.query_pairs_mut().append_pair("project", p);
                Ok(url)
            }
            ResourceKind::DnsZone => endpoint(DNS_API, &["projects", p, "managedZones"]),
            ResourceKind::DnsRecordSet => {
                let zone = parent(resource)?;
                endpoint(DNS_API, &["projects", p, "managedZones", zone, "rrsets"])
            }
            ResourceKind::RunService => {
                let region = parent(resource)?;
                let mut url = endpoint(RUN_API, &["projects", p, "locations", region, "services"])?;
                url.query_pairs_mut().append_pair("serviceId", &resource.name);
                Ok(url)
            }
            kind => {
                let collection = kind.compute_collection().ok_or_else(|| {
                    DeployError::Internal(format!("{} cannot be created", kind.label()))
                })?;
                endpoint(COMPUTE_API, &["projects", p, "global", collection])
            }
        }
    }

    /// Cloud Run IAM verbs are custom methods on the service URL
    fn run_iam_url(&self, resource: &ResourceRef, verb: &str) -> Result<Url, DeployError> {
        let mut url = self.resource_url(resource)?;
        let path = format!("{}:{}", url.path(), verb);
        url.set_path(&path);
        Ok(url)
    }

    // ===== TRANSPORT =====

    async fn send(&self, method: Method, url: Url, payload: Payload) -> Result<Value, DeployError> {
        let label = format!("{} {}", method, url.path());
        RetryPolicy::API
            .retry(&label, || self.send_once(method.clone(), url.clone(), payload.clone()))
            .await
    }

    async fn send_once(
        &self,
        method: Method,
        url: Url,
        payload: Payload,
    ) -> Result<Value, DeployError> {
        let token = self.token_provider.token(SCOPES).await?;
        let request = self
            .client
            .request(method, url)
            .bearer_auth(token.as_str());
        let request = match payload {
            Payload::Empty => request,
            Payload::Json(body) => request.json(&body),
            Payload::Multipart { boundary, body } => request
                .header(
                    reqwest::header::CONTENT_TYPE,
                    format!("multipart/related; boundary={}", boundary),
                )
                .body(body),
        };

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            return Ok(serde_json::from_str(&text)?);
        }

        let message = serde_json::from_str::<ErrorEnvelope>(&text)
            .map(|envelope| envelope.error.message)
            .unwrap_or(text);
        Err(match status {
            StatusCode::NOT_FOUND => DeployError::NotFound(message),
            StatusCode::CONFLICT => DeployError::AlreadyExists(message),
            _ => DeployError::ControlPlane {
                status: status.as_u16(),
                message,
            },
        })
    }

    fn operation_from(&self, resource: &ResourceRef, response: Value) -> Result<Operation, DeployError> {
        if resource.kind.compute_collection().is_some() {
            let op: ComputeOperation = serde_json::from_value(response)?;
            return Ok(Operation::compute(op.name));
        }
        if resource.kind == ResourceKind::RunService {
            let op: RunOperation = serde_json::from_value(response)?;
            if op.done {
                return Ok(Operation::immediate(op.name));
            }
            return Ok(Operation::run(op.name));
        }
        Ok(Operation::immediate(resource.name.clone()))
    }

    /// Buckets must be empty before they can be deleted
    async fn empty_bucket(&self, bucket: &str) -> Result<(), DeployError> {
        let mut page_token: Option<String> = None;
        let mut deleted = 0usize;
        loop {
            let mut url = endpoint(STORAGE_API, &["b", bucket, "o"])?;
            if let Some(token) = &page_token {
                url.query_pairs_mut().append_pair("pageToken", token);
            }
            let page: ObjectList = serde_json::from_value(self.send(Method::GET, url, Payload::Empty).await?)?;

            for item in &page.items {
                let url = endpoint(STORAGE_API, &["b", bucket, "o", &item.name])?;
                match self.send(Method::DELETE, url, Payload::Empty).await {
                    Ok(_) | Err(DeployError::NotFound(_)) => deleted += 1,
                    Err(e) => return Err(e),
                }
            }

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        debug!("Deleted {} objects from bucket {}", deleted, bucket);
        Ok(())
    }
}

fn endpoint(base: &str, segments: &[&str]) -> Result<Url, DeployError> {
    let mut url =
        Url::parse(base).map_err(|e| DeployError::Internal(format!("bad base URL {}: {}", base, e)))?;
    url.path_segments_mut()
        .map_err(|_| DeployError::Internal(format!("base URL {} cannot hold a path", base)))?
        .extend(segments);
    Ok(url)
}

fn parent(resource: &ResourceRef) -> Result<&str, DeployError> {
    resource
        .parent
        .as_deref()
        .ok_or_else(|| DeployError::Internal(format!("{} is missing its parent", resource)))
}

#[async_trait]
impl ControlPlane for GcpControlPlane {
    async fn get(&self, resource: &ResourceRef) -> Result<Option<Value>, DeployError> {
        let result = match resource.kind {
            ResourceKind::RunServiceIamPolicy => {
                let url = self.run_iam_url(resource, "getIamPolicy")?;
                self.send(Method::GET, url, Payload::Empty).await
            }
            _ => {
                let url = self.resource_url(resource)?;
                self.send(Method::GET, url, Payload::Empty).await
            }
        };
        match result {
            Ok(value) => Ok(Some(value)),
            Err(DeployError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create(&self, resource: &ResourceRef, body: &Value) -> Result<Operation, DeployError> {
        if resource.kind.is_policy() {
            return self.patch(resource, body).await;
        }
        let url = self.collection_url(resource)?;
        let response = self.send(Method::POST, url, Payload::Json(body.clone())).await?;
        self.operation_from(resource, response)
    }

    async fn patch(&self, resource: &ResourceRef, body: &Value) -> Result<Operation, DeployError> {
        let response = match resource.kind {
            ResourceKind::BucketIamPolicy => {
                let url = self.resource_url(resource)?;
                self.send(Method::PUT, url, Payload::Json(body.clone())).await?
            }
            ResourceKind::RunServiceIamPolicy => {
                let url = self.run_iam_url(resource, "setIamPolicy")?;
                self.send(Method::POST, url, Payload::Json(json!({ "policy": body })))
                    .await?
            }
            _ => {
                let url = self.resource_url(resource)?;
                self.send(Method::PATCH, url, Payload::Json(body.clone())).await?
            }
        };
        self.operation_from(resource, response)
    }

    async fn delete(&self, resource: &ResourceRef) -> Result<Operation, DeployError> {
        if resource.kind.is_policy() {
            return Ok(Operation::immediate(resource.name.clone()));
        }
        if resource.kind == ResourceKind::StorageBucket {
            self.empty_bucket(&resource.name).await?;
        }
        let url = self.resource_url(resource)?;
        let response = self.send(Method::DELETE, url, Payload::Empty).await?;
        self.operation_from(resource, response)
    }

    async fn operation_state(&self, operation: &Operation) -> Result<OperationState, DeployError> {
        match operation.api {
            OperationApi::Immediate => Ok(OperationState::Done),
            OperationApi::Compute => {
                let url = endpoint(
                    COMPUTE_API,
                    &["projects", &self.project_id, "global", "operations", &operation.name],
                )?;
                let op: ComputeOperation =
                    serde_json::from_value(self.send(Method::GET, url, Payload::Empty).await?)?;
                if !op.is_done() {
                    return Ok(OperationState::Pending);
                }
                Ok(match op.error_detail() {
                    Some(detail) => OperationState::Failed(detail),
                    None => OperationState::Done,
                })
            }
            OperationApi::Run => {
                let segments: Vec<&str> = operation.name.split('/').collect();
                let url = endpoint(RUN_API, &segments)?;
                let op: RunOperation =
                    serde_json::from_value(self.send(Method::GET, url, Payload::Empty).await?)?;
                if !op.done {
                    return Ok(OperationState::Pending);
                }
                Ok(match op.error {
                    Some(status) => OperationState::Failed(status.message),
                    None => OperationState::Done,
                })
            }
        }
    }

    async fn invalidate_cache(&self, url_map: &str, path: &str) -> Result<Operation, DeployError> {
        let url = endpoint(
            COMPUTE_API,
            &["projects", &self.project_id, "global", "urlMaps", url_map, "invalidateCache"],
        )?;
        let response = self
            .send(Method::POST, url, Payload::Json(json!({ "path": path })))
            .await?;
        let op: ComputeOperation = serde_json::from_value(response)?;
        Ok(Operation::compute(op.name))
    }
}

#[async_trait]
impl ObjectSink for GcpControlPlane {
    async fn put_object(
        &self,
        bucket: &str,
        name: &str,
        body: Vec<u8>,
        content_type: &str,
        cache_control: &str,
    ) -> Result<(), DeployError> {
        let mut url = endpoint(UPLOAD_API, &["b", bucket, "o"])?;
        url.query_pairs_mut().append_pair("uploadType", "multipart");

        let metadata = json!({
            "name": name,
            "contentType": content_type,
            "cacheControl": cache_control,
        });
        let boundary = format!("webdeploy-{}", uuid::Uuid::new_v4().simple());
        let payload = Payload::Multipart {
            body: multipart_related(&boundary, &metadata, content_type, &body)?,
            boundary,
        };

        self.send(Method::POST, url, payload).await?;
        Ok(())
    }
}

fn multipart_related(
    boundary: &str,
    metadata: &Value,
    content_type: &str,
    data: &[u8],
) -> Result<Vec<u8>, DeployError> {
    let mut body = Vec::with_capacity(data.len() + 512);
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n",
            boundary
        )
        .as_bytes(),
    );
    body.extend_from_slice(&serde_json::to_vec(metadata)?);
    body.extend_from_slice(format!("\r\n--{}\r\nContent-Type: {}\r\n\r\n", boundary, content_type).as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    Ok(body)
}
