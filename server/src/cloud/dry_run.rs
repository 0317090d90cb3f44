//! In-process control plane
//!
//! Keeps resources in memory and answers every verb the way the cloud APIs
//! do, including asynchronous operations that finish after a configurable
//! number of polls. Backs `--dry-run` and the test suites.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crate::cloud::control_plane::{
    ControlPlane, ObjectSink, Operation, OperationApi, OperationState, ResourceKind, ResourceRef,
};
use crate::cloud::naming::compute_self_link;
use crate::errors::DeployError;

/// A mutating call observed by the plane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub verb: &'static str,
    pub resource: ResourceRef,
}

/// An uploaded object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: String,
    pub cache_control: String,
}

struct PendingOperation {
    polls_left: u32,
    failure: Option<String>,
}

#[derive(Default)]
struct PlaneState {
    resources: HashMap<ResourceRef, Value>,
    operations: HashMap<String, PendingOperation>,
    calls: Vec<RecordedCall>,
    operation_failures: HashMap<(ResourceRef, String), String>,
    call_failures: HashMap<(ResourceRef, String), (u16, String)>,
    objects: HashMap<String, BTreeMap<String, StoredObject>>,
    next_operation: u64,
    next_address: u8,
}

pub struct DryRunControlPlane {
    project_id: String,
    polls_to_finish: u32,
    state: Mutex<PlaneState>,
}

impl DryRunControlPlane {
    pub fn new(project_id: &str, polls_to_finish: u32) -> Self {
        Self {
            project_id: project_id.to_string(),
            polls_to_finish: polls_to_finish.max(1),
            state: Mutex::new(PlaneState::default()),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PlaneState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Put a resource in place without recording a call
    pub fn seed(&self, resource: ResourceRef, state: Value) {
        self.lock().resources.insert(resource, state);
    }

    pub fn resource(&self, resource: &ResourceRef) -> Option<Value> {
        self.lock().resources.get(resource).cloned()
    }

    pub fn mutating_calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    /// Make the operation started by `verb` on `resource` report failure
    pub fn fail_operation(&self, resource: &ResourceRef, verb: &str, detail: &str) {
        self.lock()
            .operation_failures
            .insert((resource.clone(), verb.to_string()), detail.to_string());
    }

    /// Make every `verb` call on `resource` return an API error
    pub fn fail_call(&self, resource: &ResourceRef, verb: &str, status: u16, message: &str) {
        self.lock()
            .call_failures
            .insert((resource.clone(), verb.to_string()), (status, message.to_string()));
    }

    pub fn clear_failures(&self) {
        let mut state = self.lock();
        state.operation_failures.clear();
        state.call_failures.clear();
    }

    pub fn objects(&self, bucket: &str) -> BTreeMap<String, StoredObject> {
        self.lock().objects.get(bucket).cloned().unwrap_or_default()
    }

    fn operation_api(kind: ResourceKind) -> OperationApi {
        if kind.compute_collection().is_some() {
            OperationApi::Compute
        } else if kind == ResourceKind::RunService {
            OperationApi::Run
        } else {
            OperationApi::Immediate
        }
    }

    /// Record the call and start its operation
    fn begin(
        &self,
        state: &mut PlaneState,
        verb: &'static str,
        resource: &ResourceRef,
    ) -> Result<Operation, DeployError> {
        let key = (resource.clone(), verb.to_string());
        if let Some((status, message)) = state.call_failures.get(&key) {
            return Err(api_error(*status, message));
        }

        state.calls.push(RecordedCall {
            verb,
            resource: resource.clone(),
        });
        state.next_operation += 1;
        let name = format!("operation-{}-{}", state.next_operation, verb);
        let failure = state.operation_failures.get(&key).cloned();

        match Self::operation_api(resource.kind) {
            OperationApi::Immediate => match failure {
                Some(detail) => Err(DeployError::OperationFailed {
                    operation: name,
                    detail,
                }),
                None => Ok(Operation::immediate(name)),
            },
            api => {
                state.operations.insert(
                    name.clone(),
                    PendingOperation {
                        polls_left: self.polls_to_finish,
                        failure,
                    },
                );
                Ok(Operation { name, api })
            }
        }
    }

    fn check_get(state: &PlaneState, resource: &ResourceRef) -> Result<(), DeployError> {
        match state.call_failures.get(&(resource.clone(), "get".to_string())) {
            Some((status, message)) => Err(api_error(*status, message)),
            None => Ok(()),
        }
    }

    /// Fill in the fields the provider would compute
    fn materialize(&self, state: &mut PlaneState, resource: &ResourceRef, body: &Value) -> Value {
        let mut value = body.clone();
        if let Some(obj) = value.as_object_mut() {
            obj.entry("name").or_insert_with(|| json!(resource.name));

            if let Some(collection) = resource.kind.compute_collection() {
                obj.insert(
                    "selfLink".to_string(),
                    json!(compute_self_link(&self.project_id, collection, &resource.name)),
                );
            }
            match resource.kind {
                ResourceKind::GlobalAddress => {
                    state.next_address = state.next_address.wrapping_add(1);
                    let address = format!("203.0.113.{}", state.next_address);
                    obj.entry("address").or_insert_with(|| json!(address));
                }
                ResourceKind::RunService => {
                    obj.insert(
                        "uri".to_string(),
                        json!(format!("https://{}-dryrun.a.run.app", resource.name)),
                    );
                }
                ResourceKind::DnsZone => {
                    obj.entry("nameServers").or_insert_with(|| {
                        json!(["ns-cloud-a1.googledomains.com.", "ns-cloud-a2.googledomains.com."])
                    });
                }
                _ => {}
            }
        }
        value
    }
}

fn api_error(status: u16, message: &str) -> DeployError {
    match status {
        404 => DeployError::NotFound(message.to_string()),
        409 => DeployError::AlreadyExists(message.to_string()),
        _ => DeployError::ControlPlane {
            status,
            message: message.to_string(),
        },
    }
}

#[async_trait]
impl ControlPlane for DryRunControlPlane {
    async fn get(&self, resource: &ResourceRef) -> Result<Option<Value>, DeployError> {
        let state = self.lock();
        Self::check_get(&state, resource)?;
        match state.resources.get(resource) {
            Some(value) => Ok(Some(value.clone())),
            None if resource.kind.is_policy() => Ok(Some(json!({ "bindings": [] }))),
            None => Ok(None),
        }
    }

    async fn create(&self, resource: &ResourceRef, body: &Value) -> Result<Operation, DeployError> {
        let mut state = self.lock();
        if state.resources.contains_key(resource) {
            return Err(DeployError::AlreadyExists(resource.to_string()));
        }
        let op = self.begin(&mut state, "create", resource)?;
        let value = self.materialize(&mut state, resource, body);
        state.resources.insert(resource.clone(), value);
        if resource.kind == ResourceKind::StorageBucket {
            state.objects.entry(resource.name.clone()).or_default();
        }
        Ok(op)
    }

    async fn patch(&self, resource: &ResourceRef, body: &Value) -> Result<Operation, DeployError> {
        let mut state = self.lock();
        if !resource.kind.is_policy() && !state.resources.contains_key(resource) {
            return Err(DeployError::NotFound(resource.to_string()));
        }
        let op = self.begin(&mut state, "patch", resource)?;

        if resource.kind.is_policy() {
            state.resources.insert(resource.clone(), body.clone());
        } else if let (Some(live), Some(fields)) = (
            state.resources.get_mut(resource).and_then(Value::as_object_mut),
            body.as_object(),
        ) {
            for (key, value) in fields {
                live.insert(key.clone(), value.clone());
            }
        }
        Ok(op)
    }

    async fn delete(&self, resource: &ResourceRef) -> Result<Operation, DeployError> {
        let mut state = self.lock();
        if !state.resources.contains_key(resource) {
            return Err(DeployError::NotFound(resource.to_string()));
        }
        let op = self.begin(&mut state, "delete", resource)?;
        state.resources.remove(resource);
        if resource.kind == ResourceKind::StorageBucket {
            state.objects.remove(&resource.name);
        }
        Ok(op)
    }

    async fn operation_state(&self, operation: &Operation) -> Result<OperationState, DeployError> {
        let mut state = self.lock();
        let Some(pending) = state.operations.get_mut(&operation.name) else {
            return Err(DeployError::NotFound(format!("operation {}", operation.name)));
        };
        if let Some(detail) = &pending.failure {
            return Ok(OperationState::Failed(detail.clone()));
        }
        pending.polls_left = pending.polls_left.saturating_sub(1);
        if pending.polls_left == 0 {
            state.operations.remove(&operation.name);
            Ok(OperationState::Done)
        } else {
            Ok(OperationState::Pending)
        }
    }

    async fn invalidate_cache(&self, url_map: &str, path: &str) -> Result<Operation, DeployError> {
        let resource = ResourceRef::new(ResourceKind::UrlMap, url_map);
        let mut state = self.lock();
        if !state.resources.contains_key(&resource) {
            return Err(DeployError::NotFound(resource.to_string()));
        }
        info!("Dry run: invalidating '{}' behind {}", path, url_map);
        self.begin(&mut state, "invalidate", &resource)
    }
}

#[async_trait]
impl ObjectSink for DryRunControlPlane {
    async fn put_object(
        &self,
        bucket: &str,
        name: &str,
        body: Vec<u8>,
        content_type: &str,
        cache_control: &str,
    ) -> Result<(), DeployError> {
        let mut state = self.lock();
        let bucket_ref = ResourceRef::new(ResourceKind::StorageBucket, bucket);
        if !state.resources.contains_key(&bucket_ref) {
            return Err(DeployError::NotFound(format!("storage bucket '{}'", bucket)));
        }
        state.objects.entry(bucket.to_string()).or_default().insert(
            name.to_string(),
            StoredObject {
                body,
                content_type: content_type.to_string(),
                cache_control: cache_control.to_string(),
            },
        );
        Ok(())
    }
}
