//! Idempotent ensure/remove on top of a [`ControlPlane`]
//!
//! `ensure` reads the live resource first and only mutates when it is absent
//! or drifted from the desired fields, so re-running a provisioning sequence
//! against resources that already match issues no mutating calls. `remove`
//! treats an absent resource as already removed.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::debug;

use crate::cloud::control_plane::{ControlPlane, Operation, OperationApi, ResourceRef};
use crate::cloud::poller::OperationPoller;
use crate::errors::DeployError;

/// Computes the patch for a live resource, `None` when nothing must change
pub type MergeFn = Arc<dyn Fn(&Value) -> Result<Option<Value>, DeployError> + Send + Sync>;

/// How a live resource is brought in line with the desired one
#[derive(Clone)]
pub enum Reconcile {
    /// Never touch a resource that already exists
    CreateOnly,
    /// Patch the listed top-level fields when they drift
    Fields(Vec<&'static str>),
    /// Let a closure compute the patch from the live state
    Merge(MergeFn),
}

impl fmt::Debug for Reconcile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reconcile::CreateOnly => write!(f, "CreateOnly"),
            Reconcile::Fields(fields) => f.debug_tuple("Fields").field(fields).finish(),
            Reconcile::Merge(_) => write!(f, "Merge(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResourceSpec {
    pub resource: ResourceRef,
    pub desired: Value,
    pub reconcile: Reconcile,
    /// Fail instead of creating when the resource is absent
    pub must_exist: bool,
}

impl ResourceSpec {
    pub fn create_only(resource: ResourceRef, desired: Value) -> Self {
        Self {
            resource,
            desired,
            reconcile: Reconcile::CreateOnly,
            must_exist: false,
        }
    }

    pub fn with_fields(resource: ResourceRef, desired: Value, fields: Vec<&'static str>) -> Self {
        Self {
            resource,
            desired,
            reconcile: Reconcile::Fields(fields),
            must_exist: false,
        }
    }

    pub fn merged<F>(resource: ResourceRef, desired: Value, merge: F) -> Self
    where
        F: Fn(&Value) -> Result<Option<Value>, DeployError> + Send + Sync + 'static,
    {
        Self {
            resource,
            desired,
            reconcile: Reconcile::Merge(Arc::new(merge)),
            must_exist: false,
        }
    }

    /// Resource managed elsewhere that we only amend
    pub fn existing(mut self) -> Self {
        self.must_exist = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnsureOutcome {
    Created(Value),
    Updated(Value),
    Unchanged(Value),
}

impl EnsureOutcome {
    pub fn state(&self) -> &Value {
        match self {
            EnsureOutcome::Created(v) | EnsureOutcome::Updated(v) | EnsureOutcome::Unchanged(v) => v,
        }
    }

    pub fn into_state(self) -> Value {
        match self {
            EnsureOutcome::Created(v) | EnsureOutcome::Updated(v) | EnsureOutcome::Unchanged(v) => v,
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            EnsureOutcome::Created(_) => "created",
            EnsureOutcome::Updated(_) => "updated",
            EnsureOutcome::Unchanged(_) => "already up to date",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Deleted,
    AlreadyAbsent,
}

/// Per-API operation deadlines
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OperationTimeouts {
    pub compute: Duration,
    pub run: Duration,
}

impl Default for OperationTimeouts {
    fn default() -> Self {
        Self {
            compute: Duration::from_secs(300),
            run: Duration::from_secs(600),
        }
    }
}

#[derive(Clone)]
pub struct ResourceEnsurer {
    plane: Arc<dyn ControlPlane>,
    poller: OperationPoller,
    timeouts: OperationTimeouts,
}

impl ResourceEnsurer {
    pub fn new(plane: Arc<dyn ControlPlane>, timeouts: OperationTimeouts) -> Self {
        Self {
            poller: OperationPoller::new(plane.clone()),
            plane,
            timeouts,
        }
    }

    pub async fn fetch(&self, resource: &ResourceRef) -> Result<Option<Value>, DeployError> {
        self.plane.get(resource).await
    }

    pub async fn ensure(&self, spec: &ResourceSpec) -> Result<EnsureOutcome, DeployError> {
        match self.plane.get(&spec.resource).await? {
            Some(live) => self.reconcile(spec, live).await,
            None if spec.must_exist => Err(DeployError::ProvisionError(format!(
                "{} does not exist",
                spec.resource
            ))),
            None => {
                debug!("Creating {}", spec.resource);
                match self.plane.create(&spec.resource, &spec.desired).await {
                    Ok(op) => {
                        self.wait(&op).await?;
                        Ok(EnsureOutcome::Created(self.refetch(&spec.resource).await?))
                    }
                    Err(DeployError::AlreadyExists(_)) => {
                        debug!("{} appeared concurrently, reconciling", spec.resource);
                        let live = self.refetch(&spec.resource).await?;
                        self.reconcile(spec, live).await
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    pub async fn remove(&self, resource: &ResourceRef) -> Result<Removal, DeployError> {
        match self.plane.delete(resource).await {
            Ok(op) => {
                self.wait(&op).await?;
                Ok(Removal::Deleted)
            }
            Err(DeployError::NotFound(_)) => Ok(Removal::AlreadyAbsent),
            Err(e) => Err(e),
        }
    }

    pub async fn invalidate_cache(&self, url_map: &str, path: &str) -> Result<(), DeployError> {
        let op = self.plane.invalidate_cache(url_map, path).await?;
        self.wait(&op).await
    }

    async fn reconcile(&self, spec: &ResourceSpec, live: Value) -> Result<EnsureOutcome, DeployError> {
        let patch = match &spec.reconcile {
            Reconcile::CreateOnly => None,
            Reconcile::Fields(fields) => drifted_fields(&spec.desired, &live, fields),
            Reconcile::Merge(merge) => merge(&live)?,
        };

        match patch {
            None => Ok(EnsureOutcome::Unchanged(live)),
            Some(body) => {
                debug!("Updating {}", spec.resource);
                let op = self.plane.patch(&spec.resource, &body).await?;
                self.wait(&op).await?;
                Ok(EnsureOutcome::Updated(self.refetch(&spec.resource).await?))
            }
        }
    }

    async fn refetch(&self, resource: &ResourceRef) -> Result<Value, DeployError> {
        self.plane.get(resource).await?.ok_or_else(|| {
            DeployError::ProvisionError(format!("{} vanished right after being written", resource))
        })
    }

    async fn wait(&self, op: &Operation) -> Result<(), DeployError> {
        let timeout = match op.api {
            OperationApi::Run => self.timeouts.run,
            _ => self.timeouts.compute,
        };
        self.poller.wait(op, timeout).await
    }
}

/// Patch body holding the desired value of every drifted field
fn drifted_fields(desired: &Value, live: &Value, fields: &[&'static str]) -> Option<Value> {
    let mut patch = Map::new();
    for field in fields {
        let Some(want) = desired.get(*field) else {
            continue;
        };
        let matches = live.get(*field).map(|have| is_subset(want, have)).unwrap_or(false);
        if !matches {
            patch.insert(field.to_string(), want.clone());
        }
    }
    if patch.is_empty() {
        None
    } else {
        Some(Value::Object(patch))
    }
}

/// Whether every value in `want` is present in `have`; extra live keys are ignored
pub fn is_subset(want: &Value, have: &Value) -> bool {
    match (want, have) {
        (Value::Object(want), Value::Object(have)) => want
            .iter()
            .all(|(k, v)| have.get(k).map(|h| is_subset(v, h)).unwrap_or(false)),
        (Value::Array(want), Value::Array(have)) => {
            want.len() == have.len() && want.iter().zip(have).all(|(w, h)| is_subset(w, h))
        }
        _ => want == have,
    }
}
