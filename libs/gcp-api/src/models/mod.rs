//! Cloud API models
//!
//! Only the fields webdeploy reads or rewrites are typed. Everything else is
//! carried through `extra` so a read-modify-write round trip preserves it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Compute Engine long-running operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeOperation {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ComputeOperationError>,
}

impl ComputeOperation {
    pub fn is_done(&self) -> bool {
        self.status == "DONE"
    }

    /// Joined error messages, if the operation finished with errors
    pub fn error_detail(&self) -> Option<String> {
        let errors = &self.error.as_ref()?.errors;
        if errors.is_empty() {
            return None;
        }
        Some(
            errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComputeOperationError {
    #[serde(default)]
    pub errors: Vec<ComputeErrorItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComputeErrorItem {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// Cloud Run v2 long-running operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunOperation {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RpcStatus {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
}

/// Error envelope returned by every Google REST API
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorEnvelope {
    #[serde(default)]
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: String,
}

/// Compute URL map
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlMap {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_service: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub host_rules: Vec<HostRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path_matchers: Vec<PathMatcher>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UrlMap {
    /// Name of the path matcher serving `host`
    pub fn matcher_for_host(&self, host: &str) -> Option<&str> {
        self.host_rules
            .iter()
            .find(|rule| rule.hosts.iter().any(|h| h == host))
            .map(|rule| rule.path_matcher.as_str())
    }

    pub fn path_matcher_mut(&mut self, name: &str) -> Option<&mut PathMatcher> {
        self.path_matchers.iter_mut().find(|m| m.name == name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostRule {
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub path_matcher: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathMatcher {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_service: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path_rules: Vec<PathRule>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathRule {
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PathRule {
    pub fn new(paths: Vec<String>, service: impl Into<String>) -> Self {
        Self {
            paths,
            service: Some(service.into()),
            extra: Map::new(),
        }
    }

    pub fn covers(&self, path: &str) -> bool {
        self.paths.iter().any(|p| p == path)
    }
}

/// IAM policy (buckets and Cloud Run services share this shape)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub bindings: Vec<Binding>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Policy {
    pub fn grants(&self, role: &str, member: &str) -> bool {
        self.bindings
            .iter()
            .any(|b| b.role == role && b.members.iter().any(|m| m == member))
    }

    /// Add `member` to `role`, returning false when already granted
    pub fn grant(&mut self, role: &str, member: &str) -> bool {
        if self.grants(role, member) {
            return false;
        }
        match self.bindings.iter_mut().find(|b| b.role == role) {
            Some(binding) => binding.members.push(member.to_string()),
            None => self.bindings.push(Binding {
                role: role.to_string(),
                members: vec![member.to_string()],
                extra: Map::new(),
            }),
        }
        true
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Binding {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Page of a GCS object listing
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectList {
    #[serde(default)]
    pub items: Vec<ObjectItem>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObjectItem {
    pub name: String,
}
