//! Cloud control plane access: raw verbs, idempotent ensure/remove, naming

pub mod control_plane;
pub mod dry_run;
pub mod ensurer;
pub mod gcp;
pub mod naming;
pub mod poller;

pub use control_plane::{
    ControlPlane, ObjectSink, Operation, OperationApi, OperationState, ResourceKind, ResourceRef,
};
pub use dry_run::DryRunControlPlane;
pub use ensurer::{
    EnsureOutcome, OperationTimeouts, Reconcile, Removal, ResourceEnsurer, ResourceSpec,
};
pub use gcp::GcpControlPlane;
pub use poller::OperationPoller;
