//! Deployment pipeline: step sequencing, run context, recovery

pub mod collaborators;
pub mod context;
pub mod fsm;
pub mod orchestrator;
pub mod recovery;

pub use collaborators::{
    BuildRequest, Builder, Collaborators, Inspector, Notification, Notifier, ProjectDescriptor,
    SourceProcessor, Uploader,
};
pub use context::PipelineContext;
pub use fsm::{PipelineEvent, PipelineFsm, PipelineState, StepPlan};
pub use orchestrator::{Orchestrator, PipelineOptions};
