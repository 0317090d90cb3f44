//! Live and persisted deployment logs

pub mod broker;
pub mod emitter;

pub use broker::{Delivery, LogBroker, LogSubscription};
pub use emitter::{DeploymentLogger, ProgressSink};
