//! Finite state machine for one pipeline run

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::{PipelineStep, StepStatus};

/// Overall state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    /// Not started yet
    Pending,

    /// Steps are executing
    Running,

    /// Every step completed
    Succeeded,

    /// A non-notify step failed
    Failed,
}

/// Run event
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// Run started
    Start,

    /// A step began executing
    StepStarted(PipelineStep),

    /// The executing step finished
    StepCompleted(PipelineStep),

    /// The executing step failed
    StepFailed(PipelineStep, String),

    /// A pending step was skipped after an earlier failure
    StepSkipped(PipelineStep),

    /// Every step has been handled
    Finish,
}

/// What to do with the next step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPlan {
    Execute,
    Skip,
}

/// Pipeline FSM
///
/// Tracks the run state and every step's status. Once a step other than
/// [`PipelineStep::Notify`] fails, every later step except Notify is planned
/// as skipped; a Notify failure never makes the run fail.
#[derive(Debug, Clone)]
pub struct PipelineFsm {
    state: PipelineState,
    current: Option<PipelineStep>,
    failure: Option<(PipelineStep, String)>,
    steps: BTreeMap<PipelineStep, StepStatus>,
}

impl PipelineFsm {
    /// Create a new FSM with every step pending
    pub fn new() -> Self {
        Self {
            state: PipelineState::Pending,
            current: None,
            failure: None,
            steps: PipelineStep::ALL
                .iter()
                .map(|step| (*step, StepStatus::Pending))
                .collect(),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Step currently executing
    pub fn current(&self) -> Option<PipelineStep> {
        self.current
    }

    /// First failed step and its error
    pub fn failure(&self) -> Option<(PipelineStep, &str)> {
        self.failure
            .as_ref()
            .map(|(step, error)| (*step, error.as_str()))
    }

    pub fn step_status(&self, step: PipelineStep) -> StepStatus {
        self.steps
            .get(&step)
            .copied()
            .unwrap_or(StepStatus::Pending)
    }

    pub fn steps(&self) -> &BTreeMap<PipelineStep, StepStatus> {
        &self.steps
    }

    /// Whether `step` should run given what happened so far
    pub fn plan(&self, step: PipelineStep) -> StepPlan {
        if step == PipelineStep::Notify || self.failure.is_none() {
            StepPlan::Execute
        } else {
            StepPlan::Skip
        }
    }

    fn is_pending(&self, step: PipelineStep) -> bool {
        self.step_status(step) == StepStatus::Pending
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: PipelineEvent) -> Result<(), String> {
        let new_state = match (&self.state, &event) {
            // From Pending
            (PipelineState::Pending, PipelineEvent::Start) => PipelineState::Running,

            // From Running
            (PipelineState::Running, PipelineEvent::StepStarted(step))
                if self.current.is_none() && self.is_pending(*step) =>
            {
                self.steps.insert(*step, StepStatus::Running);
                self.current = Some(*step);
                PipelineState::Running
            }
            (PipelineState::Running, PipelineEvent::StepCompleted(step))
                if self.current == Some(*step) =>
            {
                self.steps.insert(*step, StepStatus::Completed);
                self.current = None;
                PipelineState::Running
            }
            (PipelineState::Running, PipelineEvent::StepFailed(step, err))
                if self.current == Some(*step) =>
            {
                self.steps.insert(*step, StepStatus::Failed);
                self.current = None;
                if *step != PipelineStep::Notify && self.failure.is_none() {
                    self.failure = Some((*step, err.clone()));
                }
                PipelineState::Running
            }
            (PipelineState::Running, PipelineEvent::StepSkipped(step))
                if self.current.is_none() && self.is_pending(*step) =>
            {
                self.steps.insert(*step, StepStatus::Skipped);
                PipelineState::Running
            }
            (PipelineState::Running, PipelineEvent::Finish)
                if self.current.is_none()
                    && self.steps.values().all(|s| *s != StepStatus::Pending) =>
            {
                if self.failure.is_some() {
                    PipelineState::Failed
                } else {
                    PipelineState::Succeeded
                }
            }

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(())
    }
}

impl Default for PipelineFsm {
    fn default() -> Self {
        Self::new()
    }
}
