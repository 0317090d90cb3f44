//! FSM unit tests

use webdeploy::models::{PipelineStep, StepStatus};
use webdeploy::pipeline::{PipelineEvent, PipelineFsm, PipelineState, StepPlan};

fn run_step(fsm: &mut PipelineFsm, step: PipelineStep) {
    fsm.process(PipelineEvent::StepStarted(step)).unwrap();
    fsm.process(PipelineEvent::StepCompleted(step)).unwrap();
}

#[test]
fn test_fsm_initial_state() {
    let fsm = PipelineFsm::new();
    assert_eq!(fsm.state(), PipelineState::Pending);
    assert!(fsm.current().is_none());
    assert!(fsm.failure().is_none());
    assert!(fsm.steps().values().all(|s| *s == StepStatus::Pending));
}

#[test]
fn test_fsm_success_flow() {
    let mut fsm = PipelineFsm::new();
    fsm.process(PipelineEvent::Start).unwrap();
    assert_eq!(fsm.state(), PipelineState::Running);

    for step in PipelineStep::ALL {
        assert_eq!(fsm.plan(step), StepPlan::Execute);
        run_step(&mut fsm, step);
    }

    fsm.process(PipelineEvent::Finish).unwrap();
    assert_eq!(fsm.state(), PipelineState::Succeeded);
    assert!(fsm.steps().values().all(|s| *s == StepStatus::Completed));
}

#[test]
fn test_fsm_skip_cascade_after_failure() {
    let mut fsm = PipelineFsm::new();
    fsm.process(PipelineEvent::Start).unwrap();

    for step in [PipelineStep::Extract, PipelineStep::AiInspect, PipelineStep::AiFix] {
        run_step(&mut fsm, step);
    }
    fsm.process(PipelineEvent::StepStarted(PipelineStep::Build)).unwrap();
    fsm.process(PipelineEvent::StepFailed(
        PipelineStep::Build,
        "npm exited with 1".to_string(),
    ))
    .unwrap();

    for step in [PipelineStep::Verify, PipelineStep::Infra, PipelineStep::Upload] {
        assert_eq!(fsm.plan(step), StepPlan::Skip);
        fsm.process(PipelineEvent::StepSkipped(step)).unwrap();
    }
    assert_eq!(fsm.plan(PipelineStep::Notify), StepPlan::Execute);
    run_step(&mut fsm, PipelineStep::Notify);

    fsm.process(PipelineEvent::Finish).unwrap();
    assert_eq!(fsm.state(), PipelineState::Failed);
    assert_eq!(
        fsm.failure(),
        Some((PipelineStep::Build, "npm exited with 1"))
    );
    assert_eq!(fsm.step_status(PipelineStep::Build), StepStatus::Failed);
    assert_eq!(fsm.step_status(PipelineStep::Upload), StepStatus::Skipped);
    assert_eq!(fsm.step_status(PipelineStep::Notify), StepStatus::Completed);
}

#[test]
fn test_fsm_notify_failure_does_not_fail_run() {
    let mut fsm = PipelineFsm::new();
    fsm.process(PipelineEvent::Start).unwrap();
    for step in &PipelineStep::ALL[..PipelineStep::ALL.len() - 1] {
        run_step(&mut fsm, *step);
    }
    fsm.process(PipelineEvent::StepStarted(PipelineStep::Notify)).unwrap();
    fsm.process(PipelineEvent::StepFailed(
        PipelineStep::Notify,
        "smtp down".to_string(),
    ))
    .unwrap();

    fsm.process(PipelineEvent::Finish).unwrap();
    assert_eq!(fsm.state(), PipelineState::Succeeded);
    assert!(fsm.failure().is_none());
    assert_eq!(fsm.step_status(PipelineStep::Notify), StepStatus::Failed);
}

#[test]
fn test_fsm_invalid_transitions() {
    let mut fsm = PipelineFsm::new();

    // Steps cannot start before the run
    assert!(fsm
        .process(PipelineEvent::StepStarted(PipelineStep::Extract))
        .is_err());

    fsm.process(PipelineEvent::Start).unwrap();
    fsm.process(PipelineEvent::StepStarted(PipelineStep::Extract)).unwrap();

    // Only one step executes at a time
    assert!(fsm
        .process(PipelineEvent::StepStarted(PipelineStep::AiInspect))
        .is_err());
    // Completing a step that is not executing
    assert!(fsm
        .process(PipelineEvent::StepCompleted(PipelineStep::Build))
        .is_err());
    // Finishing while steps are outstanding
    assert!(fsm.process(PipelineEvent::Finish).is_err());

    fsm.process(PipelineEvent::StepCompleted(PipelineStep::Extract)).unwrap();
    // A step runs at most once
    assert!(fsm
        .process(PipelineEvent::StepStarted(PipelineStep::Extract))
        .is_err());
}
