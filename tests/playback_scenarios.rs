//! Playback scenarios against the in-memory desktop and a scripted model.

use pretty_assertions::assert_eq;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use replay_vision::desktop::{DesktopEvent, MockDesktop, MockDesktopHandle};
use replay_vision::error::ErrorKind;
use replay_vision::executor::{ActionExecutor, ExecutorConfig};
use replay_vision::model::ScriptedModel;
use replay_vision::planner::{ActionPlanner, PlannerConfig};
use replay_vision::playback::{PlaybackConfig, RunStatus, StepState, VerificationLoop};
use replay_vision::transcript::{Transcript, Verdict};
use replay_vision::verify::{ModelVerifier, VerificationContext, Verifier};
use replay_vision::{CancelToken, ReplayError, ReplayResult, Step};

fn planner(model: ScriptedModel) -> ActionPlanner<ScriptedModel> {
    ActionPlanner::with_config(
        model,
        PlannerConfig {
            history_window: 8,
            user_instruction: None,
            arch: "x86_64".into(),
            date: "Friday, October 16, 2026".into(),
        },
    )
}

fn desktop(width: u32, height: u32) -> (ActionExecutor<MockDesktop>, MockDesktopHandle) {
    let desktop = MockDesktop::new(width, height);
    let handle = desktop.handle();
    let config = ExecutorConfig::default()
        .settle(Duration::ZERO)
        .typing_delay(Duration::ZERO)
        .screenshot_max_width(1280);
    (ActionExecutor::with_config(desktop, config), handle)
}

fn policy(max_attempts: u32) -> PlaybackConfig {
    PlaybackConfig::default()
        .max_attempts(max_attempts)
        .backoff(Duration::from_millis(1), Duration::from_millis(4))
        .retry_unavailable(false)
}

/// Verdicts in order; `true` once the list runs out
struct FixedVerdicts(Mutex<Vec<bool>>);

impl FixedVerdicts {
    fn boxed(verdicts: &[bool]) -> Box<Self> {
        let mut verdicts = verdicts.to_vec();
        verdicts.reverse();
        Box::new(Self(Mutex::new(verdicts)))
    }
}

impl Verifier for FixedVerdicts {
    fn verify(&self, _ctx: &VerificationContext<'_>) -> ReplayResult<bool> {
        Ok(self.0.lock().unwrap().pop().unwrap_or(true))
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

/// Cancels the run from inside the first verification
struct CancelOnVerify(CancelToken);

impl Verifier for CancelOnVerify {
    fn verify(&self, _ctx: &VerificationContext<'_>) -> ReplayResult<bool> {
        self.0.cancel();
        Ok(false)
    }

    fn name(&self) -> &str {
        "cancel"
    }
}

#[test]
fn test_text_editor_scenario() {
    let planner_model = ScriptedModel::new()
        .then_reply(r#"{"action": "key", "text": "cmd+space"}"#)
        .then_reply(r#"I will type now: {"action": "type", "text": "hello"}"#);
    let verifier_model = ScriptedModel::new().then_reply("No, the launcher is open.").then_reply("Yes.");
    let (executor, handle) = desktop(1280, 800);

    let mut playback = VerificationLoop::new(
        planner(planner_model),
        executor,
        Box::new(ModelVerifier::new(verifier_model.clone())),
    )
    .with_config(policy(5));

    let steps = vec![Step::new(1, "Open a text editor and type hello")];
    let run = playback.run(&steps, Transcript::in_memory("editor")).unwrap();

    assert_eq!(run.status(), RunStatus::Succeeded);
    assert_eq!(run.cycles_for_step(1), 2);
    assert_eq!(run.states, vec![StepState::Complete]);
    assert_eq!(
        handle.events(),
        vec![
            DesktopEvent::Key {
                combo: "super+space".into()
            },
            DesktopEvent::Type {
                text: "hello".into()
            },
        ]
    );

    let verdicts: Vec<Verdict> = run.transcript.entries().iter().map(|e| e.verdict).collect();
    assert_eq!(verdicts, vec![Verdict::Incomplete, Verdict::Complete]);
    assert_eq!(verifier_model.calls(), 2);
}

#[test]
fn test_three_malformed_answers_exhaust_budget() {
    let model = ScriptedModel::new()
        .then_reply("I think you should click somewhere")
        .then_reply(r#"{"action": "teleport"}"#)
        .then_reply(r#"{"action": "type"}"#);
    let (executor, handle) = desktop(640, 480);
    let mut playback = VerificationLoop::new(planner(model.clone()), executor, FixedVerdicts::boxed(&[]))
        .with_config(policy(3));

    let run = playback
        .run(&[Step::new(1, "Save the file")], Transcript::in_memory("malformed"))
        .unwrap();

    assert_eq!(run.status(), RunStatus::Failed);
    assert!(matches!(
        run.error,
        Some(ReplayError::RetryBudgetExhausted { step: 1, attempts: 3 })
    ));
    assert_eq!(run.states, vec![StepState::Failed]);
    assert_eq!(model.calls(), 3);
    assert!(handle.events().is_empty());
    for entry in run.transcript.entries() {
        assert_eq!(entry.verdict, Verdict::Error);
        assert_eq!(entry.error, Some(ErrorKind::MalformedAction));
        assert!(entry.action.is_none());
    }

    let report = run.report();
    assert_eq!(report.failed_step, Some(1));
    assert_eq!(report.retries, Some(2));
    assert_eq!(report.error, Some(ErrorKind::RetryBudgetExhausted));
}

#[test]
fn test_cycles_never_exceed_bound() {
    for bound in 1..=4 {
        let model = ScriptedModel::new().otherwise(r#"{"action": "screenshot"}"#);
        let (executor, _) = desktop(320, 200);
        let never = FixedVerdicts::boxed(&[false; 16]);
        let mut playback = VerificationLoop::new(planner(model), executor, never).with_config(policy(bound));

        let run = playback
            .run(&[Step::new(1, "Wait for the dialog")], Transcript::in_memory("bound"))
            .unwrap();
        assert_eq!(run.cycles_for_step(1), bound as usize);
        assert!(matches!(
            run.error,
            Some(ReplayError::RetryBudgetExhausted { attempts, .. }) if attempts == bound
        ));
    }
}

#[test]
fn test_completed_steps_are_not_revisited() {
    let model = ScriptedModel::new().otherwise(r#"{"action": "left_click"}"#);
    let (executor, _) = desktop(320, 200);
    let verdicts = FixedVerdicts::boxed(&[false, true, true, false, false, true]);
    let mut playback = VerificationLoop::new(planner(model), executor, verdicts).with_config(policy(5));

    let steps = vec![
        Step::new(1, "Open the menu"),
        Step::new(2, "Choose New"),
        Step::new(3, "Confirm"),
    ];
    let run = playback.run(&steps, Transcript::in_memory("order")).unwrap();
    assert!(run.succeeded());

    let order: Vec<usize> = run.transcript.entries().iter().map(|e| e.step_index).collect();
    assert_eq!(order, vec![1, 1, 2, 3, 3, 3]);

    // Nothing is recorded for a step after its completing entry
    for step in 1..=3 {
        let last_complete = run
            .transcript
            .entries()
            .iter()
            .rposition(|e| e.step_index == step && e.verdict == Verdict::Complete)
            .unwrap();
        assert!(
            run.transcript.entries()[last_complete + 1..]
                .iter()
                .all(|e| e.step_index != step)
        );
    }
}

#[test]
fn test_injection_failure_is_retried() {
    let model = ScriptedModel::new().otherwise(r#"{"action": "left_click"}"#);
    let (executor, handle) = desktop(320, 200);
    handle.fail_next(1);
    let mut playback = VerificationLoop::new(planner(model), executor, FixedVerdicts::boxed(&[]))
        .with_config(policy(3));

    let run = playback
        .run(&[Step::new(1, "Click OK")], Transcript::in_memory("inject"))
        .unwrap();

    assert!(run.succeeded());
    let entries = run.transcript.entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].error, Some(ErrorKind::InjectionFailed));
    assert_eq!(entries[0].result.as_ref().map(|r| r.success), Some(false));
    assert_eq!(entries[1].verdict, Verdict::Complete);
}

#[test]
fn test_capture_failures_before_planning_are_not_entries() {
    let model = ScriptedModel::new().otherwise(r#"{"action": "left_click"}"#);
    let (executor, handle) = desktop(320, 200);
    handle.fail_captures(2);
    let mut playback = VerificationLoop::new(planner(model.clone()), executor, FixedVerdicts::boxed(&[]))
        .with_config(policy(3));

    let run = playback
        .run(&[Step::new(1, "Click OK")], Transcript::in_memory("capture"))
        .unwrap();

    assert!(run.succeeded());
    assert_eq!(model.calls(), 1);
    assert_eq!(run.transcript.len(), model.calls());
}

#[test]
fn test_capture_that_never_works_fails_without_planning() {
    let model = ScriptedModel::new().otherwise(r#"{"action": "left_click"}"#);
    let (executor, handle) = desktop(320, 200);
    handle.fail_captures(100);
    let mut playback = VerificationLoop::new(planner(model.clone()), executor, FixedVerdicts::boxed(&[]))
        .with_config(policy(3));

    let run = playback
        .run(&[Step::new(1, "Click OK")], Transcript::in_memory("no-capture"))
        .unwrap();

    assert_eq!(run.status(), RunStatus::Failed);
    assert!(matches!(run.error, Some(ReplayError::InjectionFailed(_))));
    assert_eq!(run.states, vec![StepState::Failed]);
    assert_eq!(model.calls(), 0);
    assert!(run.transcript.is_empty());
}

#[test]
fn test_cancellation_stops_transcript_growth() {
    let cancel = CancelToken::new();
    let model = ScriptedModel::new().otherwise(r#"{"action": "left_click"}"#);
    let (executor, _) = desktop(320, 200);
    let mut playback = VerificationLoop::new(planner(model.clone()), executor, Box::new(CancelOnVerify(cancel.clone())))
        .with_config(policy(10))
        .with_cancel_token(cancel);

    let steps = vec![Step::new(1, "First"), Step::new(2, "Second")];
    let run = playback.run(&steps, Transcript::in_memory("cancel")).unwrap();

    assert_eq!(run.status(), RunStatus::Aborted);
    assert_eq!(run.transcript.len(), 1);
    assert_eq!(model.calls(), 1);
    assert_eq!(run.states[1], StepState::Pending);
    assert_eq!(run.report().status, RunStatus::Aborted);
}

#[test]
fn test_cancellation_interrupts_backoff() {
    let model = ScriptedModel::new().otherwise("not an action");
    let (executor, _) = desktop(320, 200);
    let config = policy(10).backoff(Duration::from_secs(30), Duration::from_secs(30));
    let mut playback =
        VerificationLoop::new(planner(model), executor, FixedVerdicts::boxed(&[])).with_config(config);

    let cancel = playback.cancel_token();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        cancel.cancel();
    });

    let started = Instant::now();
    let run = playback
        .run(&[Step::new(1, "Anything")], Transcript::in_memory("backoff"))
        .unwrap();
    canceller.join().unwrap();

    assert_eq!(run.status(), RunStatus::Aborted);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(run.transcript.len(), 1);
}

#[test]
fn test_out_of_range_coordinates_are_clamped() {
    let model = ScriptedModel::new().then_reply(r#"{"action": "mouse_move", "coordinate": [5000, 5000]}"#);
    let (executor, handle) = desktop(1280, 800);
    let mut playback = VerificationLoop::new(planner(model), executor, FixedVerdicts::boxed(&[]))
        .with_config(policy(1));

    let run = playback
        .run(&[Step::new(1, "Point at the corner")], Transcript::in_memory("clamp"))
        .unwrap();
    assert!(run.succeeded());
    assert_eq!(handle.cursor(), (1279, 799));
}

#[test]
fn test_persisted_transcript_matches_run() {
    let dir = tempfile::TempDir::new().unwrap();
    let model = ScriptedModel::new().otherwise(r#"{"action": "double_click"}"#);
    let (executor, _) = desktop(320, 200);
    let mut playback = VerificationLoop::new(planner(model), executor, FixedVerdicts::boxed(&[false]))
        .with_config(policy(3));

    let transcript = Transcript::create(dir.path(), "persisted").unwrap();
    let run = playback.run(&[Step::new(1, "Open the file")], transcript).unwrap();

    let loaded = Transcript::load(&dir.path().join("transcript.jsonl")).unwrap();
    assert_eq!(loaded.header.run_id, "persisted");
    assert_eq!(loaded.entries, run.transcript.entries().to_vec());
    for entry in &loaded.entries {
        let shot = entry.screenshot.as_ref().unwrap();
        assert!(dir.path().join(shot).exists());
    }
}
