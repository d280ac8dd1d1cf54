//! The verification loop: drives each step through
//! `Pending → Planning → Executing → Verifying → {Complete | Retrying | Failed}`.
//!
//! Every planner invocation is recorded as one transcript entry. A step
//! gets at most `max_attempts` planner invocations; errors back off
//! exponentially (capped) before the next attempt, while a plain "not done
//! yet" verdict replans immediately on the confirmation screenshot. The
//! first failed step halts the run. Cancellation is checked before every
//! transition and during backoff.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::action::Action;
use crate::cancel::CancelToken;
use crate::config;
use crate::desktop::Desktop;
use crate::error::{ErrorKind, ReplayError, ReplayResult};
use crate::executor::{ActionExecutor, ExecutionResult, Screenshot};
use crate::model::ModelCapability;
use crate::model::retry::backoff_delay;
use crate::planner::ActionPlanner;
use crate::synthesis::Step;
use crate::transcript::{Transcript, TranscriptEntry, Verdict};
use crate::verify::{VerificationContext, Verifier};

/// Where a step is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Planning,
    Executing,
    Verifying,
    Complete,
    Retrying,
    Failed,
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepState::Pending => "pending",
            StepState::Planning => "planning",
            StepState::Executing => "executing",
            StepState::Verifying => "verifying",
            StepState::Complete => "complete",
            StepState::Retrying => "retrying",
            StepState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Retry policy for the loop
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Planner invocations allowed per step
    pub max_attempts: u32,
    /// First backoff delay after an error
    pub backoff_base: Duration,
    /// Upper bound for the backoff delay
    pub backoff_cap: Duration,
    /// Treat `*Unavailable` errors as retryable instead of failing the step
    pub retry_unavailable: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        let playback = &config::get().playback;
        Self {
            max_attempts: playback.max_attempts,
            backoff_base: Duration::from_millis(playback.backoff_base_ms),
            backoff_cap: Duration::from_millis(playback.backoff_cap_ms),
            retry_unavailable: false,
        }
    }
}

impl PlaybackConfig {
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_cap = cap;
        self
    }

    pub fn retry_unavailable(mut self, retry: bool) -> Self {
        self.retry_unavailable = retry;
        self
    }

    /// Whether an error may consume another attempt
    pub fn is_retryable(&self, error: &ReplayError) -> bool {
        match error {
            ReplayError::MalformedAction(_) | ReplayError::InjectionFailed(_) => true,
            e if e.is_unavailable() => self.retry_unavailable,
            _ => false,
        }
    }
}

/// Overall outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
    Aborted,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Succeeded => f.write_str("succeeded"),
            RunStatus::Failed => f.write_str("failed"),
            RunStatus::Aborted => f.write_str("aborted"),
        }
    }
}

/// A finished (or halted) playback
#[derive(Debug)]
pub struct WorkflowRun {
    pub steps: Vec<Step>,
    /// Final state of each step, same order as `steps`
    pub states: Vec<StepState>,
    pub transcript: Transcript,
    /// Why the run stopped early, if it did
    pub error: Option<ReplayError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl WorkflowRun {
    pub fn status(&self) -> RunStatus {
        match &self.error {
            None => RunStatus::Succeeded,
            Some(ReplayError::Aborted) => RunStatus::Aborted,
            Some(_) => RunStatus::Failed,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    /// Transcript entries recorded for a step
    pub fn cycles_for_step(&self, step_index: usize) -> usize {
        self.transcript.for_step(step_index).count()
    }

    pub fn report(&self) -> RunReport {
        let failed_step = match self.status() {
            RunStatus::Succeeded => None,
            _ => self
                .states
                .iter()
                .position(|s| !matches!(s, StepState::Complete | StepState::Pending))
                .or_else(|| self.states.iter().position(|s| *s == StepState::Pending))
                .map(|i| self.steps[i].index),
        };
        let last_action = self
            .transcript
            .entries()
            .iter()
            .rev()
            .find_map(|e| e.action.clone());
        let retries = failed_step.map(|i| (self.cycles_for_step(i) as u32).saturating_sub(1));

        RunReport {
            run_id: self.transcript.header().run_id.clone(),
            status: self.status(),
            steps_total: self.steps.len(),
            steps_completed: self
                .states
                .iter()
                .filter(|s| **s == StepState::Complete)
                .count(),
            cycles: self.transcript.len(),
            failed_step,
            last_action,
            retries,
            error: self.error.as_ref().map(|e| e.kind()),
            message: self.error.as_ref().map(|e| e.to_string()),
            steps: self
                .steps
                .iter()
                .zip(&self.states)
                .map(|(step, state)| StepReport {
                    index: step.index,
                    text: step.text.clone(),
                    state: *state,
                    cycles: self.cycles_for_step(step.index),
                })
                .collect(),
            transcript: self.transcript.dir().map(|d| d.join(crate::transcript::TRANSCRIPT_FILE)),
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

/// Per-step line of a [`RunReport`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    pub index: usize,
    pub text: String,
    pub state: StepState,
    pub cycles: usize,
}

/// Serializable summary of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub status: RunStatus,
    pub steps_total: usize,
    pub steps_completed: usize,
    /// Total transcript entries
    pub cycles: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_action: Option<Action>,
    /// Retries spent on the failing step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub steps: Vec<StepReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Screens carried across the cycles of one step
#[derive(Debug, Default)]
struct StepProgress {
    attempts: u32,
    /// Screen when the step started
    initial: Option<Screenshot>,
    /// Latest confirmation screenshot, planned on next
    current: Option<Screenshot>,
}

/// Plans, executes and verifies steps against one desktop
pub struct VerificationLoop<M, D> {
    planner: ActionPlanner<M>,
    executor: ActionExecutor<D>,
    verifier: Box<dyn Verifier>,
    config: PlaybackConfig,
    cancel: CancelToken,
}

impl<M: ModelCapability, D: Desktop> VerificationLoop<M, D> {
    pub fn new(
        planner: ActionPlanner<M>,
        executor: ActionExecutor<D>,
        verifier: Box<dyn Verifier>,
    ) -> Self {
        Self {
            planner,
            executor,
            verifier,
            config: PlaybackConfig::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_config(mut self, config: PlaybackConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn executor(&self) -> &ActionExecutor<D> {
        &self.executor
    }

    pub fn into_executor(self) -> ActionExecutor<D> {
        self.executor
    }

    /// Play `steps` in order, recording every cycle into `transcript`.
    ///
    /// Only an empty step list is an `Err`; failures and cancellation end
    /// up in [`WorkflowRun::error`] with the transcript retained.
    pub fn run(&mut self, steps: &[Step], mut transcript: Transcript) -> ReplayResult<WorkflowRun> {
        if steps.is_empty() {
            return Err(ReplayError::EmptyWorkflow);
        }
        let started_at = Utc::now();
        let mut states = vec![StepState::Pending; steps.len()];
        let mut failure = None;

        info!(
            run_id = %transcript.header().run_id,
            steps = steps.len(),
            verifier = self.verifier.name(),
            max_attempts = self.config.max_attempts,
            "starting playback"
        );

        for (slot, step) in steps.iter().enumerate() {
            if self.cancel.is_cancelled() {
                failure = Some(ReplayError::Aborted);
                break;
            }
            info!(step = step.index, text = %step.text, "step started");
            match self.run_step(step, steps.len(), &mut states[slot], &mut transcript) {
                Ok(()) => info!(step = step.index, "step complete"),
                Err(e) => {
                    if matches!(e, ReplayError::Aborted) {
                        warn!(step = step.index, "playback cancelled");
                    } else {
                        error!(step = step.index, error = %e, "step failed, halting run");
                    }
                    failure = Some(e);
                    break;
                }
            }
        }

        Ok(WorkflowRun {
            steps: steps.to_vec(),
            states,
            transcript,
            error: failure,
            started_at,
            finished_at: Utc::now(),
        })
    }

    fn transition(&self, step: &Step, state: &mut StepState, next: StepState) -> ReplayResult<()> {
        if self.cancel.is_cancelled() {
            return Err(ReplayError::Aborted);
        }
        debug!(step = step.index, from = %state, to = %next, "transition");
        *state = next;
        Ok(())
    }

    fn run_step(
        &mut self,
        step: &Step,
        step_count: usize,
        state: &mut StepState,
        transcript: &mut Transcript,
    ) -> ReplayResult<()> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut progress = StepProgress::default();

        loop {
            self.transition(step, state, StepState::Planning)?;
            let screen = match self.planning_screen(step, &mut progress) {
                Ok(screen) => screen,
                Err(e) => {
                    if !matches!(e, ReplayError::Aborted) {
                        *state = StepState::Failed;
                    }
                    return Err(e);
                }
            };
            progress.attempts += 1;
            let mut entry = TranscriptEntry::new(step.index, progress.attempts - 1, Verdict::Incomplete);

            let outcome = self.cycle(step, step_count, state, transcript, &mut progress, &mut entry, screen);
            match outcome {
                Ok(true) => {
                    entry.verdict = Verdict::Complete;
                    transcript.append(entry)?;
                    *state = StepState::Complete;
                    return Ok(());
                }
                Ok(false) => {
                    transcript.append(entry)?;
                    if progress.attempts >= max_attempts {
                        *state = StepState::Failed;
                        return Err(ReplayError::RetryBudgetExhausted {
                            step: step.index,
                            attempts: progress.attempts,
                        });
                    }
                    debug!(step = step.index, attempt = progress.attempts, "step not complete yet");
                    self.transition(step, state, StepState::Retrying)?;
                }
                Err(e) => {
                    transcript.append(entry.with_error(&e))?;
                    if matches!(e, ReplayError::Aborted) {
                        return Err(e);
                    }
                    if !self.config.is_retryable(&e) {
                        *state = StepState::Failed;
                        return Err(e);
                    }
                    if progress.attempts >= max_attempts {
                        *state = StepState::Failed;
                        return Err(ReplayError::RetryBudgetExhausted {
                            step: step.index,
                            attempts: progress.attempts,
                        });
                    }
                    self.transition(step, state, StepState::Retrying)?;
                    let delay = backoff_delay(
                        self.config.backoff_base,
                        self.config.backoff_cap,
                        progress.attempts,
                    );
                    warn!(step = step.index, attempt = progress.attempts, error = %e, ?delay, "retrying step");
                    if !self.cancel.sleep(delay) {
                        return Err(ReplayError::Aborted);
                    }
                }
            }
        }
    }

    /// Screenshot for the next planner call: the last confirmation capture,
    /// else a fresh one. Capture failures back off on their own budget and
    /// are not transcript entries, since no planner call was made.
    fn planning_screen(&mut self, step: &Step, progress: &mut StepProgress) -> ReplayResult<Screenshot> {
        if let Some(screen) = progress.current.take() {
            return Ok(screen);
        }
        let max_attempts = self.config.max_attempts.max(1);
        let mut failures = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(ReplayError::Aborted);
            }
            match self.executor.capture() {
                Ok(screen) => return Ok(screen),
                Err(e) => {
                    failures += 1;
                    if failures >= max_attempts || !self.config.is_retryable(&e) {
                        return Err(e);
                    }
                    let delay = backoff_delay(self.config.backoff_base, self.config.backoff_cap, failures);
                    warn!(step = step.index, failures, error = %e, ?delay, "capture failed before planning");
                    if !self.cancel.sleep(delay) {
                        return Err(ReplayError::Aborted);
                    }
                }
            }
        }
    }

    /// One planner invocation and what follows. `Ok(done)` carries the verdict.
    #[allow(clippy::too_many_arguments)]
    fn cycle(
        &mut self,
        step: &Step,
        step_count: usize,
        state: &mut StepState,
        transcript: &Transcript,
        progress: &mut StepProgress,
        entry: &mut TranscriptEntry,
        screen: Screenshot,
    ) -> ReplayResult<bool> {
        if progress.initial.is_none() {
            progress.initial = Some(screen.clone());
        }

        let action = self.planner.plan(step, step_count, transcript, &screen)?;
        entry.action = Some(action.clone());

        self.transition(step, state, StepState::Executing)?;
        let result = match self.executor.execute(&action) {
            Ok(result) => result,
            Err(e) => {
                entry.result = Some(ExecutionResult::failure(&e).summary());
                return Err(e);
            }
        };
        entry.result = Some(result.summary());

        self.transition(step, state, StepState::Verifying)?;
        let after = match result.screenshot_ref() {
            Some(shot) => shot.clone(),
            None => self.executor.capture()?,
        };
        entry.screenshot = Some(transcript.store_screenshot(step.index, progress.attempts, &after)?);

        let initial = progress.initial.as_ref().unwrap_or(&screen);
        let ctx = VerificationContext {
            step,
            initial,
            current: &after,
            action: &action,
        };
        let done = self.verifier.verify(&ctx)?;
        progress.current = Some(after);
        Ok(done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desktop::MockDesktop;
    use crate::executor::ExecutorConfig;
    use crate::model::{ModelError, ScriptedModel};
    use crate::planner::PlannerConfig;
    use crate::verify::ScreenChangeVerifier;
    use pretty_assertions::assert_eq;

    /// Verifier answering from a fixed list, then `true`
    struct Verdicts(std::sync::Mutex<Vec<ReplayResult<bool>>>);

    impl Verdicts {
        fn new(mut answers: Vec<ReplayResult<bool>>) -> Box<Self> {
            answers.reverse();
            Box::new(Self(std::sync::Mutex::new(answers)))
        }
    }

    impl Verifier for Verdicts {
        fn verify(&self, _ctx: &VerificationContext<'_>) -> ReplayResult<bool> {
            self.0.lock().unwrap().pop().unwrap_or(Ok(true))
        }

        fn name(&self) -> &str {
            "verdicts"
        }
    }

    fn playback(
        model: ScriptedModel,
        verifier: Box<dyn Verifier>,
        attempts: u32,
    ) -> VerificationLoop<ScriptedModel, MockDesktop> {
        let planner = ActionPlanner::with_config(
            model,
            PlannerConfig {
                history_window: 4,
                user_instruction: None,
                arch: "x86_64".into(),
                date: "today".into(),
            },
        );
        let executor = ActionExecutor::with_config(
            MockDesktop::new(320, 200),
            ExecutorConfig {
                screenshot_max_width: 320,
                settle: Duration::ZERO,
                typing_delay: Duration::ZERO,
            },
        );
        VerificationLoop::new(planner, executor, verifier).with_config(PlaybackConfig {
            max_attempts: attempts,
            backoff_base: Duration::from_millis(1),
            backoff_cap: Duration::from_millis(2),
            retry_unavailable: false,
        })
    }

    #[test]
    fn test_retry_classification() {
        let config = PlaybackConfig {
            max_attempts: 3,
            backoff_base: Duration::ZERO,
            backoff_cap: Duration::ZERO,
            retry_unavailable: false,
        };
        assert!(config.is_retryable(&ReplayError::MalformedAction("x".into())));
        assert!(config.is_retryable(&ReplayError::InjectionFailed("x".into())));
        assert!(!config.is_retryable(&ReplayError::PlanningUnavailable("x".into())));
        assert!(!config.is_retryable(&ReplayError::Aborted));
        let config = config.retry_unavailable(true);
        assert!(config.is_retryable(&ReplayError::VerificationUnavailable("x".into())));
    }

    #[test]
    fn test_empty_step_list() {
        let mut run = playback(ScriptedModel::new(), Verdicts::new(vec![]), 3);
        assert!(matches!(
            run.run(&[], Transcript::in_memory("t")),
            Err(ReplayError::EmptyWorkflow)
        ));
    }

    #[test]
    fn test_planning_unavailable_fails_without_retry() {
        let model = ScriptedModel::new()
            .then_fail(ModelError::ConnectionFailed("refused".into()))
            .otherwise(r#"{"action": "left_click"}"#);
        let mut run = playback(model.clone(), Verdicts::new(vec![]), 5);
        let result = run
            .run(&[Step::new(1, "Click")], Transcript::in_memory("t"))
            .unwrap();

        assert_eq!(result.status(), RunStatus::Failed);
        assert!(matches!(result.error, Some(ReplayError::PlanningUnavailable(_))));
        assert_eq!(model.calls(), 1);
        assert_eq!(result.states, vec![StepState::Failed]);

        let report = result.report();
        assert_eq!(report.failed_step, Some(1));
        assert_eq!(report.retries, Some(0));
        assert_eq!(report.error, Some(ErrorKind::PlanningUnavailable));
    }

    #[test]
    fn test_verification_unavailable_retried_when_enabled() {
        let model = ScriptedModel::new().otherwise(r#"{"action": "screenshot"}"#);
        let verdicts = Verdicts::new(vec![Err(ReplayError::VerificationUnavailable("x".into()))]);
        let mut run = playback(model, verdicts, 3);
        run.config = run.config.clone().retry_unavailable(true);
        let result = run
            .run(&[Step::new(1, "Look")], Transcript::in_memory("t"))
            .unwrap();

        assert!(result.succeeded());
        assert_eq!(result.cycles_for_step(1), 2);
        assert_eq!(result.transcript.entries()[0].verdict, Verdict::Error);
        assert_eq!(result.transcript.entries()[1].verdict, Verdict::Complete);
    }

    #[test]
    fn test_failed_step_halts_run() {
        let model = ScriptedModel::new().otherwise(r#"{"action": "left_click"}"#);
        let verdicts = Verdicts::new(vec![Ok(true), Ok(false), Ok(false)]);
        let mut run = playback(model, verdicts, 2);
        let steps = vec![Step::new(1, "a"), Step::new(2, "b"), Step::new(3, "c")];
        let result = run.run(&steps, Transcript::in_memory("t")).unwrap();

        assert_eq!(
            result.states,
            vec![StepState::Complete, StepState::Failed, StepState::Pending]
        );
        assert!(matches!(
            result.error,
            Some(ReplayError::RetryBudgetExhausted { step: 2, attempts: 2 })
        ));
        assert_eq!(result.cycles_for_step(3), 0);
        let report = result.report();
        assert_eq!(report.steps_completed, 1);
        assert_eq!(report.failed_step, Some(2));
        assert_eq!(report.retries, Some(1));
        assert_eq!(report.last_action, Some(Action::LeftClick));
    }

    #[test]
    fn test_screen_change_verifier_in_loop() {
        // Clicking draws a marker on the mock screen, which counts as change
        let model = ScriptedModel::new()
            .then_reply(r#"{"action": "mouse_move", "coordinate": [100, 100]}"#)
            .then_reply(r#"{"action": "left_click"}"#);
        let mut run = playback(model, Box::new(ScreenChangeVerifier::new(0.0001)), 3);
        let result = run
            .run(&[Step::new(1, "Click the middle")], Transcript::in_memory("t"))
            .unwrap();

        assert!(result.succeeded());
        assert_eq!(result.cycles_for_step(1), 2);
    }
}
