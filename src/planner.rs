//! Next-action selection.
//!
//! Each call shows the model one fresh screenshot, the current step and a
//! bounded window of the transcript, and expects exactly one action back.

use tracing::{debug, warn};

use crate::action::Action;
use crate::config;
use crate::error::{ReplayError, ReplayResult};
use crate::executor::Screenshot;
use crate::model::{InferenceRequest, ModelCapability, prompts};
use crate::synthesis::Step;
use crate::transcript::Transcript;

/// Planner configuration
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Number of most recent transcript entries shown to the model
    pub history_window: usize,
    /// Run-level instruction from the user, prepended to every prompt
    pub user_instruction: Option<String>,
    /// Host architecture named in the system prompt
    pub arch: String,
    /// Date named in the system prompt
    pub date: String,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            history_window: config::get().playback.history_window,
            user_instruction: None,
            arch: std::env::consts::ARCH.to_string(),
            date: chrono::Local::now().format("%A, %B %-d, %Y").to_string(),
        }
    }
}

impl PlannerConfig {
    pub fn history_window(mut self, n: usize) -> Self {
        self.history_window = n;
        self
    }

    pub fn user_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.user_instruction = Some(instruction.into());
        self
    }
}

/// Chooses the next action for a step
pub struct ActionPlanner<M> {
    model: M,
    config: PlannerConfig,
    system: String,
}

impl<M: ModelCapability> ActionPlanner<M> {
    pub fn new(model: M) -> Self {
        Self::with_config(model, PlannerConfig::default())
    }

    pub fn with_config(model: M, config: PlannerConfig) -> Self {
        let system = prompts::planner_system(&config.arch, &config.date);
        Self {
            model,
            config,
            system,
        }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Build the request for one planning call
    pub fn request(
        &self,
        step: &Step,
        step_count: usize,
        transcript: &Transcript,
        screenshot: &Screenshot,
    ) -> ReplayResult<InferenceRequest> {
        let history = transcript.recent(self.config.history_window);
        let history = if history.is_empty() {
            "(none)".to_string()
        } else {
            history
                .iter()
                .map(|entry| format!("- {}", entry.describe()))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let mut hints = Vec::new();
        if let Some(outcome) = &step.hints.expected_outcome {
            hints.push(format!("Expected result: {}", outcome));
        }
        if let Some(region) = step.hints.expected_region {
            hints.push(format!(
                "The change should appear around x={}..{}, y={}..{} in the screenshot.",
                region.x,
                region.x + region.width,
                region.y,
                region.y + region.height
            ));
        }

        let instruction = self
            .config
            .user_instruction
            .as_deref()
            .map(|i| format!("Overall goal: {}", i.trim()))
            .unwrap_or_default();

        let prompt = prompts::render(
            prompts::PLANNER_TEMPLATE,
            &[
                ("instruction", instruction.as_str()),
                ("step_index", step.index.to_string().as_str()),
                ("step_count", step_count.to_string().as_str()),
                ("step", step.text.as_str()),
                ("hints", hints.join("\n").as_str()),
                ("history", history.as_str()),
                ("width", screenshot.width().to_string().as_str()),
                ("height", screenshot.height().to_string().as_str()),
            ],
        );

        Ok(InferenceRequest::new()
            .system(self.system.clone())
            .image(screenshot.to_png()?)
            .text(prompt))
    }

    /// Ask for exactly one action.
    ///
    /// Fails with `PlanningUnavailable` when the model cannot answer and
    /// `MalformedAction` when the answer is not a valid action.
    pub fn plan(
        &self,
        step: &Step,
        step_count: usize,
        transcript: &Transcript,
        screenshot: &Screenshot,
    ) -> ReplayResult<Action> {
        let request = self.request(step, step_count, transcript, screenshot)?;
        let response = self
            .model
            .infer(&request)
            .map_err(|e| ReplayError::PlanningUnavailable(e.to_string()))?;

        match Action::parse_response(&response) {
            Ok(action) => {
                debug!(step = step.index, %action, "planned action");
                Ok(action)
            }
            Err(e) => {
                warn!(step = step.index, response = %response.trim(), "unusable planner output");
                Err(e)
            }
        }
    }
}
