//! Step completion judgment.
//!
//! - [`ModelVerifier`] asks the model a yes/no question about the screenshot
//! - [`ScreenChangeVerifier`] checks that the screen visibly changed since
//!   the step started, optionally only inside the step's expected region

use tracing::{debug, warn};

use crate::action::Action;
use crate::error::{ReplayError, ReplayResult};
use crate::executor::Screenshot;
use crate::frames::Thumbnail;
use crate::frames::diff::DEFAULT_NOISE_TOLERANCE;
use crate::model::{InferenceRequest, ModelCapability, prompts};
use crate::synthesis::Step;

/// Everything a verifier may look at
#[derive(Debug, Clone, Copy)]
pub struct VerificationContext<'a> {
    pub step: &'a Step,
    /// Screen when the step started
    pub initial: &'a Screenshot,
    /// Screen after the latest action
    pub current: &'a Screenshot,
    pub action: &'a Action,
}

/// Decides whether a step is done
pub trait Verifier: Send + Sync {
    /// `Ok(true)` when the step is complete; `VerificationUnavailable` when no
    /// verdict could be reached.
    fn verify(&self, ctx: &VerificationContext<'_>) -> ReplayResult<bool>;

    fn name(&self) -> &str;
}

/// Asks the model whether the step has been completed
pub struct ModelVerifier<M> {
    model: M,
}

impl<M: ModelCapability> ModelVerifier<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }
}

/// `true` when the first word of `answer` is "yes"
pub fn parse_yes_no(answer: &str) -> bool {
    answer
        .split_whitespace()
        .next()
        .map(|word| word.trim_matches(|c: char| !c.is_alphanumeric()))
        .is_some_and(|word| word.eq_ignore_ascii_case("yes"))
}

impl<M: ModelCapability> Verifier for ModelVerifier<M> {
    fn verify(&self, ctx: &VerificationContext<'_>) -> ReplayResult<bool> {
        let question = prompts::verification_prompt(
            &ctx.step.text,
            ctx.step.hints.expected_outcome.as_deref(),
        );
        let request = InferenceRequest::new()
            .image(ctx.current.to_png()?)
            .text(question);
        let answer = self
            .model
            .infer(&request)
            .map_err(|e| ReplayError::VerificationUnavailable(e.to_string()))?;

        let complete = parse_yes_no(&answer);
        if !complete && !answer.trim_start().to_lowercase().starts_with("no") {
            warn!(step = ctx.step.index, answer = %answer.trim(), "unclear verdict, treating as not complete");
        }
        Ok(complete)
    }

    fn name(&self) -> &str {
        "model"
    }
}

/// Deterministic heuristic: the step is complete once enough of the screen
/// (or of its expected region) differs from the step's initial screenshot.
#[derive(Debug, Clone)]
pub struct ScreenChangeVerifier {
    threshold: f32,
    tolerance: u8,
}

impl Default for ScreenChangeVerifier {
    fn default() -> Self {
        Self {
            threshold: 0.005,
            tolerance: DEFAULT_NOISE_TOLERANCE,
        }
    }
}

impl ScreenChangeVerifier {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            ..Default::default()
        }
    }
}

impl Verifier for ScreenChangeVerifier {
    fn verify(&self, ctx: &VerificationContext<'_>) -> ReplayResult<bool> {
        if ctx.initial.image.dimensions() != ctx.current.image.dimensions() {
            // Resolution change: the screen certainly changed
            return Ok(true);
        }
        let (before, after) = match ctx.step.hints.expected_region {
            Some(region) => (
                Thumbnail::from_region(&ctx.initial.image, region),
                Thumbnail::from_region(&ctx.current.image, region),
            ),
            None => (
                Thumbnail::from_image(&ctx.initial.image),
                Thumbnail::from_image(&ctx.current.image),
            ),
        };
        let difference = before.difference(&after, self.tolerance);
        debug!(step = ctx.step.index, difference, threshold = self.threshold, "screen change");
        Ok(difference >= self.threshold && difference > 0.0)
    }

    fn name(&self) -> &str {
        "screen_change"
    }
}
