//! Model capability: the vision-language model behind synthesis, planning
//! and verification.
//!
//! Consumers only see [`ModelCapability::infer`]. Wrappers add behavior:
//! - [`TimeoutModel`] bounds one call's wall-clock time
//! - [`RetryingModel`] retries transport failures with capped backoff
//!
//! [`OpenAiClient`] talks to any OpenAI-compatible chat-completions server;
//! [`ScriptedModel`] replays canned answers for tests.

pub mod openai;
pub mod prompts;
pub mod retry;
pub mod scripted;
pub mod timeout;

use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

pub use openai::{ModelConfig, OpenAiClient, StreamProgress, check_health};
pub use retry::RetryingModel;
pub use scripted::ScriptedModel;
pub use timeout::TimeoutModel;

/// Result type for model calls
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised by a model capability
#[derive(Error, Debug)]
pub enum ModelError {
    /// The endpoint could not be reached or the transport failed
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The server reported an error
    #[error("model API error: {0}")]
    Api(String),

    /// No streamed data for too long
    #[error("no response for {0:?}")]
    ActivityTimeout(Duration),

    /// The call as a whole took too long
    #[error("call exceeded {0:?}")]
    CallTimeout(Duration),

    /// The response could not be understood
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ModelError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        !matches!(self, ModelError::InvalidResponse(_))
    }
}

/// One piece of a multimodal prompt
#[derive(Debug, Clone, PartialEq)]
pub enum PromptPart {
    Text(String),
    /// PNG-encoded image
    Image(Vec<u8>),
}

impl PromptPart {
    pub fn text(text: impl Into<String>) -> Self {
        PromptPart::Text(text.into())
    }
}

/// A single inference call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InferenceRequest {
    /// Optional system instructions
    pub system: Option<String>,
    /// User content, in order
    pub parts: Vec<PromptPart>,
    /// Point after which the answer is no longer wanted. HTTP clients turn
    /// it into a transfer limit so abandoned calls end on their own.
    pub deadline: Option<Instant>,
}

impl InferenceRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.parts.push(PromptPart::Text(text.into()));
        self
    }

    pub fn image(mut self, png: Vec<u8>) -> Self {
        self.parts.push(PromptPart::Image(png));
        self
    }

    /// Set the deadline; an earlier one already present wins
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(self.deadline.map_or(deadline, |d| d.min(deadline)));
        self
    }

    /// Time left before the deadline, `None` without one
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn expired(&self) -> bool {
        self.remaining().is_some_and(|left| left.is_zero())
    }

    /// Number of images attached
    pub fn image_count(&self) -> usize {
        self.parts
            .iter()
            .filter(|p| matches!(p, PromptPart::Image(_)))
            .count()
    }

    /// All text parts joined with newlines
    pub fn text_content(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                PromptPart::Text(t) => Some(t.as_str()),
                PromptPart::Image(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A vision-language model: prompt parts in, text out.
///
/// Implementations must be usable from several threads; calls block.
pub trait ModelCapability: Send + Sync {
    fn infer(&self, request: &InferenceRequest) -> ModelResult<String>;

    /// Identifier for logs
    fn name(&self) -> &str {
        "model"
    }
}

impl<M: ModelCapability + ?Sized> ModelCapability for Arc<M> {
    fn infer(&self, request: &InferenceRequest) -> ModelResult<String> {
        (**self).infer(request)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

impl<M: ModelCapability + ?Sized> ModelCapability for Box<M> {
    fn infer(&self, request: &InferenceRequest) -> ModelResult<String> {
        (**self).infer(request)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
