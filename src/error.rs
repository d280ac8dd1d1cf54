//! Error taxonomy shared by every stage of a replay.
//!
//! Capability failures (`*Unavailable`, `InjectionFailed`) and contract
//! violations (`MalformedAction`) are distinct variants so the playback loop
//! can route them differently. `kind()` flattens an error into the
//! serializable [`ErrorKind`] recorded in transcripts and reports.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type for replay operations
pub type ReplayResult<T> = Result<T, ReplayError>;

/// Errors produced while sampling, synthesizing or playing back a workflow.
#[derive(Error, Debug)]
pub enum ReplayError {
    /// The recording could not be opened or decoded.
    #[error("unreadable media {}: {reason}", path.display())]
    UnreadableMedia {
        /// Path of the recording
        path: PathBuf,
        /// Decoder message
        reason: String,
    },

    /// The recording decoded but yielded no frames.
    #[error("recording {} contains no usable frames", .0.display())]
    EmptyRecording(PathBuf),

    /// The model could not produce a step list.
    #[error("instruction synthesis unavailable: {0}")]
    SynthesisUnavailable(String),

    /// The model answered but no steps could be read from the answer.
    #[error("model returned an empty workflow")]
    EmptyWorkflow,

    /// The model could not be reached while planning an action.
    #[error("action planning unavailable: {0}")]
    PlanningUnavailable(String),

    /// The planner's answer is not a valid action.
    #[error("malformed action: {0}")]
    MalformedAction(String),

    /// The OS-level input or capture call failed.
    #[error("input injection failed: {0}")]
    InjectionFailed(String),

    /// The verification strategy could not reach a verdict.
    #[error("verification unavailable: {0}")]
    VerificationUnavailable(String),

    /// A step used all of its attempts without completing.
    #[error("step {step} exhausted its retry budget after {attempts} attempts")]
    RetryBudgetExhausted {
        /// 1-based step index
        step: usize,
        /// Attempts consumed
        attempts: u32,
    },

    /// The run was cancelled.
    #[error("run aborted")]
    Aborted,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Image encoding or decoding error
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Flat, serializable classification of a [`ReplayError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnreadableMedia,
    EmptyRecording,
    SynthesisUnavailable,
    EmptyWorkflow,
    PlanningUnavailable,
    MalformedAction,
    InjectionFailed,
    VerificationUnavailable,
    RetryBudgetExhausted,
    Aborted,
    Io,
}

impl ReplayError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReplayError::UnreadableMedia { .. } => ErrorKind::UnreadableMedia,
            ReplayError::EmptyRecording(_) => ErrorKind::EmptyRecording,
            ReplayError::SynthesisUnavailable(_) => ErrorKind::SynthesisUnavailable,
            ReplayError::EmptyWorkflow => ErrorKind::EmptyWorkflow,
            ReplayError::PlanningUnavailable(_) => ErrorKind::PlanningUnavailable,
            ReplayError::MalformedAction(_) => ErrorKind::MalformedAction,
            ReplayError::InjectionFailed(_) => ErrorKind::InjectionFailed,
            ReplayError::VerificationUnavailable(_) => ErrorKind::VerificationUnavailable,
            ReplayError::RetryBudgetExhausted { .. } => ErrorKind::RetryBudgetExhausted,
            ReplayError::Aborted => ErrorKind::Aborted,
            ReplayError::Io(_) | ReplayError::Serialization(_) | ReplayError::Image(_) => {
                ErrorKind::Io
            }
        }
    }

    /// Whether this error comes from an unreachable capability boundary.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::SynthesisUnavailable
                | ErrorKind::PlanningUnavailable
                | ErrorKind::VerificationUnavailable
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::UnreadableMedia => "UnreadableMedia",
            ErrorKind::EmptyRecording => "EmptyRecording",
            ErrorKind::SynthesisUnavailable => "SynthesisUnavailable",
            ErrorKind::EmptyWorkflow => "EmptyWorkflow",
            ErrorKind::PlanningUnavailable => "PlanningUnavailable",
            ErrorKind::MalformedAction => "MalformedAction",
            ErrorKind::InjectionFailed => "InjectionFailed",
            ErrorKind::VerificationUnavailable => "VerificationUnavailable",
            ErrorKind::RetryBudgetExhausted => "RetryBudgetExhausted",
            ErrorKind::Aborted => "Aborted",
            ErrorKind::Io => "Io",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(ReplayError::EmptyWorkflow.kind(), ErrorKind::EmptyWorkflow);
        assert_eq!(
            ReplayError::RetryBudgetExhausted { step: 2, attempts: 3 }.kind(),
            ErrorKind::RetryBudgetExhausted
        );
        assert_eq!(
            ReplayError::Io(std::io::Error::other("disk")).kind(),
            ErrorKind::Io
        );
    }

    #[test]
    fn test_unavailable_family() {
        assert!(ReplayError::PlanningUnavailable("down".into()).is_unavailable());
        assert!(ReplayError::VerificationUnavailable("down".into()).is_unavailable());
        assert!(!ReplayError::MalformedAction("bad".into()).is_unavailable());
        assert!(!ReplayError::InjectionFailed("denied".into()).is_unavailable());
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::RetryBudgetExhausted).unwrap();
        assert_eq!(json, "\"retry_budget_exhausted\"");
    }
}
