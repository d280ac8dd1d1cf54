//! Replay Vision - learn a desktop workflow from a screen recording and play
//! it back with a vision-language model in the loop.
//!
//! This crate provides:
//! - Key-frame sampling from videos and image sequences
//! - Instruction synthesis: frames to an ordered list of steps
//! - A plan/execute/verify loop driving a desktop through a fixed action set
//! - Pluggable model, desktop and verification backends with in-memory fakes
//! - Session directories and JSON Lines transcripts
//!
//! # Example
//!
//! ```rust,no_run
//! use replay_vision::desktop::MockDesktop;
//! use replay_vision::model::ScriptedModel;
//! use replay_vision::synthesis::Step;
//! use replay_vision::transcript::Transcript;
//! use replay_vision::verify::ScreenChangeVerifier;
//! use replay_vision::Pipeline;
//!
//! let model = ScriptedModel::new().otherwise(r#"{"action": "left_click"}"#);
//! let pipeline = Pipeline::new(model);
//! let steps = vec![Step::new(1, "Click the OK button")];
//! let run = pipeline
//!     .play(
//!         &steps,
//!         MockDesktop::new(1280, 800),
//!         Box::new(ScreenChangeVerifier::default()),
//!         Transcript::in_memory("demo"),
//!     )
//!     .unwrap();
//! println!("{}", run.status());
//! ```

pub mod action;
pub mod cancel;
pub mod config;
pub mod desktop;
pub mod error;
pub mod executor;
pub mod frames;
pub mod imaging;
pub mod model;
pub mod pipeline;
pub mod planner;
pub mod playback;
pub mod session;
pub mod synthesis;
pub mod transcript;
pub mod verify;

// Re-export core types
pub use action::{Action, ActionKind, Coordinate};
pub use cancel::CancelToken;
pub use error::{ErrorKind, ReplayError, ReplayResult};

// Re-export pipeline stages
pub use executor::{ActionExecutor, ExecutionResult, ExecutorConfig, Screenshot};
pub use frames::{Frame, FrameSampler, SamplerConfig, open_video};
pub use pipeline::Pipeline;
pub use planner::{ActionPlanner, PlannerConfig};
pub use playback::{PlaybackConfig, RunReport, RunStatus, StepState, VerificationLoop, WorkflowRun};
pub use synthesis::{InstructionSynthesizer, Step, StepHints, SynthesisConfig};
pub use transcript::{Transcript, TranscriptEntry, Verdict};
pub use verify::{ModelVerifier, ScreenChangeVerifier, Verifier};

// Re-export session management
pub use session::{Session, cleanup_old_sessions, list_sessions};
