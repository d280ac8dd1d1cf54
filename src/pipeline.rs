//! End-to-end composition: recording → frames → steps → playback.
//!
//! [`Pipeline`] holds one model and the per-stage configs. Each stage can
//! be driven on its own (the CLI's `sample`, `synthesize` and `play`
//! commands) or chained through [`Pipeline::run`].

use std::path::Path;
use tracing::info;

use crate::cancel::CancelToken;
use crate::config;
use crate::desktop::Desktop;
use crate::error::ReplayResult;
use crate::executor::{ActionExecutor, ExecutorConfig};
use crate::frames::{Frame, FrameSampler, SampleStats, SamplerConfig, open_video};
use crate::model::ModelCapability;
use crate::planner::{ActionPlanner, PlannerConfig};
use crate::playback::{PlaybackConfig, VerificationLoop, WorkflowRun};
use crate::session::Session;
use crate::synthesis::{InstructionSynthesizer, Step, SynthesisConfig, save_steps};
use crate::transcript::Transcript;
use crate::verify::Verifier;

/// Stage configuration and the shared model
#[derive(Debug, Clone)]
pub struct Pipeline<M> {
    model: M,
    pub sampler: SamplerConfig,
    pub decode_fps: f32,
    pub synthesis: SynthesisConfig,
    pub planner: PlannerConfig,
    pub executor: ExecutorConfig,
    pub playback: PlaybackConfig,
    cancel: CancelToken,
}

impl<M: ModelCapability + Clone> Pipeline<M> {
    pub fn new(model: M) -> Self {
        Self {
            model,
            sampler: SamplerConfig::default(),
            decode_fps: config::get().sampler.decode_fps,
            synthesis: SynthesisConfig::default(),
            planner: PlannerConfig::default(),
            executor: ExecutorConfig::default(),
            playback: PlaybackConfig::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Decode `recording` and keep its key frames
    pub fn sample(&self, recording: &Path) -> ReplayResult<(Vec<Frame>, SampleStats)> {
        let mut source = open_video(recording, self.decode_fps)?;
        let (frames, stats) = FrameSampler::new(self.sampler.clone()).sample_with_stats(source.as_mut())?;
        info!(
            recording = %recording.display(),
            scanned = stats.scanned,
            kept = stats.accepted,
            fallback = stats.fallback,
            "sampled recording"
        );
        Ok((frames, stats))
    }

    /// Turn key frames into steps
    pub fn synthesize(&self, frames: &[Frame], context: Option<&str>) -> ReplayResult<Vec<Step>> {
        InstructionSynthesizer::with_config(self.model.clone(), self.synthesis.clone())
            .synthesize(frames, context)
    }

    /// Play `steps` on `desktop`, recording into `transcript`
    pub fn play<D: Desktop>(
        &self,
        steps: &[Step],
        desktop: D,
        verifier: Box<dyn Verifier>,
        transcript: Transcript,
    ) -> ReplayResult<WorkflowRun> {
        let planner = ActionPlanner::with_config(self.model.clone(), self.planner.clone());
        let executor = ActionExecutor::with_config(desktop, self.executor.clone());
        VerificationLoop::new(planner, executor, verifier)
            .with_config(self.playback.clone())
            .with_cancel_token(self.cancel.clone())
            .run(steps, transcript)
    }

    /// All stages, with frames, steps and transcript stored in `session`
    pub fn run<D: Desktop>(
        &self,
        recording: &Path,
        context: Option<&str>,
        desktop: D,
        verifier: Box<dyn Verifier>,
        session: &Session,
    ) -> ReplayResult<WorkflowRun> {
        session.init()?;
        let (frames, _) = self.sample(recording)?;
        session.save_frames(&frames, self.synthesis.max_image_width)?;

        let steps = self.synthesize(&frames, context)?;
        save_steps(&session.steps_path(), &steps)?;

        let transcript = Transcript::create(&session.dir, session.id.clone())?;
        self.play(&steps, desktop, verifier, transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desktop::MockDesktop;
    use crate::error::ReplayError;
    use crate::model::ScriptedModel;
    use crate::synthesis::load_steps;
    use crate::verify::ModelVerifier;
    use image::{Rgb, RgbImage};
    use std::time::Duration;
    use tempfile::TempDir;

    fn quiet(model: ScriptedModel) -> Pipeline<ScriptedModel> {
        let mut pipeline = Pipeline::new(model);
        pipeline.executor = pipeline
            .executor
            .settle(Duration::ZERO)
            .typing_delay(Duration::ZERO);
        pipeline.playback = pipeline
            .playback
            .max_attempts(3)
            .backoff(Duration::from_millis(1), Duration::from_millis(2));
        pipeline
    }

    fn write_recording(dir: &Path) {
        for (i, shade) in [0u8, 0, 200, 200].iter().enumerate() {
            RgbImage::from_pixel(64, 36, Rgb([*shade, *shade, *shade]))
                .save(dir.join(format!("frame_{:03}.png", i)))
                .unwrap();
        }
    }

    #[test]
    fn test_full_run_from_image_sequence() {
        let tmp = TempDir::new().unwrap();
        let recording = tmp.path().join("recording");
        std::fs::create_dir(&recording).unwrap();
        write_recording(&recording);

        let synth = ScriptedModel::new().then_reply("1. Open the editor\n2. Type hello");
        let planner_model = synth
            .clone()
            .then_reply(r#"{"action": "key", "text": "ctrl+n"}"#)
            .then_reply(r#"{"action": "type", "text": "hello"}"#);
        let pipeline = quiet(planner_model);
        let verifier = ModelVerifier::new(ScriptedModel::new().otherwise("yes"));

        let session = Session::in_dir(tmp.path().join("session"));
        let run = pipeline
            .run(
                &recording,
                None,
                MockDesktop::new(320, 200),
                Box::new(verifier),
                &session,
            )
            .unwrap();

        assert!(run.succeeded());
        assert_eq!(run.transcript.len(), 2);
        assert_eq!(load_steps(&session.steps_path()).unwrap().len(), 2);
        assert!(session.transcript_path().exists());
        assert!(!session.list_captures().unwrap().is_empty());
    }

    #[test]
    fn test_missing_recording() {
        let pipeline = quiet(ScriptedModel::new());
        assert!(matches!(
            pipeline.sample(Path::new("/nonexistent/recording.mp4")),
            Err(ReplayError::UnreadableMedia { .. })
        ));
    }
}
