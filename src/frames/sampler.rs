//! Frame sampling: reduce a recording to a bounded set of informative frames.
//!
//! The scan compares each decoded frame against the last *kept* frame and
//! keeps it when the difference ratio exceeds `min_difference`. One slot is
//! always reserved for the final frame. Once the interior budget runs low,
//! the sampler stops reacting to change and spreads the remaining budget
//! evenly over the rest of the recording, so a burst of activity early on
//! cannot starve the tail.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, info};

use super::diff::{DEFAULT_NOISE_TOLERANCE, Thumbnail};
use super::source::VideoSource;
use super::types::{DecodedFrame, Frame, SampleStats, SelectionReason};
use crate::config;
use crate::error::{ReplayError, ReplayResult};

/// Sampler parameters
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Upper bound on frames returned (values below 2 are treated as 2)
    pub max_frames: usize,
    /// Minimum difference ratio between consecutive kept frames
    pub min_difference: f32,
    /// Per-pixel luma tolerance used by the difference metric
    pub noise_tolerance: u8,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        let cfg = config::get();
        Self {
            max_frames: cfg.sampler.max_frames,
            min_difference: cfg.sampler.min_difference,
            noise_tolerance: DEFAULT_NOISE_TOLERANCE,
        }
    }
}

impl SamplerConfig {
    pub fn new(max_frames: usize, min_difference: f32) -> Self {
        Self {
            max_frames,
            min_difference,
            ..Default::default()
        }
    }

    pub fn noise_tolerance(mut self, tolerance: u8) -> Self {
        self.noise_tolerance = tolerance;
        self
    }
}

/// Selects representative frames from a [`VideoSource`]
#[derive(Debug, Clone, Default)]
pub struct FrameSampler {
    config: SamplerConfig,
}

impl FrameSampler {
    pub fn new(config: SamplerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Sample frames from `source`.
    ///
    /// Output is chronological, non-empty, at most `max_frames` long and
    /// always starts with the first frame and ends with the last one.
    pub fn sample(&self, source: &mut dyn VideoSource) -> ReplayResult<Vec<Frame>> {
        self.sample_with_stats(source).map(|(frames, _)| frames)
    }

    /// Like [`sample`](Self::sample), also returning scan counters.
    pub fn sample_with_stats(
        &self,
        source: &mut dyn VideoSource,
    ) -> ReplayResult<(Vec<Frame>, SampleStats)> {
        let path = source.path().to_path_buf();

        // Without a frame count the even-spacing targets cannot be placed,
        // so the stream is materialized first.
        let mut buffered: VecDeque<DecodedFrame> = VecDeque::new();
        let total = match source.frame_count() {
            Some(n) => n,
            None => {
                while let Some(frame) = source.next_frame()? {
                    buffered.push_back(frame);
                }
                buffered.len()
            }
        };
        let streaming = buffered.is_empty();
        let mut next = || -> ReplayResult<Option<DecodedFrame>> {
            if streaming {
                source.next_frame()
            } else {
                Ok(buffered.pop_front())
            }
        };

        let mut selection = Selection::new(&self.config, total);
        let mut pending: Option<(usize, DecodedFrame)> = None;
        let mut position = 0usize;

        while let Some(decoded) = next()? {
            if let Some((index, frame)) = pending.take() {
                selection.offer(index, frame);
            }
            pending = Some((position, decoded));
            position += 1;
        }

        let Some((index, last)) = pending else {
            return Err(ReplayError::EmptyRecording(path));
        };
        selection.finish(index, last);

        let stats = SampleStats {
            scanned: position,
            accepted: selection.accepted.len(),
            fallback: selection.fallback_count,
        };
        info!(
            path = %path.display(),
            scanned = stats.scanned,
            accepted = stats.accepted,
            fallback = stats.fallback,
            "sampled recording"
        );
        Ok((selection.accepted, stats))
    }
}

#[derive(Debug)]
enum Mode {
    /// Keep frames that changed enough
    Change,
    /// Keep frames at precomputed positions
    EvenSpacing(VecDeque<usize>),
}

struct Selection<'a> {
    config: &'a SamplerConfig,
    /// Expected number of frames (may be an estimate)
    total: usize,
    /// Frames available between the first and last
    interior_budget: usize,
    /// Remaining-budget level at which even spacing takes over
    low_water: usize,
    accepted: Vec<Frame>,
    interior_accepted: usize,
    last_thumb: Option<Thumbnail>,
    last_index: usize,
    mode: Mode,
    fallback_count: usize,
}

impl<'a> Selection<'a> {
    fn new(config: &'a SamplerConfig, total: usize) -> Self {
        let budget = config.max_frames.max(2);
        let interior_budget = budget - 2;
        Self {
            config,
            total,
            interior_budget,
            low_water: interior_budget.div_ceil(4).max(1),
            accepted: Vec::with_capacity(budget),
            interior_accepted: 0,
            last_thumb: None,
            last_index: 0,
            mode: Mode::Change,
            fallback_count: 0,
        }
    }

    fn remaining(&self) -> usize {
        self.interior_budget - self.interior_accepted
    }

    /// Consider a frame that is known not to be the last one.
    fn offer(&mut self, index: usize, decoded: DecodedFrame) {
        if self.accepted.is_empty() {
            self.accept(index, decoded, SelectionReason::First);
            return;
        }
        if self.remaining() == 0 {
            return;
        }

        let thumb = Thumbnail::from_image(&decoded.image);
        let difference = self
            .last_thumb
            .as_ref()
            .map(|last| last.difference(&thumb, self.config.noise_tolerance))
            .unwrap_or(1.0);

        let reason = match &mut self.mode {
            Mode::Change => {
                (difference > self.config.min_difference).then_some(SelectionReason::Change)
            }
            Mode::EvenSpacing(targets) => {
                let mut due = false;
                while targets.front().is_some_and(|&t| t <= index) {
                    targets.pop_front();
                    due = true;
                }
                // A due slot is skipped when no thumbnail pixel moved past the
                // noise tolerance, even if the full-size frames differ.
                (due && difference > 0.0).then_some(SelectionReason::EvenSpacing)
            }
        };

        if let Some(reason) = reason {
            self.interior_accepted += 1;
            if reason == SelectionReason::EvenSpacing {
                self.fallback_count += 1;
            }
            self.accept_with_thumb(index, decoded, reason, thumb);
        }
    }

    fn finish(&mut self, index: usize, decoded: DecodedFrame) {
        let reason = if self.accepted.is_empty() {
            SelectionReason::First
        } else {
            SelectionReason::Last
        };
        self.accept(index, decoded, reason);
    }

    fn accept(&mut self, index: usize, decoded: DecodedFrame, reason: SelectionReason) {
        let thumb = Thumbnail::from_image(&decoded.image);
        self.accept_with_thumb(index, decoded, reason, thumb);
    }

    fn accept_with_thumb(
        &mut self,
        index: usize,
        decoded: DecodedFrame,
        reason: SelectionReason,
        thumb: Thumbnail,
    ) {
        debug!(index, offset_ms = decoded.offset.as_millis() as u64, ?reason, "kept frame");
        self.accepted.push(Frame {
            index: index as u64,
            offset: decoded.offset,
            image: Arc::new(decoded.image),
            reason,
        });
        self.last_thumb = Some(thumb);
        self.last_index = index;
        self.maybe_start_even_spacing();
    }

    fn maybe_start_even_spacing(&mut self) {
        if !matches!(self.mode, Mode::Change) {
            return;
        }
        let remaining = self.remaining();
        if remaining == 0 || remaining > self.low_water {
            return;
        }
        let end = self.total.saturating_sub(1);
        if end <= self.last_index + 1 {
            return;
        }
        let span = (end - self.last_index) as f64;
        let slots = remaining + 1;
        let mut targets: VecDeque<usize> = VecDeque::with_capacity(remaining);
        for j in 1..=remaining {
            let target = self.last_index + (span * j as f64 / slots as f64).round() as usize;
            if target > self.last_index && target < end && targets.back() != Some(&target) {
                targets.push_back(target);
            }
        }
        debug!(from = self.last_index, ?targets, "switching to even spacing");
        self.mode = Mode::EvenSpacing(targets);
    }
}
