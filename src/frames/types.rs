use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::error::ReplayResult;
use crate::imaging;

/// Why the sampler kept a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionReason {
    /// First frame of the recording
    First,
    /// Differed enough from the previously kept frame
    Change,
    /// Kept by the even-spacing fallback
    EvenSpacing,
    /// Last frame of the recording
    Last,
}

impl SelectionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SelectionReason::First => "first",
            SelectionReason::Change => "change",
            SelectionReason::EvenSpacing => "even_spacing",
            SelectionReason::Last => "last",
        }
    }
}

impl std::fmt::Display for SelectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A frame kept by the sampler. Immutable; cloning shares the pixels.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Position in the decoded stream (0-based)
    pub index: u64,
    /// Offset from the start of the recording
    pub offset: Duration,
    /// Pixels
    pub image: Arc<RgbImage>,
    /// Why the frame was kept
    pub reason: SelectionReason,
}

impl Frame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// PNG bytes of this frame, downscaled to at most `max_width`
    pub fn to_png(&self, max_width: u32) -> ReplayResult<Vec<u8>> {
        imaging::encode_png(&imaging::fit_width(&self.image, max_width))
    }

    /// Human-readable label used in prompts and file names
    pub fn label(&self) -> String {
        format!("t={:.2}s", self.offset.as_secs_f64())
    }
}

/// A frame as produced by a [`VideoSource`](super::VideoSource), before selection
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub offset: Duration,
    pub image: RgbImage,
}

/// Counters describing one sampling pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleStats {
    /// Frames decoded and compared
    pub scanned: usize,
    /// Frames kept
    pub accepted: usize,
    /// Frames kept by the even-spacing fallback
    pub fallback: usize,
}

/// Metadata written next to sampled frames in a session directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameRecord {
    pub index: u64,
    pub offset_ms: u64,
    pub reason: SelectionReason,
    pub file: String,
}

impl FrameRecord {
    pub fn from_frame(frame: &Frame, file: impl Into<String>) -> Self {
        Self {
            index: frame.index,
            offset_ms: frame.offset.as_millis() as u64,
            reason: frame.reason,
            file: file.into(),
        }
    }
}
