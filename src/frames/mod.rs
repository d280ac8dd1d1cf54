//! Frame sampling for screen recordings
//!
//! - `source`: decoding recordings into frames
//! - `diff`: the visual difference metric
//! - `sampler`: bounded, change-driven frame selection
//! - `types`: frame and statistics types

pub mod diff;
pub mod sampler;
pub mod source;
pub mod types;

pub use diff::{Region, Thumbnail, difference_ratio};
pub use sampler::{FrameSampler, SamplerConfig};
pub use source::{FfmpegSource, ImageSequenceSource, VideoSource, open_video};
pub use types::{DecodedFrame, Frame, FrameRecord, SampleStats, SelectionReason};
