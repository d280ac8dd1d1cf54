//! Video sources: the decoding side of frame sampling.
//!
//! - `ImageSequenceSource` reads a directory of numbered still images
//! - `FfmpegSource` decodes any container through `ffprobe`/`ffmpeg` pipes
//!
//! Both stream frames one at a time so long recordings are never held in
//! memory.

use std::fs;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::debug;

use super::types::DecodedFrame;
use crate::error::{ReplayError, ReplayResult};
use crate::imaging;

/// Extensions accepted by [`ImageSequenceSource`]
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

/// A decodable stream of frames
pub trait VideoSource {
    /// Path of the recording (for error messages)
    fn path(&self) -> &Path;

    /// Expected number of frames, if the container reports it
    fn frame_count(&self) -> Option<usize>;

    /// Decode the next frame, `None` at end of stream
    fn next_frame(&mut self) -> ReplayResult<Option<DecodedFrame>>;
}

/// Open a recording: directories are read as image sequences, files are
/// decoded with ffmpeg at `fps` frames per second.
pub fn open_video(path: &Path, fps: f32) -> ReplayResult<Box<dyn VideoSource>> {
    if path.is_dir() {
        Ok(Box::new(ImageSequenceSource::open(path, fps)?))
    } else {
        Ok(Box::new(FfmpegSource::open(path, fps)?))
    }
}

fn unreadable(path: &Path, reason: impl Into<String>) -> ReplayError {
    ReplayError::UnreadableMedia {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn frame_interval(fps: f32) -> Duration {
    if fps > 0.0 {
        Duration::from_secs_f64(1.0 / fps as f64)
    } else {
        Duration::from_secs(1)
    }
}

// =============================================================================
// Image sequences
// =============================================================================

/// Directory of still frames, ordered by the number in their file names
#[derive(Debug)]
pub struct ImageSequenceSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    interval: Duration,
    position: usize,
}

impl ImageSequenceSource {
    pub fn open(dir: &Path, fps: f32) -> ReplayResult<Self> {
        let entries = fs::read_dir(dir).map_err(|e| unreadable(dir, e.to_string()))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| unreadable(dir, e.to_string()))?.path();
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
                .unwrap_or(false);
            if is_image {
                files.push(path);
            }
        }
        files.sort_by(|a, b| sequence_key(a).cmp(&sequence_key(b)));
        debug!(dir = %dir.display(), frames = files.len(), "opened image sequence");

        Ok(Self {
            dir: dir.to_path_buf(),
            files,
            interval: frame_interval(fps),
            position: 0,
        })
    }
}

/// Sort key: trailing number in the file stem, then the full name
fn sequence_key(path: &Path) -> (u64, String) {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let digits: String = stem
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    (digits.parse().unwrap_or(u64::MAX), stem)
}

impl VideoSource for ImageSequenceSource {
    fn path(&self) -> &Path {
        &self.dir
    }

    fn frame_count(&self) -> Option<usize> {
        Some(self.files.len())
    }

    fn next_frame(&mut self) -> ReplayResult<Option<DecodedFrame>> {
        let Some(file) = self.files.get(self.position) else {
            return Ok(None);
        };
        let image = image::open(file)
            .map_err(|e| unreadable(file, e.to_string()))?
            .to_rgb8();
        let offset = self.interval * self.position as u32;
        self.position += 1;
        Ok(Some(DecodedFrame { offset, image }))
    }
}

// =============================================================================
// ffmpeg
// =============================================================================

/// Video file decoded by an `ffmpeg` child process into raw RGB frames
pub struct FfmpegSource {
    path: PathBuf,
    width: u32,
    height: u32,
    expected_frames: Option<usize>,
    interval: Duration,
    position: usize,
    child: Child,
    stdout: ChildStdout,
    /// Drained on its own thread so a chatty ffmpeg never blocks on a full pipe
    stderr: Option<JoinHandle<String>>,
    finished: bool,
}

/// Stream geometry reported by ffprobe
#[derive(Debug, Clone, PartialEq)]
struct ProbeInfo {
    width: u32,
    height: u32,
    duration: Option<f64>,
}

impl FfmpegSource {
    pub fn open(path: &Path, fps: f32) -> ReplayResult<Self> {
        if !path.is_file() {
            return Err(unreadable(path, "file not found"));
        }
        let probe = probe(path)?;
        let fps = if fps > 0.0 { fps } else { 1.0 };

        let mut child = Command::new("ffmpeg")
            .args(["-v", "error", "-nostdin", "-i"])
            .arg(path)
            .args([
                "-vf",
                &format!("fps={}", fps),
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgb24",
                "-",
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| unreadable(path, format!("failed to spawn ffmpeg: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| unreadable(path, "failed to capture ffmpeg stdout"))?;
        let stderr = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut text = String::new();
                let _ = pipe.read_to_string(&mut text);
                text
            })
        });

        let expected_frames = probe
            .duration
            .map(|secs| (secs * fps as f64).ceil().max(1.0) as usize);
        debug!(
            path = %path.display(),
            width = probe.width,
            height = probe.height,
            ?expected_frames,
            "opened video"
        );

        Ok(Self {
            path: path.to_path_buf(),
            width: probe.width,
            height: probe.height,
            expected_frames,
            interval: frame_interval(fps),
            position: 0,
            child,
            stdout,
            stderr,
            finished: false,
        })
    }

    fn finish(&mut self) -> ReplayResult<()> {
        self.finished = true;
        let output = self.child.wait()?;
        let stderr = self
            .stderr
            .take()
            .and_then(|reader| reader.join().ok())
            .unwrap_or_default();
        if !output.success() && self.position == 0 {
            return Err(unreadable(&self.path, format!("ffmpeg failed: {}", stderr.trim())));
        }
        Ok(())
    }
}

fn probe(path: &Path) -> ReplayResult<ProbeInfo> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height:format=duration",
            "-of",
            "json",
        ])
        .arg(path)
        .output()
        .map_err(|e| unreadable(path, format!("failed to run ffprobe: {}", e)))?;

    if !output.status.success() {
        return Err(unreadable(
            path,
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    parse_probe(&output.stdout).ok_or_else(|| unreadable(path, "no video stream"))
}

fn parse_probe(json: &[u8]) -> Option<ProbeInfo> {
    let value: serde_json::Value = serde_json::from_slice(json).ok()?;
    let stream = &value["streams"][0];
    let width = u32::try_from(stream["width"].as_u64()?).ok()?;
    let height = u32::try_from(stream["height"].as_u64()?).ok()?;
    if width == 0 || height == 0 {
        return None;
    }
    let duration = value["format"]["duration"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok());
    Some(ProbeInfo {
        width,
        height,
        duration,
    })
}

impl VideoSource for FfmpegSource {
    fn path(&self) -> &Path {
        &self.path
    }

    fn frame_count(&self) -> Option<usize> {
        self.expected_frames
    }

    fn next_frame(&mut self) -> ReplayResult<Option<DecodedFrame>> {
        if self.finished {
            return Ok(None);
        }
        let mut buffer = vec![0u8; (self.width * self.height * 3) as usize];
        match self.stdout.read_exact(&mut buffer) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                self.finish()?;
                return Ok(None);
            }
            Err(e) => return Err(unreadable(&self.path, e.to_string())),
        }
        let image = imaging::from_raw_rgb(self.width, self.height, buffer)
            .ok_or_else(|| unreadable(&self.path, "frame size mismatch"))?;
        let offset = self.interval * self.position as u32;
        self.position += 1;
        Ok(Some(DecodedFrame { offset, image }))
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    #[test]
    fn test_sequence_key_orders_numerically() {
        let mut files = vec![
            PathBuf::from("frame_10.png"),
            PathBuf::from("frame_2.png"),
            PathBuf::from("frame_1.png"),
        ];
        files.sort_by(|a, b| sequence_key(a).cmp(&sequence_key(b)));
        assert_eq!(
            files,
            vec![
                PathBuf::from("frame_1.png"),
                PathBuf::from("frame_2.png"),
                PathBuf::from("frame_10.png"),
            ]
        );
    }

    #[test]
    fn test_image_sequence_reads_in_order() {
        let dir = TempDir::new().unwrap();
        for (i, value) in [(2, 200u8), (1, 100u8), (0, 0u8)] {
            let img = RgbImage::from_pixel(8, 8, Rgb([value, value, value]));
            img.save(dir.path().join(format!("frame_{}.png", i))).unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut source = ImageSequenceSource::open(dir.path(), 4.0).unwrap();
        assert_eq!(source.frame_count(), Some(3));

        let first = source.next_frame().unwrap().unwrap();
        assert_eq!(first.offset, Duration::ZERO);
        assert_eq!(first.image.get_pixel(0, 0).0, [0, 0, 0]);

        let second = source.next_frame().unwrap().unwrap();
        assert_eq!(second.offset, Duration::from_millis(250));
        assert_eq!(second.image.get_pixel(0, 0).0, [100, 100, 100]);

        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_missing_directory_is_unreadable() {
        let err = ImageSequenceSource::open(Path::new("/nonexistent/replay-vision"), 1.0).unwrap_err();
        assert!(matches!(err, ReplayError::UnreadableMedia { .. }));
    }

    #[test]
    fn test_missing_video_file_is_unreadable() {
        let err = match open_video(Path::new("/nonexistent/recording.mp4"), 1.0) {
            Ok(_) => panic!("expected failure"),
            Err(e) => e,
        };
        assert!(matches!(err, ReplayError::UnreadableMedia { .. }));
    }

    #[test]
    fn test_ffmpeg_decodes_whole_clip() {
        let dir = TempDir::new().unwrap();
        let clip = dir.path().join("clip.mkv");
        let generated = Command::new("ffmpeg")
            .args(["-v", "error", "-nostdin", "-f", "lavfi", "-i", "testsrc=size=64x36:rate=10"])
            .args(["-t", "2", "-c:v", "ffv1"])
            .arg(&clip)
            .status()
            .map(|status| status.success())
            .unwrap_or(false);
        if !generated {
            return;
        }

        let mut source = FfmpegSource::open(&clip, 5.0).unwrap();
        let mut count = 0;
        while let Some(frame) = source.next_frame().unwrap() {
            assert_eq!(frame.image.dimensions(), (64, 36));
            count += 1;
        }
        assert!((9..=11).contains(&count), "decoded {} frames", count);
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_parse_probe() {
        let json = br#"{"streams":[{"width":1920,"height":1080}],"format":{"duration":"12.500000"}}"#;
        assert_eq!(
            parse_probe(json),
            Some(ProbeInfo {
                width: 1920,
                height: 1080,
                duration: Some(12.5),
            })
        );
        assert_eq!(parse_probe(br#"{"streams":[]}"#), None);
    }
}
