//! Session directories for replay artifacts.
//!
//! A session groups everything one workflow produces:
//! - `frames/` with the sampled key frames
//! - `steps.json` with the synthesized steps
//! - `transcript.jsonl` plus the screenshots it references
//!
//! Sessions live under the configured base directory and are removed on
//! drop unless kept.

use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::config;
use crate::error::ReplayResult;
use crate::frames::{Frame, FrameRecord};
use crate::transcript::TRANSCRIPT_FILE;

const METADATA_FILE: &str = ".session.json";
const STEPS_FILE: &str = "steps.json";
const FRAMES_DIR: &str = "frames";
const FRAMES_MANIFEST: &str = "frames.json";

/// A workflow session with organized file management
#[derive(Debug)]
pub struct Session {
    /// Unique session ID
    pub id: String,
    /// Root directory for this session
    pub dir: PathBuf,
    /// Whether to keep files after the session ends
    pub keep: bool,
    /// Recording the session was created from, if any
    pub recording: Option<PathBuf>,
}

impl Session {
    /// New session with a unique ID under the configured base directory
    pub fn new() -> Self {
        let id = generate_session_id("session");
        Self::at(base_dir().join(&id), id)
    }

    /// Session named after `name` (typically the recording's file stem)
    pub fn with_name(name: &str) -> Self {
        let id = generate_session_id(&sanitize_name(name));
        Self::at(base_dir().join(&id), id)
    }

    /// Session in an explicit directory; kept by default
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let id = dir
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| generate_session_id("session"));
        Self::at(dir, id).keep(true)
    }

    fn at(dir: PathBuf, id: String) -> Self {
        Self {
            id,
            dir,
            keep: false,
            recording: None,
        }
    }

    /// Set whether to keep files after the session ends
    pub fn keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    pub fn with_recording(mut self, recording: impl Into<PathBuf>) -> Self {
        self.recording = Some(recording.into());
        self
    }

    /// Create the directory layout and write session metadata
    pub fn init(&self) -> ReplayResult<()> {
        fs::create_dir_all(self.frames_dir())?;
        let metadata = json!({
            "id": self.id,
            "created": chrono::Utc::now().to_rfc3339(),
            "recording": self.recording,
        });
        fs::write(
            self.dir.join(METADATA_FILE),
            serde_json::to_string_pretty(&metadata)?,
        )?;
        Ok(())
    }

    pub fn frames_dir(&self) -> PathBuf {
        self.dir.join(FRAMES_DIR)
    }

    /// Path for a sampled frame, ordered by source index
    pub fn frame_path(&self, frame: &Frame) -> PathBuf {
        self.frames_dir()
            .join(format!("frame_{:06}_{}.png", frame.index, frame.reason))
    }

    pub fn steps_path(&self) -> PathBuf {
        self.dir.join(STEPS_FILE)
    }

    pub fn transcript_path(&self) -> PathBuf {
        self.dir.join(TRANSCRIPT_FILE)
    }

    /// Write frames as PNG files (at most `max_width` wide) plus a
    /// `frames.json` manifest
    pub fn save_frames(&self, frames: &[Frame], max_width: u32) -> ReplayResult<Vec<PathBuf>> {
        fs::create_dir_all(self.frames_dir())?;
        let mut paths = Vec::with_capacity(frames.len());
        let mut records = Vec::with_capacity(frames.len());
        for frame in frames {
            let path = self.frame_path(frame);
            fs::write(&path, frame.to_png(max_width)?)?;
            let file = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            records.push(FrameRecord::from_frame(frame, file));
            paths.push(path);
        }
        fs::write(
            self.frames_dir().join(FRAMES_MANIFEST),
            serde_json::to_string_pretty(&records)?,
        )?;
        Ok(paths)
    }

    /// Frame metadata written by [`Session::save_frames`]
    pub fn load_frame_records(&self) -> ReplayResult<Vec<FrameRecord>> {
        let data = fs::read_to_string(self.frames_dir().join(FRAMES_MANIFEST))?;
        Ok(serde_json::from_str(&data)?)
    }

    /// List PNG files in the session, screenshots and frames alike
    pub fn list_captures(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut captures = Vec::new();
        for dir in [self.dir.clone(), self.frames_dir()] {
            if !dir.exists() {
                continue;
            }
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.extension().is_some_and(|e| e == "png") {
                    captures.push(path);
                }
            }
        }
        captures.sort();
        Ok(captures)
    }

    /// Remove the session directory unless it is kept
    pub fn cleanup(&self) -> std::io::Result<()> {
        if self.dir.exists() && !self.keep {
            fs::remove_dir_all(&self.dir)?;
        }
        Ok(())
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.keep {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }
}

fn base_dir() -> PathBuf {
    PathBuf::from(&config::get().session.base_dir)
}

/// Session ID: prefix, UTC timestamp and process ID
fn generate_session_id(prefix: &str) -> String {
    format!(
        "{}_{}_{}",
        prefix,
        chrono::Utc::now().format("%Y%m%d_%H%M%S%3f"),
        std::process::id()
    )
}

/// Sanitize a name for use in filenames
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

/// Remove sessions under `base` older than `max_age`
pub fn cleanup_old_sessions(base: &Path, max_age: std::time::Duration) -> std::io::Result<usize> {
    if !base.exists() {
        return Ok(0);
    }

    let now = SystemTime::now();
    let mut cleaned = 0;
    for entry in fs::read_dir(base)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());
        if age.is_some_and(|age| age > max_age) && fs::remove_dir_all(&path).is_ok() {
            cleaned += 1;
        }
    }
    Ok(cleaned)
}

/// List session directories under `base`
pub fn list_sessions(base: &Path) -> std::io::Result<Vec<PathBuf>> {
    if !base.exists() {
        return Ok(Vec::new());
    }

    let mut sessions = Vec::new();
    for entry in fs::read_dir(base)? {
        let path = entry?.path();
        if path.is_dir() {
            sessions.push(path);
        }
    }
    sessions.sort();
    Ok(sessions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::SelectionReason;
    use image::RgbImage;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_session_new() {
        let session = Session::new();
        assert!(session.id.starts_with("session_"));
        assert!(session.dir.starts_with(&config::get().session.base_dir));
        assert!(!session.keep);
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("demo recording"), "demo_recording");
        assert_eq!(sanitize_name("a/b\\c.mp4"), "a_b_c_mp4");
        assert!(Session::with_name("screen cast").id.starts_with("screen_cast_"));
    }

    #[test]
    fn test_layout_and_cleanup() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("s1");
        let session = Session::in_dir(&dir).keep(false).with_recording("/videos/demo.mp4");
        session.init().unwrap();
        assert!(session.frames_dir().is_dir());
        assert!(session.transcript_path().ends_with("transcript.jsonl"));

        let frame = Frame {
            index: 7,
            offset: Duration::from_millis(3500),
            image: Arc::new(RgbImage::new(16, 9)),
            reason: SelectionReason::Change,
        };
        let paths = session.save_frames(&[frame], 1280).unwrap();
        assert!(paths[0].ends_with("frame_000007_change.png"));
        assert_eq!(session.list_captures().unwrap(), paths);
        let records = session.load_frame_records().unwrap();
        assert_eq!(records[0].offset_ms, 3500);
        assert_eq!(records[0].file, "frame_000007_change.png");

        drop(session);
        assert!(!dir.exists());
    }

    #[test]
    fn test_list_and_cleanup_sessions() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("a")).unwrap();
        fs::create_dir(tmp.path().join("b")).unwrap();
        fs::write(tmp.path().join("stray.txt"), "x").unwrap();

        assert_eq!(list_sessions(tmp.path()).unwrap().len(), 2);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cleanup_old_sessions(tmp.path(), Duration::from_secs(3600)).unwrap(), 0);
        assert_eq!(cleanup_old_sessions(tmp.path(), Duration::ZERO).unwrap(), 2);
        assert!(list_sessions(tmp.path()).unwrap().is_empty());
    }
}
