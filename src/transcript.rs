//! Append-only record of a playback run.
//!
//! Every planner invocation produces exactly one [`TranscriptEntry`]. A
//! transcript can live in memory only or be backed by a JSON Lines file:
//! the first line is a [`TranscriptHeader`], each following line one entry,
//! flushed as it is appended. Screenshots referenced by entries are stored
//! as PNG files next to the transcript.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::action::Action;
use crate::error::{ErrorKind, ReplayError, ReplayResult};
use crate::executor::{ResultSummary, Screenshot};

/// Transcript file name inside a session directory
pub const TRANSCRIPT_FILE: &str = "transcript.jsonl";

/// Outcome of one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// The verifier confirmed the step
    Complete,
    /// The verifier said the step is not done yet
    Incomplete,
    /// Planning, execution or verification failed; see `error`
    Error,
    /// The run was cancelled during this cycle
    Aborted,
}

/// First line of a transcript file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptHeader {
    pub run_id: String,
    pub host: String,
    pub started_at: DateTime<Utc>,
}

impl TranscriptHeader {
    pub fn new(run_id: impl Into<String>) -> Self {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            run_id: run_id.into(),
            host,
            started_at: Utc::now(),
        }
    }
}

/// One planner invocation and everything that followed from it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// 1-based step index
    pub step_index: usize,
    /// Attempts made for this step before this one
    pub retry: u32,
    /// The planned action, if planning produced one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    /// Execution outcome, if the action was executed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultSummary>,
    /// PNG file (or in-memory label) of the screenshot the verdict is based on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    /// Error message or raw planner output worth keeping
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TranscriptEntry {
    pub fn new(step_index: usize, retry: u32, verdict: Verdict) -> Self {
        Self {
            step_index,
            retry,
            action: None,
            result: None,
            screenshot: None,
            verdict,
            error: None,
            detail: None,
            timestamp: Utc::now(),
        }
    }

    /// Record a failure: sets the verdict to `Error` (or `Aborted`)
    pub fn with_error(mut self, error: &ReplayError) -> Self {
        self.verdict = if matches!(error, ReplayError::Aborted) {
            Verdict::Aborted
        } else {
            Verdict::Error
        };
        self.error = Some(error.kind());
        self.detail = Some(error.to_string());
        self
    }

    /// One-line description for planner history
    pub fn describe(&self) -> String {
        let action = self
            .action
            .as_ref()
            .map(|a| a.to_string())
            .unwrap_or_else(|| "(no action)".to_string());
        let outcome = match (self.verdict, self.error) {
            (Verdict::Complete, _) => "step complete".to_string(),
            (Verdict::Incomplete, _) => "step not complete yet".to_string(),
            (Verdict::Aborted, _) => "aborted".to_string(),
            (Verdict::Error, Some(kind)) => format!("failed ({})", kind),
            (Verdict::Error, None) => "failed".to_string(),
        };
        let output = self
            .result
            .as_ref()
            .and_then(|r| r.output.as_deref())
            .map(|o| format!(" -> {}", o))
            .unwrap_or_default();
        format!("step {}: {}{} - {}", self.step_index, action, output, outcome)
    }
}

/// Contents of a transcript file
#[derive(Debug, Clone)]
pub struct LoadedTranscript {
    pub header: TranscriptHeader,
    pub entries: Vec<TranscriptEntry>,
}

/// Ordered, append-only list of entries
#[derive(Debug)]
pub struct Transcript {
    header: TranscriptHeader,
    entries: Vec<TranscriptEntry>,
    writer: Option<BufWriter<File>>,
    dir: Option<PathBuf>,
}

impl Transcript {
    /// Transcript kept in memory only
    pub fn in_memory(run_id: impl Into<String>) -> Self {
        Self {
            header: TranscriptHeader::new(run_id),
            entries: Vec::new(),
            writer: None,
            dir: None,
        }
    }

    /// Transcript persisted as `transcript.jsonl` in `dir`, with screenshots
    /// stored alongside.
    pub fn create(dir: &Path, run_id: impl Into<String>) -> ReplayResult<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(TRANSCRIPT_FILE);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        let mut transcript = Self {
            header: TranscriptHeader::new(run_id),
            entries: Vec::new(),
            writer: Some(BufWriter::new(file)),
            dir: Some(dir.to_path_buf()),
        };
        let header = serde_json::to_string(&transcript.header)?;
        transcript.write_line(&header)?;
        debug!(path = %path.display(), "created transcript");
        Ok(transcript)
    }

    pub fn header(&self) -> &TranscriptHeader {
        &self.header
    }

    /// Directory holding the transcript file, if persisted
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    fn write_line(&mut self, line: &str) -> ReplayResult<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        Ok(())
    }

    /// Append an entry (written and flushed immediately when persisted)
    pub fn append(&mut self, entry: TranscriptEntry) -> ReplayResult<()> {
        if self.writer.is_some() {
            let line = serde_json::to_string(&entry)?;
            self.write_line(&line)?;
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Store a screenshot and return the reference to put in an entry
    pub fn store_screenshot(
        &self,
        step_index: usize,
        cycle: u32,
        screenshot: &Screenshot,
    ) -> ReplayResult<String> {
        let name = format!("step{:02}_cycle{:02}.png", step_index, cycle);
        match &self.dir {
            Some(dir) => {
                fs::write(dir.join(&name), screenshot.to_png()?)?;
                Ok(name)
            }
            None => Ok(format!("memory:{}", name)),
        }
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&TranscriptEntry> {
        self.entries.last()
    }

    /// The last `n` entries, oldest first
    pub fn recent(&self, n: usize) -> &[TranscriptEntry] {
        let start = self.entries.len().saturating_sub(n);
        &self.entries[start..]
    }

    /// Entries recorded for one step
    pub fn for_step(&self, step_index: usize) -> impl Iterator<Item = &TranscriptEntry> {
        self.entries.iter().filter(move |e| e.step_index == step_index)
    }

    pub fn into_entries(self) -> Vec<TranscriptEntry> {
        self.entries
    }

    /// Read a transcript file back, entries in order
    pub fn load(path: &Path) -> ReplayResult<LoadedTranscript> {
        let reader = BufReader::new(File::open(path)?);
        let mut lines = reader.lines().filter(|l| !matches!(l, Ok(s) if s.trim().is_empty()));

        let header_line = lines.next().ok_or_else(|| {
            ReplayError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("{} is empty", path.display()),
            ))
        })??;
        let header: TranscriptHeader = serde_json::from_str(&header_line)?;

        let mut entries = Vec::new();
        for line in lines {
            entries.push(serde_json::from_str(&line?)?);
        }
        Ok(LoadedTranscript { header, entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Coordinate;
    use image::RgbImage;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn entry(step: usize, retry: u32, verdict: Verdict) -> TranscriptEntry {
        let mut entry = TranscriptEntry::new(step, retry, verdict);
        entry.action = Some(Action::MouseMove {
            coordinate: Coordinate::new(3, 4),
        });
        entry
    }

    #[test]
    fn test_persisted_transcript_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut transcript = Transcript::create(dir.path(), "run-1").unwrap();
        transcript.append(entry(1, 0, Verdict::Incomplete)).unwrap();
        transcript
            .append(entry(1, 1, Verdict::Error).with_error(&ReplayError::MalformedAction("x".into())))
            .unwrap();
        transcript.append(entry(2, 0, Verdict::Complete)).unwrap();

        // Readable while the writer is still open
        let loaded = Transcript::load(&dir.path().join(TRANSCRIPT_FILE)).unwrap();
        assert_eq!(loaded.header.run_id, "run-1");
        assert_eq!(loaded.entries, transcript.entries().to_vec());
        assert_eq!(loaded.entries[1].error, Some(ErrorKind::MalformedAction));
    }

    #[test]
    fn test_recent_and_for_step() {
        let mut transcript = Transcript::in_memory("run-2");
        for i in 0..5 {
            transcript.append(entry(1 + i / 3, i as u32, Verdict::Incomplete)).unwrap();
        }
        assert_eq!(transcript.len(), 5);
        assert_eq!(transcript.recent(2).len(), 2);
        assert_eq!(transcript.recent(2)[0].retry, 3);
        assert_eq!(transcript.recent(10).len(), 5);
        assert_eq!(transcript.for_step(1).count(), 3);
        assert_eq!(transcript.for_step(2).count(), 2);
    }

    #[test]
    fn test_screenshot_references() {
        let screenshot = Screenshot {
            image: Arc::new(RgbImage::new(8, 8)),
            display_size: (8, 8),
            captured_at: Utc::now(),
        };

        let memory = Transcript::in_memory("run-3");
        assert_eq!(
            memory.store_screenshot(2, 3, &screenshot).unwrap(),
            "memory:step02_cycle03.png"
        );

        let dir = TempDir::new().unwrap();
        let persisted = Transcript::create(dir.path(), "run-4").unwrap();
        let name = persisted.store_screenshot(1, 1, &screenshot).unwrap();
        assert!(dir.path().join(name).exists());
    }

    #[test]
    fn test_describe() {
        let mut e = entry(1, 0, Verdict::Incomplete);
        assert_eq!(e.describe(), "step 1: mouse_move [3, 4] - step not complete yet");
        e = e.with_error(&ReplayError::InjectionFailed("xdotool".into()));
        assert_eq!(e.describe(), "step 1: mouse_move [3, 4] - failed (InjectionFailed)");
    }
}
