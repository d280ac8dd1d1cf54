//! Instruction synthesis: sampled frames in, ordered steps out.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::action::find_balanced;
use crate::config;
use crate::error::{ReplayError, ReplayResult};
use crate::frames::{Frame, Region};
use crate::model::{InferenceRequest, ModelCapability, prompts};

/// Optional structured hints attached to a step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepHints {
    /// Screen area the step is expected to affect, in screenshot pixels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_region: Option<Region>,
    /// What the screen should show once the step is done
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_outcome: Option<String>,
}

impl StepHints {
    pub fn is_empty(&self) -> bool {
        self.expected_region.is_none() && self.expected_outcome.is_none()
    }
}

/// One natural-language instruction, 1-indexed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub index: usize,
    pub text: String,
    #[serde(default, skip_serializing_if = "StepHints::is_empty")]
    pub hints: StepHints,
}

impl Step {
    pub fn new(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
            hints: StepHints::default(),
        }
    }

    pub fn expecting(mut self, outcome: impl Into<String>) -> Self {
        self.hints.expected_outcome = Some(outcome.into());
        self
    }

    pub fn in_region(mut self, region: Region) -> Self {
        self.hints.expected_region = Some(region);
        self
    }
}

/// Synthesizer settings
#[derive(Debug, Clone)]
pub struct SynthesisConfig {
    /// Frames wider than this are downscaled before upload
    pub max_image_width: u32,
    /// Delimiter the model may put between steps
    pub separator: Option<String>,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            max_image_width: config::get().playback.screenshot_max_width,
            separator: None,
        }
    }
}

impl SynthesisConfig {
    pub fn separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = Some(separator.into());
        self
    }

    pub fn max_image_width(mut self, width: u32) -> Self {
        self.max_image_width = width;
        self
    }
}

/// Turns sampled frames into an ordered list of [`Step`]s
pub struct InstructionSynthesizer<M> {
    model: M,
    config: SynthesisConfig,
}

impl<M: ModelCapability> InstructionSynthesizer<M> {
    pub fn new(model: M) -> Self {
        Self::with_config(model, SynthesisConfig::default())
    }

    pub fn with_config(model: M, config: SynthesisConfig) -> Self {
        Self { model, config }
    }

    /// Ask the model for the workflow shown in `frames`.
    ///
    /// `context` is free text from the user (what the recording is about).
    pub fn synthesize(&self, frames: &[Frame], context: Option<&str>) -> ReplayResult<Vec<Step>> {
        if frames.is_empty() {
            return Err(ReplayError::EmptyWorkflow);
        }
        let request = self.build_request(frames, context)?;
        debug!(frames = frames.len(), model = self.model.name(), "synthesizing steps");

        let response = self
            .model
            .infer(&request)
            .map_err(|e| ReplayError::SynthesisUnavailable(e.to_string()))?;

        let steps = parse_steps(&response, self.config.separator.as_deref());
        if steps.is_empty() {
            return Err(ReplayError::EmptyWorkflow);
        }
        info!(steps = steps.len(), "synthesized workflow");
        Ok(steps)
    }

    fn build_request(&self, frames: &[Frame], context: Option<&str>) -> ReplayResult<InferenceRequest> {
        let mut request = InferenceRequest::new().system(prompts::SYNTHESIS_SYSTEM);
        for (i, frame) in frames.iter().enumerate() {
            request = request
                .text(format!("Frame {} ({})", i + 1, frame.label()))
                .image(frame.to_png(self.config.max_image_width)?);
        }
        Ok(request.text(prompts::synthesis_prompt(frames.len(), context)))
    }
}

/// Parse a model answer into steps.
///
/// Accepts a JSON array (of strings or `{"text", "expected_region",
/// "expected_outcome"}` objects) anywhere in the answer, fenced or bare,
/// text split on `separator`, or a numbered list. Steps are renumbered
/// from 1.
pub fn parse_steps(response: &str, separator: Option<&str>) -> Vec<Step> {
    let body = strip_code_fence(response.trim());

    let parsed = match json_candidate(response) {
        Some(json) => parse_json_steps(json).unwrap_or_else(|e| {
            warn!(error = %e, "step list is not valid JSON, reading it as text");
            parse_text_steps(body, separator)
        }),
        None => parse_text_steps(body, separator),
    };

    parsed
        .into_iter()
        .filter(|step| !step.text.is_empty())
        .enumerate()
        .map(|(i, step)| Step {
            index: i + 1,
            ..step
        })
        .collect()
}

fn parse_text_steps(body: &str, separator: Option<&str>) -> Vec<Step> {
    match separator.filter(|s| !s.is_empty() && body.contains(*s)) {
        Some(sep) => body.split(sep).filter_map(parse_block).collect(),
        None => parse_numbered_list(body),
    }
}

/// The part of `response` that should hold a JSON step array: a fenced
/// block that opens with `[`, else the first balanced array of strings or
/// objects, else a body that opens with `[` but never closes.
fn json_candidate(response: &str) -> Option<&str> {
    if let Some(block) = fenced_block(response).filter(|b| b.starts_with('[')) {
        return Some(block);
    }
    if let Some((start, end)) = find_balanced(response, '[', ']') {
        let inner = response[start + 1..end].trim_start();
        if inner.starts_with(['"', '{', ']']) {
            return Some(&response[start..end]);
        }
    }
    let trimmed = response.trim();
    trimmed.starts_with('[').then_some(trimmed)
}

/// Contents of the first ```` ``` ```` block in `text`, without its info string
fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let rest = &text[open + 3..];
    let (_, body) = rest.split_once('\n')?;
    let close = body.find("```").unwrap_or(body.len());
    Some(body[..close].trim())
}

#[derive(Debug, Default)]
struct Draft {
    text: String,
    hints: StepHints,
}

impl Draft {
    fn push_line(&mut self, line: &str) {
        if let Some(outcome) = strip_expected(line) {
            if !outcome.is_empty() {
                self.hints.expected_outcome = Some(outcome.to_string());
            }
            return;
        }
        if !self.text.is_empty() {
            self.text.push(' ');
        }
        self.text.push_str(line);
    }

    fn into_step(self) -> Step {
        Step {
            index: 0,
            text: self.text,
            hints: self.hints,
        }
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string ("json", "text", ...)
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// `"1. Open"`, `"2) Click"`, `"- Save"` -> the text after the marker
fn strip_list_marker(line: &str) -> Option<&str> {
    let line = line.trim_start();
    if let Some(rest) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) {
        return Some(rest.trim());
    }
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let rest = &line[digits..];
    rest.strip_prefix('.')
        .or_else(|| rest.strip_prefix(')'))
        .filter(|r| r.is_empty() || r.starts_with(char::is_whitespace))
        .map(str::trim)
}

fn strip_expected(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    let prefix = trimmed.get(..9)?;
    if prefix.eq_ignore_ascii_case("expected:") {
        Some(trimmed[9..].trim())
    } else {
        None
    }
}

fn parse_numbered_list(body: &str) -> Vec<Step> {
    let mut drafts: Vec<Draft> = Vec::new();
    for line in body.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if let Some(text) = strip_list_marker(line) {
            let mut draft = Draft::default();
            draft.push_line(text);
            drafts.push(draft);
            continue;
        }
        let indented = line.starts_with(char::is_whitespace);
        if let Some(current) = drafts.last_mut() {
            if indented || strip_expected(line).is_some() {
                current.push_line(line.trim());
            }
        }
    }
    drafts.into_iter().map(Draft::into_step).collect()
}

fn parse_block(block: &str) -> Option<Step> {
    let mut draft = Draft::default();
    for line in block.lines().map(str::trim).filter(|l| !l.is_empty()) {
        draft.push_line(strip_list_marker(line).unwrap_or(line));
    }
    (!draft.text.is_empty()).then(|| draft.into_step())
}

fn parse_json_steps(body: &str) -> Result<Vec<Step>, serde_json::Error> {
    let items: Vec<Value> = serde_json::from_str(body)?;
    let steps = items
        .iter()
        .filter_map(|item| match item {
            Value::String(text) => Some(Step::new(0, text.trim())),
            Value::Object(object) => {
                let text = object.get("text")?.as_str()?.trim();
                let mut step = Step::new(0, text);
                step.hints.expected_outcome = object
                    .get("expected_outcome")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                step.hints.expected_region = object.get("expected_region").and_then(parse_region);
                Some(step)
            }
            _ => None,
        })
        .collect();
    Ok(steps)
}

fn parse_region(value: &Value) -> Option<Region> {
    let parts: Vec<u32> = value
        .as_array()?
        .iter()
        .map(|v| v.as_u64().and_then(|n| u32::try_from(n).ok()))
        .collect::<Option<_>>()?;
    match parts.as_slice() {
        [x, y, w, h] if *w > 0 && *h > 0 => Some(Region::new(*x, *y, *w, *h)),
        _ => None,
    }
}

/// Write steps as pretty JSON
pub fn save_steps(path: &Path, steps: &[Step]) -> ReplayResult<()> {
    fs::write(path, serde_json::to_string_pretty(steps)?)?;
    Ok(())
}

/// Read steps written by [`save_steps`] (or by hand); renumbered from 1.
pub fn load_steps(path: &Path) -> ReplayResult<Vec<Step>> {
    let content = fs::read_to_string(path)?;
    let mut steps: Vec<Step> = serde_json::from_str(&content)?;
    if steps.is_empty() {
        return Err(ReplayError::EmptyWorkflow);
    }
    for (i, step) in steps.iter_mut().enumerate() {
        step.index = i + 1;
    }
    Ok(steps)
}
