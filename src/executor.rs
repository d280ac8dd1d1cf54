//! Action execution: one validated [`Action`] in, one injection (plus a
//! confirmation capture) out.
//!
//! The planner sees screenshots that may be downscaled from the display.
//! Coordinates in actions are screenshot pixels; they are clamped to the
//! screenshot bounds and then scaled to display pixels per axis.

use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::debug;

use crate::action::{Action, Coordinate};
use crate::config;
use crate::desktop::{Desktop, KeyCombo, KeyboardInput, MouseButton, PointerOp};
use crate::error::{ReplayError, ReplayResult};
use crate::imaging;

/// A capture of the screen as shown to the model
#[derive(Debug, Clone)]
pub struct Screenshot {
    /// Possibly downscaled pixels
    pub image: Arc<RgbImage>,
    /// Display resolution the capture was taken at
    pub display_size: (u32, u32),
    pub captured_at: DateTime<Utc>,
}

impl Screenshot {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn to_png(&self) -> ReplayResult<Vec<u8>> {
        imaging::encode_png(&self.image)
    }
}

/// What an action produced
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    /// Screen state after the action
    Screenshot(Screenshot),
    /// Text answer (cursor position, failures)
    Acknowledged(String),
}

/// Result of executing one action
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub outcome: ExecutionOutcome,
    pub success: bool,
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn screenshot(screenshot: Screenshot) -> Self {
        Self {
            outcome: ExecutionOutcome::Screenshot(screenshot),
            success: true,
            error: None,
        }
    }

    pub fn acknowledged(text: impl Into<String>) -> Self {
        Self {
            outcome: ExecutionOutcome::Acknowledged(text.into()),
            success: true,
            error: None,
        }
    }

    /// Record of an action that could not be executed
    pub fn failure(error: &ReplayError) -> Self {
        Self {
            outcome: ExecutionOutcome::Acknowledged(String::new()),
            success: false,
            error: Some(error.to_string()),
        }
    }

    pub fn screenshot_ref(&self) -> Option<&Screenshot> {
        match &self.outcome {
            ExecutionOutcome::Screenshot(s) => Some(s),
            ExecutionOutcome::Acknowledged(_) => None,
        }
    }

    pub fn summary(&self) -> ResultSummary {
        ResultSummary {
            success: self.success,
            output: match &self.outcome {
                ExecutionOutcome::Acknowledged(text) if !text.is_empty() => Some(text.clone()),
                _ => None,
            },
            error: self.error.clone(),
        }
    }
}

/// Serializable part of an [`ExecutionResult`] (pixels are stored separately)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Mapping between screenshot and display pixel spaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenGeometry {
    pub display: (u32, u32),
    pub screenshot: (u32, u32),
}

impl ScreenGeometry {
    pub fn new(display: (u32, u32), max_width: u32) -> Self {
        Self {
            display,
            screenshot: imaging::fitted_size(display.0, display.1, max_width),
        }
    }

    /// Clamp to the screenshot bounds
    pub fn clamp(&self, c: Coordinate) -> Coordinate {
        Coordinate::new(
            c.x.min(self.screenshot.0.saturating_sub(1)),
            c.y.min(self.screenshot.1.saturating_sub(1)),
        )
    }

    /// Screenshot pixel (clamped) to display pixel
    pub fn to_display(&self, c: Coordinate) -> (u32, u32) {
        let c = self.clamp(c);
        (
            scale(c.x, self.screenshot.0, self.display.0),
            scale(c.y, self.screenshot.1, self.display.1),
        )
    }

    /// Display pixel to screenshot pixel
    pub fn to_screenshot(&self, x: u32, y: u32) -> Coordinate {
        Coordinate::new(
            scale(x, self.display.0, self.screenshot.0),
            scale(y, self.display.1, self.screenshot.1),
        )
    }
}

fn scale(value: u32, from: u32, to: u32) -> u32 {
    if from == 0 || to == 0 {
        return 0;
    }
    let scaled = (value as f64 * to as f64 / from as f64).round() as u32;
    scaled.min(to - 1)
}

/// Executor settings
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Screenshots wider than this are downscaled
    pub screenshot_max_width: u32,
    /// Wait after an input before the confirmation capture
    pub settle: Duration,
    /// Pause between typed characters
    pub typing_delay: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        let cfg = &config::get().playback;
        Self {
            screenshot_max_width: cfg.screenshot_max_width,
            settle: Duration::from_millis(cfg.settle_ms),
            typing_delay: Duration::from_millis(cfg.typing_delay_ms),
        }
    }
}

impl ExecutorConfig {
    pub fn settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn typing_delay(mut self, delay: Duration) -> Self {
        self.typing_delay = delay;
        self
    }

    pub fn screenshot_max_width(mut self, width: u32) -> Self {
        self.screenshot_max_width = width;
        self
    }
}

/// Executes actions against the [`Desktop`] it owns
pub struct ActionExecutor<D> {
    desktop: D,
    config: ExecutorConfig,
    geometry: ScreenGeometry,
}

impl<D: Desktop> ActionExecutor<D> {
    pub fn new(desktop: D) -> Self {
        Self::with_config(desktop, ExecutorConfig::default())
    }

    pub fn with_config(desktop: D, config: ExecutorConfig) -> Self {
        let geometry = ScreenGeometry::new(desktop.display_size(), config.screenshot_max_width);
        Self {
            desktop,
            config,
            geometry,
        }
    }

    pub fn geometry(&self) -> ScreenGeometry {
        self.geometry
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn desktop(&self) -> &D {
        &self.desktop
    }

    pub fn into_desktop(self) -> D {
        self.desktop
    }

    /// Capture the screen, downscaled to the configured width
    pub fn capture(&mut self) -> ReplayResult<Screenshot> {
        let raw = self.desktop.capture()?;
        let display = raw.dimensions();
        self.geometry = ScreenGeometry::new(display, self.config.screenshot_max_width);
        let image = imaging::fit_width(&raw, self.config.screenshot_max_width);
        Ok(Screenshot {
            image: Arc::new(image),
            display_size: display,
            captured_at: Utc::now(),
        })
    }

    /// Execute one action.
    ///
    /// Input actions wait for the settle delay and return a confirmation
    /// capture; `screenshot` captures immediately; `cursor_position`
    /// answers with the pointer location in screenshot pixels.
    pub fn execute(&mut self, action: &Action) -> ReplayResult<ExecutionResult> {
        debug!(%action, desktop = self.desktop.kind(), "executing action");
        match action {
            Action::Key { text } => {
                let combo = KeyCombo::parse(text).ok_or_else(|| {
                    ReplayError::MalformedAction(format!("invalid key combo {:?}", text))
                })?;
                self.desktop.keyboard(&KeyboardInput::Combo(combo))?;
            }
            Action::Type { text } => {
                self.desktop.keyboard(&KeyboardInput::Text {
                    text: text.clone(),
                    char_delay: self.config.typing_delay,
                })?;
            }
            Action::MouseMove { coordinate } => {
                let (x, y) = self.geometry.to_display(*coordinate);
                self.desktop.pointer(PointerOp::MoveTo { x, y })?;
            }
            Action::LeftClickDrag { coordinate } => {
                let (x, y) = self.geometry.to_display(*coordinate);
                self.desktop.pointer(PointerOp::Press(MouseButton::Left))?;
                self.desktop.pointer(PointerOp::MoveTo { x, y })?;
                self.desktop.pointer(PointerOp::Release(MouseButton::Left))?;
            }
            Action::LeftClick => self.desktop.pointer(PointerOp::Click(MouseButton::Left))?,
            Action::RightClick => self.desktop.pointer(PointerOp::Click(MouseButton::Right))?,
            Action::MiddleClick => self.desktop.pointer(PointerOp::Click(MouseButton::Middle))?,
            Action::DoubleClick => self.desktop.pointer(PointerOp::DoubleClick(MouseButton::Left))?,
            Action::Screenshot => return Ok(ExecutionResult::screenshot(self.capture()?)),
            Action::CursorPosition => {
                let (x, y) = self.desktop.cursor_position()?;
                let c = self.geometry.to_screenshot(x, y);
                return Ok(ExecutionResult::acknowledged(format!("X={},Y={}", c.x, c.y)));
            }
        }

        if !self.config.settle.is_zero() {
            thread::sleep(self.config.settle);
        }
        Ok(ExecutionResult::screenshot(self.capture()?))
    }
}
