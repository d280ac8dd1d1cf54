//! In-memory desktop.
//!
//! Injected input is recorded as [`DesktopEvent`]s and, unless the desktop is
//! frozen, drawn onto the framebuffer so screenshots change the way a real
//! screen would: key combos show up in a status bar, typed text in a
//! document area, clicks as small markers.

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

use super::framebuffer::{Framebuffer, GLYPH_SIZE};
use super::{Desktop, KeyboardInput, MouseButton, PointerOp};
use crate::error::{ReplayError, ReplayResult};

const BACKGROUND: [u8; 3] = [236, 236, 236];
const STATUS_BAR: [u8; 3] = [40, 44, 52];
const STATUS_TEXT: [u8; 3] = [220, 220, 220];
const DOCUMENT_TEXT: [u8; 3] = [20, 20, 20];
const MARKER: [u8; 3] = [220, 40, 40];
const STATUS_HEIGHT: u32 = 24;
const MARKER_SIZE: u32 = 6;
const LINE_HEIGHT: u32 = 12;

/// Input observed by a [`MockDesktop`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DesktopEvent {
    Key { combo: String },
    Type { text: String },
    Move { x: u32, y: u32 },
    Click { button: MouseButton, x: u32, y: u32 },
    DoubleClick { button: MouseButton, x: u32, y: u32 },
    Press { button: MouseButton, x: u32, y: u32 },
    Release { button: MouseButton, x: u32, y: u32 },
}

#[derive(Debug)]
struct MockState {
    frame: Framebuffer,
    cursor: (u32, u32),
    events: Vec<DesktopEvent>,
    document: Vec<String>,
    fail_next: usize,
    fail_captures: usize,
    frozen: bool,
    captures: usize,
}

impl MockState {
    fn record(&mut self, event: DesktopEvent) {
        if !self.frozen {
            self.render(&event);
        }
        self.events.push(event);
    }

    fn render(&mut self, event: &DesktopEvent) {
        match event {
            DesktopEvent::Key { combo } => {
                let width = self.frame.width();
                self.frame.draw_rect(0, 0, width, STATUS_HEIGHT, STATUS_BAR);
                let label = format!("[{}] {}", self.events.len() + 1, combo);
                self.frame.draw_text(8, 8, &label, STATUS_TEXT, STATUS_BAR);
            }
            DesktopEvent::Type { text } => {
                for (i, line) in text.split('\n').enumerate() {
                    if i > 0 || self.document.is_empty() {
                        self.document.push(String::new());
                    }
                    if let Some(last) = self.document.last_mut() {
                        last.push_str(line);
                    }
                }
                self.draw_document();
            }
            DesktopEvent::Click { x, y, .. }
            | DesktopEvent::DoubleClick { x, y, .. }
            | DesktopEvent::Release { x, y, .. } => {
                let half = MARKER_SIZE / 2;
                self.frame.draw_rect(
                    x.saturating_sub(half),
                    y.saturating_sub(half),
                    MARKER_SIZE,
                    MARKER_SIZE,
                    MARKER,
                );
            }
            DesktopEvent::Move { .. } | DesktopEvent::Press { .. } => {}
        }
    }

    fn draw_document(&mut self) {
        let top = STATUS_HEIGHT + 8;
        for (row, line) in self.document.iter().enumerate() {
            let y = top + row as u32 * LINE_HEIGHT;
            if y + GLYPH_SIZE > self.frame.height() {
                break;
            }
            self.frame.draw_text(8, y, line, DOCUMENT_TEXT, BACKGROUND);
        }
    }

    fn check_failure(&mut self) -> ReplayResult<()> {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(ReplayError::InjectionFailed(
                "mock desktop: scripted injection failure".to_string(),
            ));
        }
        Ok(())
    }
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Desktop backed by an in-memory [`Framebuffer`]
#[derive(Debug)]
pub struct MockDesktop {
    state: Arc<Mutex<MockState>>,
}

/// Observer for a [`MockDesktop`] that has been moved into an executor
#[derive(Debug, Clone)]
pub struct MockDesktopHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockDesktop {
    /// Light-grey desktop with a dark status bar
    pub fn new(width: u32, height: u32) -> Self {
        let mut frame = Framebuffer::with_color(width, height, BACKGROUND);
        frame.draw_rect(0, 0, width, STATUS_HEIGHT, STATUS_BAR);
        Self::with_framebuffer(frame)
    }

    pub fn with_framebuffer(frame: Framebuffer) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                frame,
                cursor: (0, 0),
                events: Vec::new(),
                document: Vec::new(),
                fail_next: 0,
                fail_captures: 0,
                frozen: false,
                captures: 0,
            })),
        }
    }

    pub fn handle(&self) -> MockDesktopHandle {
        MockDesktopHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl MockDesktopHandle {
    /// All input received so far, in order
    pub fn events(&self) -> Vec<DesktopEvent> {
        lock(&self.state).events.clone()
    }

    /// Current screen contents
    pub fn screen(&self) -> RgbImage {
        lock(&self.state).frame.image().clone()
    }

    pub fn cursor(&self) -> (u32, u32) {
        lock(&self.state).cursor
    }

    /// Number of captures taken
    pub fn captures(&self) -> usize {
        lock(&self.state).captures
    }

    /// Make the next `count` keyboard/pointer injections fail
    pub fn fail_next(&self, count: usize) {
        lock(&self.state).fail_next = count;
    }

    /// Make the next `count` captures fail
    pub fn fail_captures(&self, count: usize) {
        lock(&self.state).fail_captures = count;
    }

    /// When frozen, input is recorded but the screen never changes
    pub fn set_frozen(&self, frozen: bool) {
        lock(&self.state).frozen = frozen;
    }

    /// Draw directly on the screen
    pub fn draw(&self, f: impl FnOnce(&mut Framebuffer)) {
        f(&mut lock(&self.state).frame);
    }
}

impl Desktop for MockDesktop {
    fn display_size(&self) -> (u32, u32) {
        let state = lock(&self.state);
        (state.frame.width(), state.frame.height())
    }

    fn capture(&mut self) -> ReplayResult<RgbImage> {
        let mut state = lock(&self.state);
        if state.fail_captures > 0 {
            state.fail_captures -= 1;
            return Err(ReplayError::InjectionFailed(
                "mock desktop: scripted capture failure".to_string(),
            ));
        }
        state.captures += 1;
        Ok(state.frame.image().clone())
    }

    fn keyboard(&mut self, input: &KeyboardInput) -> ReplayResult<()> {
        let event = match input {
            KeyboardInput::Combo(combo) => DesktopEvent::Key {
                combo: combo.to_string(),
            },
            KeyboardInput::Text { text, .. } => DesktopEvent::Type { text: text.clone() },
        };
        let mut state = lock(&self.state);
        state.check_failure()?;
        state.record(event);
        Ok(())
    }

    fn pointer(&mut self, op: PointerOp) -> ReplayResult<()> {
        let mut state = lock(&self.state);
        state.check_failure()?;
        let (cx, cy) = state.cursor;
        let event = match op {
            PointerOp::MoveTo { x, y } => {
                let x = x.min(state.frame.width().saturating_sub(1));
                let y = y.min(state.frame.height().saturating_sub(1));
                state.cursor = (x, y);
                DesktopEvent::Move { x, y }
            }
            PointerOp::Click(button) => DesktopEvent::Click { button, x: cx, y: cy },
            PointerOp::DoubleClick(button) => DesktopEvent::DoubleClick { button, x: cx, y: cy },
            PointerOp::Press(button) => DesktopEvent::Press { button, x: cx, y: cy },
            PointerOp::Release(button) => DesktopEvent::Release { button, x: cx, y: cy },
        };
        state.record(event);
        Ok(())
    }

    fn cursor_position(&mut self) -> ReplayResult<(u32, u32)> {
        Ok(lock(&self.state).cursor)
    }

    fn kind(&self) -> &str {
        "mock"
    }
}
