//! Desktop abstraction: screen capture and input injection.
//!
//! Implementations:
//! - `MockDesktop` - in-memory framebuffer for tests and dry runs
//! - `XdoDesktop` - X11 desktop driven through `xdotool` and `import`
//!
//! Coordinates passed to a [`Desktop`] are in *display* pixels. Mapping from
//! screenshot space is the executor's job.

pub mod framebuffer;
pub mod keys;
pub mod mock;
pub mod xdotool;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ReplayResult;

pub use framebuffer::Framebuffer;
pub use keys::KeyCombo;
pub use mock::{DesktopEvent, MockDesktop, MockDesktopHandle};
pub use xdotool::XdoDesktop;

/// Mouse button
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

impl MouseButton {
    /// X11 button number
    pub fn number(self) -> u8 {
        match self {
            MouseButton::Left => 1,
            MouseButton::Middle => 2,
            MouseButton::Right => 3,
        }
    }
}

/// One keyboard injection
#[derive(Debug, Clone, PartialEq)]
pub enum KeyboardInput {
    /// Press and release a key combination
    Combo(KeyCombo),
    /// Type literal text, pausing `char_delay` between characters
    Text { text: String, char_delay: Duration },
}

/// One pointer injection, in display pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerOp {
    MoveTo { x: u32, y: u32 },
    Click(MouseButton),
    DoubleClick(MouseButton),
    Press(MouseButton),
    Release(MouseButton),
}

/// Screen capture plus keyboard and pointer injection.
///
/// Every method fails with `InjectionFailed` when the underlying OS call
/// fails. A desktop is owned by exactly one executor at a time.
pub trait Desktop: Send {
    /// Display resolution in pixels
    fn display_size(&self) -> (u32, u32);

    /// Capture the full display
    fn capture(&mut self) -> ReplayResult<RgbImage>;

    fn keyboard(&mut self, input: &KeyboardInput) -> ReplayResult<()>;

    fn pointer(&mut self, op: PointerOp) -> ReplayResult<()>;

    /// Current pointer position in display pixels
    fn cursor_position(&mut self) -> ReplayResult<(u32, u32)>;

    /// Short identifier for logs (e.g. "mock", "xdotool")
    fn kind(&self) -> &str;
}

impl<D: Desktop + ?Sized> Desktop for Box<D> {
    fn display_size(&self) -> (u32, u32) {
        (**self).display_size()
    }

    fn capture(&mut self) -> ReplayResult<RgbImage> {
        (**self).capture()
    }

    fn keyboard(&mut self, input: &KeyboardInput) -> ReplayResult<()> {
        (**self).keyboard(input)
    }

    fn pointer(&mut self, op: PointerOp) -> ReplayResult<()> {
        (**self).pointer(op)
    }

    fn cursor_position(&mut self) -> ReplayResult<(u32, u32)> {
        (**self).cursor_position()
    }

    fn kind(&self) -> &str {
        (**self).kind()
    }
}
