//! X11 desktop driven through external tools.
//!
//! - `xdotool` for keyboard and pointer injection and geometry queries
//! - ImageMagick `import -window root` for captures
//!
//! Both must be on `PATH` and `DISPLAY` must point at a running server.

use image::RgbImage;
use std::process::{Command, Output};
use tracing::debug;

use super::{Desktop, KeyboardInput, PointerOp};
use crate::error::{ReplayError, ReplayResult};
use crate::imaging;

/// Desktop backed by `xdotool` and `import`
#[derive(Debug)]
pub struct XdoDesktop {
    width: u32,
    height: u32,
}

impl XdoDesktop {
    /// Connect to the current X display and read its geometry
    pub fn connect() -> ReplayResult<Self> {
        let output = run("xdotool", &["getdisplaygeometry"])?;
        let (width, height) = parse_geometry(&String::from_utf8_lossy(&output.stdout))
            .ok_or_else(|| {
                ReplayError::InjectionFailed("xdotool returned no display geometry".to_string())
            })?;
        debug!(width, height, "connected to X display");
        Ok(Self { width, height })
    }
}

fn run(program: &str, args: &[&str]) -> ReplayResult<Output> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| ReplayError::InjectionFailed(format!("failed to run {}: {}", program, e)))?;
    if !output.status.success() {
        return Err(ReplayError::InjectionFailed(format!(
            "{} {} failed: {}",
            program,
            args.first().unwrap_or(&""),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(output)
}

/// Parse `getdisplaygeometry` output ("1920 1080")
fn parse_geometry(text: &str) -> Option<(u32, u32)> {
    let mut parts = text.split_whitespace();
    let width = parts.next()?.parse().ok()?;
    let height = parts.next()?.parse().ok()?;
    Some((width, height))
}

/// Parse `getmouselocation --shell` output
fn parse_mouse_location(text: &str) -> Option<(u32, u32)> {
    let mut x = None;
    let mut y = None;
    for line in text.lines() {
        if let Some(v) = line.strip_prefix("X=") {
            x = v.trim().parse().ok();
        } else if let Some(v) = line.strip_prefix("Y=") {
            y = v.trim().parse().ok();
        }
    }
    Some((x?, y?))
}

/// xdotool arguments for one pointer operation
fn pointer_args(op: PointerOp) -> Vec<String> {
    match op {
        PointerOp::MoveTo { x, y } => vec!["mousemove".into(), x.to_string(), y.to_string()],
        PointerOp::Click(button) => vec!["click".into(), button.number().to_string()],
        PointerOp::DoubleClick(button) => vec![
            "click".into(),
            "--repeat".into(),
            "2".into(),
            button.number().to_string(),
        ],
        PointerOp::Press(button) => vec!["mousedown".into(), button.number().to_string()],
        PointerOp::Release(button) => vec!["mouseup".into(), button.number().to_string()],
    }
}

/// xdotool arguments for one keyboard injection
fn keyboard_args(input: &KeyboardInput) -> Vec<String> {
    match input {
        KeyboardInput::Combo(combo) => {
            let keysyms: Vec<&str> = combo.keys().iter().map(|k| keysym(k)).collect();
            vec!["key".into(), "--".into(), keysyms.join("+")]
        }
        KeyboardInput::Text { text, char_delay } => vec![
            "type".into(),
            "--delay".into(),
            char_delay.as_millis().to_string(),
            "--".into(),
            text.clone(),
        ],
    }
}

/// Map a normalized key name to an X keysym
fn keysym(key: &str) -> &str {
    match key {
        "enter" => "Return",
        "esc" => "Escape",
        "tab" => "Tab",
        "space" => "space",
        "backspace" => "BackSpace",
        "delete" => "Delete",
        "insert" => "Insert",
        "home" => "Home",
        "end" => "End",
        "pageup" => "Prior",
        "pagedown" => "Next",
        "up" => "Up",
        "down" => "Down",
        "left" => "Left",
        "right" => "Right",
        "plus" => "plus",
        "minus" => "minus",
        other => other,
    }
}

impl Desktop for XdoDesktop {
    fn display_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn capture(&mut self) -> ReplayResult<RgbImage> {
        let output = run("import", &["-window", "root", "png:-"])?;
        imaging::decode_rgb(&output.stdout)
            .map_err(|e| ReplayError::InjectionFailed(format!("unreadable capture: {}", e)))
    }

    fn keyboard(&mut self, input: &KeyboardInput) -> ReplayResult<()> {
        let args = keyboard_args(input);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        run("xdotool", &args)?;
        Ok(())
    }

    fn pointer(&mut self, op: PointerOp) -> ReplayResult<()> {
        let args = pointer_args(op);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        run("xdotool", &args)?;
        Ok(())
    }

    fn cursor_position(&mut self) -> ReplayResult<(u32, u32)> {
        let output = run("xdotool", &["getmouselocation", "--shell"])?;
        parse_mouse_location(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
            ReplayError::InjectionFailed("xdotool returned no mouse location".to_string())
        })
    }

    fn kind(&self) -> &str {
        "xdotool"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desktop::{KeyCombo, MouseButton};
    use std::time::Duration;

    #[test]
    fn test_parse_geometry() {
        assert_eq!(parse_geometry("1920 1080\n"), Some((1920, 1080)));
        assert_eq!(parse_geometry(""), None);
    }

    #[test]
    fn test_parse_mouse_location() {
        let text = "X=812\nY=433\nSCREEN=0\nWINDOW=62914567\n";
        assert_eq!(parse_mouse_location(text), Some((812, 433)));
        assert_eq!(parse_mouse_location("SCREEN=0\n"), None);
    }

    #[test]
    fn test_keyboard_args() {
        let combo = KeyboardInput::Combo(KeyCombo::parse("ctrl+Return").unwrap());
        assert_eq!(keyboard_args(&combo), vec!["key", "--", "ctrl+Return"]);

        let text = KeyboardInput::Text {
            text: "-hello".to_string(),
            char_delay: Duration::from_millis(12),
        };
        assert_eq!(keyboard_args(&text), vec!["type", "--delay", "12", "--", "-hello"]);
    }

    #[test]
    fn test_pointer_args() {
        assert_eq!(
            pointer_args(PointerOp::MoveTo { x: 10, y: 20 }),
            vec!["mousemove", "10", "20"]
        );
        assert_eq!(
            pointer_args(PointerOp::DoubleClick(MouseButton::Left)),
            vec!["click", "--repeat", "2", "1"]
        );
        assert_eq!(pointer_args(PointerOp::Release(MouseButton::Right)), vec!["mouseup", "3"]);
    }
}
