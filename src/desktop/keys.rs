//! Key combo parsing.
//!
//! Planner output uses loose key names (`"Return"`, `"cmd+space"`,
//! `"Control+Shift+t"`). Combos are lower-cased, split on `+` and mapped
//! through an alias table to one canonical name per key.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

static KEY_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("control", "ctrl"),
        ("ctl", "ctrl"),
        ("option", "alt"),
        ("opt", "alt"),
        ("cmd", "super"),
        ("command", "super"),
        ("meta", "super"),
        ("win", "super"),
        ("windows", "super"),
        ("return", "enter"),
        ("escape", "esc"),
        ("spacebar", "space"),
        ("del", "delete"),
        ("pgup", "pageup"),
        ("page_up", "pageup"),
        ("pgdn", "pagedown"),
        ("page_down", "pagedown"),
        ("arrowup", "up"),
        ("arrowdown", "down"),
        ("arrowleft", "left"),
        ("arrowright", "right"),
        ("bksp", "backspace"),
    ])
});

/// Modifier names after normalization
const MODIFIERS: &[&str] = &["ctrl", "alt", "shift", "super"];

/// A normalized key combination, modifiers first in input order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyCombo {
    keys: Vec<String>,
}

impl KeyCombo {
    /// Parse a combo such as `"ctrl+s"`; `None` when no key is named.
    pub fn parse(combo: &str) -> Option<Self> {
        let trimmed = combo.trim();
        // A literal "+" key
        if trimmed == "+" {
            return Some(Self {
                keys: vec!["plus".to_string()],
            });
        }
        let mut keys = Vec::new();
        for part in trimmed.split('+') {
            let name = part.trim().to_lowercase();
            if name.is_empty() {
                return None;
            }
            let canonical = KEY_ALIASES.get(name.as_str()).copied().unwrap_or(name.as_str());
            keys.push(canonical.to_string());
        }
        if keys.is_empty() {
            return None;
        }
        Some(Self { keys })
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn modifiers(&self) -> impl Iterator<Item = &str> {
        self.keys
            .iter()
            .map(String::as_str)
            .filter(|k| MODIFIERS.contains(k))
    }

    /// The non-modifier key, if any (`"ctrl"` alone has none)
    pub fn main_key(&self) -> Option<&str> {
        self.keys
            .iter()
            .map(String::as_str)
            .rev()
            .find(|k| !MODIFIERS.contains(k))
    }
}

impl fmt::Display for KeyCombo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.keys.join("+"))
    }
}
