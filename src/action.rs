//! The action schema exchanged with the planner.
//!
//! Wire form is a JSON object with an `action` tag plus exactly the fields
//! that action needs:
//!
//! | action | fields |
//! |--------|--------|
//! | `key`, `type` | `text` |
//! | `mouse_move`, `left_click_drag` | `coordinate: [x, y]` |
//! | everything else | none |
//!
//! Any other field combination (extra keys, `null`s, negative or
//! fractional coordinates) is rejected as `MalformedAction`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::desktop::KeyCombo;
use crate::error::{ReplayError, ReplayResult};

/// Pixel position in screenshot space, origin top-left
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: u32,
    pub y: u32,
}

impl Coordinate {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.x, self.y)
    }
}

/// The ten action tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Key,
    Type,
    MouseMove,
    LeftClick,
    LeftClickDrag,
    RightClick,
    MiddleClick,
    DoubleClick,
    Screenshot,
    CursorPosition,
}

impl ActionKind {
    pub const ALL: [ActionKind; 10] = [
        ActionKind::Key,
        ActionKind::Type,
        ActionKind::MouseMove,
        ActionKind::LeftClick,
        ActionKind::LeftClickDrag,
        ActionKind::RightClick,
        ActionKind::MiddleClick,
        ActionKind::DoubleClick,
        ActionKind::Screenshot,
        ActionKind::CursorPosition,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Key => "key",
            ActionKind::Type => "type",
            ActionKind::MouseMove => "mouse_move",
            ActionKind::LeftClick => "left_click",
            ActionKind::LeftClickDrag => "left_click_drag",
            ActionKind::RightClick => "right_click",
            ActionKind::MiddleClick => "middle_click",
            ActionKind::DoubleClick => "double_click",
            ActionKind::Screenshot => "screenshot",
            ActionKind::CursorPosition => "cursor_position",
        }
    }

    pub fn needs_text(self) -> bool {
        matches!(self, ActionKind::Key | ActionKind::Type)
    }

    pub fn needs_coordinate(self) -> bool {
        matches!(self, ActionKind::MouseMove | ActionKind::LeftClickDrag)
    }

    /// Whether the action changes desktop state
    pub fn mutates(self) -> bool {
        !matches!(self, ActionKind::Screenshot | ActionKind::CursorPosition)
    }
}

impl FromStr for ActionKind {
    type Err = ReplayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ReplayError::MalformedAction(format!("unknown action {:?}", s)))
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One concrete input action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum Action {
    Key { text: String },
    Type { text: String },
    MouseMove { coordinate: Coordinate },
    LeftClick,
    LeftClickDrag { coordinate: Coordinate },
    RightClick,
    MiddleClick,
    DoubleClick,
    Screenshot,
    CursorPosition,
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Key { .. } => ActionKind::Key,
            Action::Type { .. } => ActionKind::Type,
            Action::MouseMove { .. } => ActionKind::MouseMove,
            Action::LeftClick => ActionKind::LeftClick,
            Action::LeftClickDrag { .. } => ActionKind::LeftClickDrag,
            Action::RightClick => ActionKind::RightClick,
            Action::MiddleClick => ActionKind::MiddleClick,
            Action::DoubleClick => ActionKind::DoubleClick,
            Action::Screenshot => ActionKind::Screenshot,
            Action::CursorPosition => ActionKind::CursorPosition,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Action::Key { text } | Action::Type { text } => Some(text),
            _ => None,
        }
    }

    pub fn coordinate(&self) -> Option<Coordinate> {
        match self {
            Action::MouseMove { coordinate } | Action::LeftClickDrag { coordinate } => {
                Some(*coordinate)
            }
            _ => None,
        }
    }

    /// Parse a planner answer: exactly one JSON object in `response`, which
    /// may be surrounded by prose or a code fence. An array of actions or a
    /// second object after the first is rejected.
    pub fn parse_response(response: &str) -> ReplayResult<Action> {
        let (start, end) = find_balanced(response, '{', '}').ok_or_else(|| {
            ReplayError::MalformedAction(format!("no JSON object in {:?}", preview(response)))
        })?;
        if response[..start].trim_end().ends_with('[') {
            return Err(malformed("expected one action, got an array"));
        }
        if response[end..].contains('{') {
            return Err(malformed(format!(
                "expected one action, got more after {:?}",
                preview(&response[start..end])
            )));
        }
        let value: Value = serde_json::from_str(&response[start..end])
            .map_err(|e| ReplayError::MalformedAction(format!("invalid JSON: {}", e)))?;
        Action::from_value(&value)
    }

    /// Validate a decoded JSON value against the schema
    pub fn from_value(value: &Value) -> ReplayResult<Action> {
        let object = value
            .as_object()
            .ok_or_else(|| malformed("action must be a JSON object"))?;

        for (key, field) in object {
            if !matches!(key.as_str(), "action" | "coordinate" | "text") {
                return Err(malformed(format!("unexpected field {:?}", key)));
            }
            if field.is_null() {
                return Err(malformed(format!("field {:?} is null", key)));
            }
        }

        let tag = object
            .get("action")
            .ok_or_else(|| malformed("missing field \"action\""))?
            .as_str()
            .ok_or_else(|| malformed("\"action\" must be a string"))?;
        let kind: ActionKind = tag.parse()?;

        let text = read_text(object, kind)?;
        let coordinate = read_coordinate(object, kind)?;

        let action = match kind {
            ActionKind::Key => {
                let text = text.unwrap_or_default();
                if KeyCombo::parse(&text).is_none() {
                    return Err(malformed(format!("invalid key combo {:?}", text)));
                }
                Action::Key { text }
            }
            ActionKind::Type => Action::Type {
                text: text.unwrap_or_default(),
            },
            ActionKind::MouseMove => Action::MouseMove {
                coordinate: coordinate.unwrap_or(Coordinate::new(0, 0)),
            },
            ActionKind::LeftClickDrag => Action::LeftClickDrag {
                coordinate: coordinate.unwrap_or(Coordinate::new(0, 0)),
            },
            ActionKind::LeftClick => Action::LeftClick,
            ActionKind::RightClick => Action::RightClick,
            ActionKind::MiddleClick => Action::MiddleClick,
            ActionKind::DoubleClick => Action::DoubleClick,
            ActionKind::Screenshot => Action::Screenshot,
            ActionKind::CursorPosition => Action::CursorPosition,
        };
        Ok(action)
    }

    /// Wire form
    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        object.insert("action".to_string(), Value::from(self.kind().as_str()));
        if let Some(text) = self.text() {
            object.insert("text".to_string(), Value::from(text));
        }
        if let Some(c) = self.coordinate() {
            object.insert("coordinate".to_string(), Value::from(vec![c.x, c.y]));
        }
        Value::Object(object)
    }
}

fn malformed(message: impl Into<String>) -> ReplayError {
    ReplayError::MalformedAction(message.into())
}

fn read_text(object: &Map<String, Value>, kind: ActionKind) -> ReplayResult<Option<String>> {
    match (object.get("text"), kind.needs_text()) {
        (Some(Value::String(text)), true) => Ok(Some(text.clone())),
        (Some(_), true) => Err(malformed("\"text\" must be a string")),
        (None, true) => Err(malformed(format!("{} requires \"text\"", kind))),
        (Some(_), false) => Err(malformed(format!("{} does not take \"text\"", kind))),
        (None, false) => Ok(None),
    }
}

fn read_coordinate(object: &Map<String, Value>, kind: ActionKind) -> ReplayResult<Option<Coordinate>> {
    match (object.get("coordinate"), kind.needs_coordinate()) {
        (Some(value), true) => parse_coordinate(value).map(Some),
        (None, true) => Err(malformed(format!("{} requires \"coordinate\"", kind))),
        (Some(_), false) => Err(malformed(format!("{} does not take \"coordinate\"", kind))),
        (None, false) => Ok(None),
    }
}

fn parse_coordinate(value: &Value) -> ReplayResult<Coordinate> {
    let invalid = || malformed(format!("\"coordinate\" must be [x, y] non-negative integers, got {}", value));
    let pair = value.as_array().filter(|a| a.len() == 2).ok_or_else(invalid)?;
    let x = pair[0].as_u64().and_then(|v| u32::try_from(v).ok()).ok_or_else(invalid)?;
    let y = pair[1].as_u64().and_then(|v| u32::try_from(v).ok()).ok_or_else(invalid)?;
    Ok(Coordinate::new(x, y))
}

impl TryFrom<Value> for Action {
    type Error = ReplayError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Action::from_value(&value)
    }
}

impl From<Action> for Value {
    fn from(action: Action) -> Self {
        action.to_value()
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Key { text } | Action::Type { text } => write!(f, "{} {:?}", self.kind(), text),
            Action::MouseMove { coordinate } | Action::LeftClickDrag { coordinate } => {
                write!(f, "{} {}", self.kind(), coordinate)
            }
            _ => write!(f, "{}", self.kind()),
        }
    }
}

/// Byte range of the first balanced `open`...`close` span in `text`.
/// Delimiters inside JSON strings are ignored.
pub fn find_balanced(text: &str, open: char, close: char) -> Option<(usize, usize)> {
    let start = text.find(open)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    return Some((start, start + offset + ch.len_utf8()));
                }
            }
            _ => {}
        }
    }
    None
}

fn preview(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() > 80 {
        format!("{}...", trimmed.chars().take(80).collect::<String>())
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn parse(value: Value) -> ReplayResult<Action> {
        Action::from_value(&value)
    }

    fn assert_malformed(value: Value) {
        match parse(value.clone()) {
            Err(ReplayError::MalformedAction(_)) => {}
            other => panic!("expected MalformedAction for {}, got {:?}", value, other),
        }
    }

    #[test]
    fn test_all_kinds_validate_and_keep_fields() {
        let cases = vec![
            (json!({"action": "key", "text": "ctrl+s"}), Action::Key { text: "ctrl+s".into() }),
            (json!({"action": "type", "text": "hello"}), Action::Type { text: "hello".into() }),
            (
                json!({"action": "mouse_move", "coordinate": [10, 20]}),
                Action::MouseMove { coordinate: Coordinate::new(10, 20) },
            ),
            (json!({"action": "left_click"}), Action::LeftClick),
            (
                json!({"action": "left_click_drag", "coordinate": [300, 400]}),
                Action::LeftClickDrag { coordinate: Coordinate::new(300, 400) },
            ),
            (json!({"action": "right_click"}), Action::RightClick),
            (json!({"action": "middle_click"}), Action::MiddleClick),
            (json!({"action": "double_click"}), Action::DoubleClick),
            (json!({"action": "screenshot"}), Action::Screenshot),
            (json!({"action": "cursor_position"}), Action::CursorPosition),
        ];
        assert_eq!(cases.len(), ActionKind::ALL.len());

        for (value, expected) in cases {
            let action = parse(value.clone()).unwrap();
            assert_eq!(action, expected);
            assert_eq!(action.to_value(), value);
        }
    }

    #[test]
    fn test_missing_fields_rejected() {
        assert_malformed(json!({"action": "key"}));
        assert_malformed(json!({"action": "type"}));
        assert_malformed(json!({"action": "mouse_move"}));
        assert_malformed(json!({"action": "left_click_drag"}));
        assert_malformed(json!({"text": "hello"}));
    }

    #[test]
    fn test_wrong_field_set_rejected() {
        assert_malformed(json!({"action": "left_click", "coordinate": [1, 2]}));
        assert_malformed(json!({"action": "screenshot", "text": "now"}));
        assert_malformed(json!({"action": "type", "text": "a", "coordinate": [1, 2]}));
        assert_malformed(json!({"action": "key", "text": "a", "modifiers": ["ctrl"]}));
        assert_malformed(json!({"action": "type", "text": null}));
        assert_malformed(json!({"action": "left_click", "text": null}));
    }

    #[test]
    fn test_bad_values_rejected() {
        assert_malformed(json!({"action": "mouse_move", "coordinate": [-1, 5]}));
        assert_malformed(json!({"action": "mouse_move", "coordinate": [1.5, 5]}));
        assert_malformed(json!({"action": "mouse_move", "coordinate": [1, 2, 3]}));
        assert_malformed(json!({"action": "mouse_move", "coordinate": "10,20"}));
        assert_malformed(json!({"action": "type", "text": 42}));
        assert_malformed(json!({"action": "key", "text": ""}));
        assert_malformed(json!({"action": "scroll"}));
        assert_malformed(json!(["left_click"]));
    }

    #[test]
    fn test_parse_response_with_prose_and_fence() {
        let response = "I will open the launcher.\n```json\n{\"action\": \"key\", \"text\": \"cmd+space\"}\n```";
        assert_eq!(
            Action::parse_response(response).unwrap(),
            Action::Key { text: "cmd+space".into() }
        );

        let braces_in_text = r#"{"action": "type", "text": "fn main() { }"} trailing"#;
        assert_eq!(
            Action::parse_response(braces_in_text).unwrap(),
            Action::Type { text: "fn main() { }".into() }
        );
    }

    #[test]
    fn test_parse_response_rejects_several_actions() {
        let array = r#"[{"action":"key","text":"ctrl+s"},{"action":"type","text":"x"}]"#;
        assert!(matches!(
            Action::parse_response(array),
            Err(ReplayError::MalformedAction(_))
        ));

        let fenced_array = "Plan:\n```json\n[\n  {\"action\": \"left_click\"}\n]\n```";
        assert!(matches!(
            Action::parse_response(fenced_array),
            Err(ReplayError::MalformedAction(_))
        ));

        let two = r#"First {"action":"key","text":"ctrl+s"} then {"action":"type","text":"x"}"#;
        assert!(matches!(
            Action::parse_response(two),
            Err(ReplayError::MalformedAction(_))
        ));
    }

    #[test]
    fn test_find_balanced_array() {
        let text = r#"steps: ["a [b]", "c"] done"#;
        let (start, end) = find_balanced(text, '[', ']').unwrap();
        assert_eq!(&text[start..end], r#"["a [b]", "c"]"#);
        assert_eq!(find_balanced("[\"open\"", '[', ']'), None);
    }

    #[test]
    fn test_parse_response_without_json() {
        let err = Action::parse_response("I cannot see the screen").unwrap_err();
        assert!(matches!(err, ReplayError::MalformedAction(_)));
        let err = Action::parse_response("{\"action\": \"key\"").unwrap_err();
        assert!(matches!(err, ReplayError::MalformedAction(_)));
    }

    #[test]
    fn test_serde_uses_wire_form() {
        let action = Action::LeftClickDrag { coordinate: Coordinate::new(5, 6) };
        let json = serde_json::to_string(&action).unwrap();
        assert_eq!(json, r#"{"action":"left_click_drag","coordinate":[5,6]}"#);
        let back: Action = serde_json::from_str(&json).unwrap();
        assert_eq!(back, action);
    }

    #[test]
    fn test_display() {
        assert_eq!(Action::Type { text: "hi".into() }.to_string(), "type \"hi\"");
        assert_eq!(
            Action::MouseMove { coordinate: Coordinate::new(1, 2) }.to_string(),
            "mouse_move [1, 2]"
        );
        assert_eq!(Action::DoubleClick.to_string(), "double_click");
    }
}
