//! Action schema and structural validation.
//!
//! The planner proposes actions as loose JSON. [`parse_action`] is the only way
//! to obtain a typed [`Action`]: it checks field presence and primitive types
//! per variant and never mutates its input.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::core::ui::FieldRole;

/// Every accepted `action_type`, in prompt order.
pub const ACTION_TYPES: [&str; 9] = [
    "tap_by_text",
    "tap_xy",
    "input_text",
    "swipe",
    "keyevent",
    "wait",
    "assert",
    "fail",
    "done",
];

/// A single proposed device interaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Action {
    pub description: String,
    #[serde(flatten)]
    pub kind: ActionKind,
}

/// Variant tag plus its parameter record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action_type", content = "params", rename_all = "snake_case")]
pub enum ActionKind {
    TapByText(TapByText),
    TapXy(TapXy),
    InputText(InputText),
    Swipe(Swipe),
    #[serde(rename = "keyevent")]
    KeyEvent(KeyEvent),
    Wait(Wait),
    Assert(Assert),
    Fail(Fail),
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TapByText {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TapXy {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputText {
    pub text: String,
    pub field_type: FieldRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SwipeDirection {
    Up,
    Down,
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Swipe {
    pub direction: SwipeDirection,
}

/// Named key (`BACK`, `HOME`, ...) or a literal numeric key code.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyEvent {
    pub key: String,
}

/// Advisory only: executing a wait introduces no delay.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Wait {
    pub seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assert {
    pub condition: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fail {
    pub reason: String,
}

impl Action {
    pub fn action_type(&self) -> &'static str {
        match &self.kind {
            ActionKind::TapByText(_) => "tap_by_text",
            ActionKind::TapXy(_) => "tap_xy",
            ActionKind::InputText(_) => "input_text",
            ActionKind::Swipe(_) => "swipe",
            ActionKind::KeyEvent(_) => "keyevent",
            ActionKind::Wait(_) => "wait",
            ActionKind::Assert(_) => "assert",
            ActionKind::Fail(_) => "fail",
            ActionKind::Done => "done",
        }
    }

    pub fn is_assert(&self) -> bool {
        matches!(self.kind, ActionKind::Assert(_))
    }

    pub fn to_json(&self) -> Value {
        // Serializing plain structs and strings into a Value cannot fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Validate a raw planner proposal and convert it into a typed [`Action`].
///
/// The error is a human-readable reason suitable for feeding back to the
/// planner on re-plan. `action_type` and `params` are mandatory; a missing
/// `description` reads as empty.
pub fn parse_action(raw: &Value) -> Result<Action, String> {
    let Some(object) = raw.as_object() else {
        return Err("Action is not a JSON object".to_string());
    };
    for field in ["action_type", "params"] {
        if !object.contains_key(field) {
            return Err(format!("Missing required field: {field}"));
        }
    }

    let action_type = object
        .get("action_type")
        .and_then(Value::as_str)
        .ok_or_else(|| "action_type must be a string".to_string())?;
    let description = match object.get("description") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    // Structured-output backends fill unused parameters with null.
    let params: Map<String, Value> = object
        .get("params")
        .and_then(Value::as_object)
        .ok_or_else(|| "params must be a JSON object".to_string())?
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    let params = &params;

    let action_type = if action_type == "tap" {
        reinterpret_tap(params)?
    } else {
        action_type
    };

    let kind = match action_type {
        "tap_by_text" => {
            let text = required(params, "tap_by_text", "text")?;
            match text.as_str() {
                Some(text) if !text.is_empty() => ActionKind::TapByText(TapByText {
                    text: text.to_string(),
                }),
                _ => return Err("tap_by_text params.text must be a non-empty string".to_string()),
            }
        }
        "tap_xy" => {
            if !params.contains_key("x") || !params.contains_key("y") {
                return Err("tap_xy requires params.x and params.y".to_string());
            }
            match (
                params.get("x").and_then(Value::as_f64),
                params.get("y").and_then(Value::as_f64),
            ) {
                (Some(x), Some(y)) => ActionKind::TapXy(TapXy { x, y }),
                _ => return Err("tap_xy params.x and params.y must be numeric".to_string()),
            }
        }
        "input_text" => {
            let text = required(params, "input_text", "text")?
                .as_str()
                .ok_or_else(|| "input_text params.text must be a string".to_string())?;
            let field_type = match params.get("field_type") {
                None => FieldRole::Unspecified,
                Some(Value::String(raw)) => FieldRole::parse(raw).ok_or_else(|| {
                    format!("input_text params.field_type must be one of: title, body, \"\" (got '{raw}')")
                })?,
                Some(_) => return Err("input_text params.field_type must be a string".to_string()),
            };
            ActionKind::InputText(InputText {
                text: text.to_string(),
                field_type,
            })
        }
        "swipe" => {
            let direction = match required(params, "swipe", "direction")?.as_str() {
                Some("up") => SwipeDirection::Up,
                Some("down") => SwipeDirection::Down,
                Some("left") => SwipeDirection::Left,
                Some("right") => SwipeDirection::Right,
                _ => {
                    return Err(
                        "swipe params.direction must be one of: up, down, left, right".to_string(),
                    );
                }
            };
            ActionKind::Swipe(Swipe { direction })
        }
        "keyevent" => {
            let key = match required(params, "keyevent", "key")? {
                Value::String(key) if !key.trim().is_empty() => key.trim().to_string(),
                Value::Number(code) if code.is_u64() => code.to_string(),
                _ => {
                    return Err(
                        "keyevent params.key must be a key name or a numeric key code".to_string(),
                    );
                }
            };
            ActionKind::KeyEvent(KeyEvent { key })
        }
        // Advisory only: a missing value means 0 and no delay is ever enforced.
        "wait" => {
            let seconds = match params.get("seconds") {
                None => 0.0,
                Some(value) => value
                    .as_f64()
                    .ok_or_else(|| "wait params.seconds must be numeric".to_string())?,
            };
            ActionKind::Wait(Wait { seconds })
        }
        "assert" => ActionKind::Assert(Assert {
            condition: optional_text(params, "assert", "condition")?
                .unwrap_or_else(|| description.clone()),
        }),
        "fail" => ActionKind::Fail(Fail {
            reason: optional_text(params, "fail", "reason")?
                .unwrap_or_else(|| description.clone()),
        }),
        "done" => ActionKind::Done,
        other => {
            return Err(format!(
                "Invalid action_type '{other}'. Use one of: {}",
                ACTION_TYPES.join(", ")
            ));
        }
    };

    Ok(Action { description, kind })
}

/// Check a tap-by-text target against the visible UI summary.
///
/// Catches planner proposals that name labels which are not on screen.
pub fn check_visible(action: &Action, ui_summary: &str) -> Result<(), String> {
    if let ActionKind::TapByText(TapByText { text }) = &action.kind
        && !ui_summary.to_lowercase().contains(&text.to_lowercase())
    {
        return Err(format!(
            "tap_by_text target '{text}' does not appear in the current UI state"
        ));
    }
    Ok(())
}

fn reinterpret_tap(params: &Map<String, Value>) -> Result<&'static str, String> {
    if params.contains_key("text") {
        return Ok("tap_by_text");
    }
    if params.contains_key("x") && params.contains_key("y") {
        return Ok("tap_xy");
    }
    Err(
        "action_type 'tap' is not supported: use 'tap_by_text' with params.text or 'tap_xy' with params.x and params.y"
            .to_string(),
    )
}

fn required<'a>(
    params: &'a Map<String, Value>,
    action_type: &str,
    field: &str,
) -> Result<&'a Value, String> {
    params
        .get(field)
        .ok_or_else(|| format!("{action_type} requires params.{field}"))
}

fn optional_text(
    params: &Map<String, Value>,
    action_type: &str,
    field: &str,
) -> Result<Option<String>, String> {
    match params.get(field) {
        None => Ok(None),
        Some(Value::String(text)) => Ok(Some(text.clone())),
        Some(_) => Err(format!("{action_type} params.{field} must be a string")),
    }
}
