//! Executor agent: turns a validated action into device calls.
//!
//! Device errors never escape; every outcome is an [`ExecutionResult`].

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::core::action::{Action, ActionKind, InputText, SwipeDirection};
use crate::core::types::ExecutionResult;
use crate::core::ui::{FieldRole, UiSnapshot};
use crate::io::device::{Device, keycode};
use crate::io::uixml::parse_snapshot;

pub const SWIPE_DURATION_MS: u32 = 150;

/// DEL presses used when select-all is unavailable.
const FALLBACK_DELETES: usize = 50;

#[derive(Debug, Clone)]
pub struct ExecutorAgent {
    max_retries: u32,
}

impl ExecutorAgent {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries: max_retries.max(1),
        }
    }

    /// Execute one action. Interactive actions are retried.
    pub fn execute<D: Device>(&self, device: &D, action: &Action) -> ExecutionResult {
        match &action.kind {
            ActionKind::TapByText(tap) => self.retry(action, || tap_by_text(device, &tap.text)),
            ActionKind::TapXy(tap) => {
                let (x, y) = (tap.x.round() as i32, tap.y.round() as i32);
                self.retry(action, || {
                    device
                        .tap(x, y)
                        .map(|()| ExecutionResult::ok(format!("Tapped at ({x}, {y})")))
                })
            }
            ActionKind::InputText(input) => self.retry(action, || input_text(device, input)),
            ActionKind::Swipe(swipe) => {
                self.retry(action, || swipe_screen(device, swipe.direction))
            }
            ActionKind::KeyEvent(key) => match key_code(&key.key) {
                Some(code) => self.retry(action, || {
                    device
                        .key_event(code)
                        .map(|()| ExecutionResult::ok(format!("Sent key {} ({code})", key.key)))
                }),
                None => ExecutionResult::failed(
                    "Key event failed",
                    format!("Key '{}' not recognized", key.key),
                ),
            },
            ActionKind::Assert(assert) => {
                ExecutionResult::ok(format!("Assertion recorded: {}", assert.condition))
            }
            ActionKind::Fail(fail) => {
                ExecutionResult::failed("Planner reported failure", fail.reason.clone())
            }
            ActionKind::Done => ExecutionResult::ok("Test marked as done"),
            ActionKind::Wait(wait) => {
                ExecutionResult::ok(format!("Waited {} seconds", wait.seconds))
            }
        }
    }

    /// Retry a device handler, turning its errors into failed results.
    fn retry(
        &self,
        action: &Action,
        mut handler: impl FnMut() -> Result<ExecutionResult>,
    ) -> ExecutionResult {
        with_retries(self.max_retries, || {
            handler().unwrap_or_else(|err| {
                ExecutionResult::failed(
                    format!("Failed to execute {}", action.action_type()),
                    format!("{err:#}"),
                )
            })
        })
    }
}

/// Run `attempt` until it succeeds or `max_attempts` are used up.
///
/// The last attempt's result is returned unchanged.
pub fn with_retries(
    max_attempts: u32,
    mut attempt: impl FnMut() -> ExecutionResult,
) -> ExecutionResult {
    let mut result = attempt();
    let mut used = 1;
    while !result.success && used < max_attempts {
        debug!(attempt = used, error = %result.error, "retrying action");
        result = attempt();
        used += 1;
    }
    if !result.success {
        warn!(attempts = used, error = %result.error, "action failed");
    }
    result
}

fn current_snapshot<D: Device>(device: &D) -> Result<UiSnapshot> {
    let xml = device.dump_ui().context("dump UI")?;
    parse_snapshot(&xml)
}

fn tap_by_text<D: Device>(device: &D, text: &str) -> Result<ExecutionResult> {
    let snapshot = current_snapshot(device)?;
    let target = snapshot
        .resolve(text, true)
        .or_else(|| snapshot.resolve(text, false));
    let Some(target) = target else {
        return Ok(ExecutionResult::failed(
            "Tap failed",
            format!("No UI element found with text '{text}'"),
        ));
    };
    let (x, y) = target.center();
    device.tap(x, y)?;
    Ok(ExecutionResult::ok(format!("Tapped '{text}' at ({x}, {y})")))
}

fn input_text<D: Device>(device: &D, input: &InputText) -> Result<ExecutionResult> {
    let snapshot = current_snapshot(device)?;
    let Some(field) = snapshot.select_input_field(input.field_type) else {
        return Ok(ExecutionResult::failed(
            "Input failed",
            "No editable field found on screen",
        ));
    };
    let (x, y) = field.center();
    device.tap(x, y).context("focus input field")?;
    clear_field(device)?;
    device.type_text(&input.text).context("type text")?;
    if input.field_type == FieldRole::Title {
        device
            .key_event(keycode::ENTER)
            .context("move focus past title")?;
    }
    Ok(ExecutionResult::ok(format!(
        "Typed '{}' into field at ({x}, {y})",
        input.text
    )))
}

fn clear_field<D: Device>(device: &D) -> Result<()> {
    match device.key_combination(&[keycode::CTRL_LEFT, keycode::A]) {
        Ok(()) => device.key_event(keycode::DEL).context("delete selection"),
        Err(err) => {
            debug!(err = %err, "select-all unavailable, deleting from end");
            device
                .key_event(keycode::MOVE_END)
                .context("move to end of field")?;
            for _ in 0..FALLBACK_DELETES {
                device.key_event(keycode::DEL).context("delete character")?;
            }
            Ok(())
        }
    }
}

/// Start and end points for a swipe on a `width` x `height` screen.
pub fn swipe_geometry(
    direction: SwipeDirection,
    width: i32,
    height: i32,
) -> ((i32, i32), (i32, i32)) {
    let (mid_x, mid_y) = (width / 2, height / 2);
    match direction {
        SwipeDirection::Up => ((mid_x, height * 3 / 4), (mid_x, height / 4)),
        SwipeDirection::Down => ((mid_x, height / 4), (mid_x, height * 3 / 4)),
        SwipeDirection::Left => ((width * 3 / 4, mid_y), (width / 4, mid_y)),
        SwipeDirection::Right => ((width / 4, mid_y), (width * 3 / 4, mid_y)),
    }
}

fn swipe_screen<D: Device>(device: &D, direction: SwipeDirection) -> Result<ExecutionResult> {
    let (width, height) = device.screen_size().context("read screen size")?;
    let (from, to) = swipe_geometry(direction, width, height);
    device.swipe(from, to, SWIPE_DURATION_MS)?;
    let name = match direction {
        SwipeDirection::Up => "up",
        SwipeDirection::Down => "down",
        SwipeDirection::Left => "left",
        SwipeDirection::Right => "right",
    };
    Ok(ExecutionResult::ok(format!("Swiped {name}")))
}

/// Map a key name or numeric code to an Android key code.
pub fn key_code(key: &str) -> Option<u32> {
    match key.trim().to_uppercase().as_str() {
        "BACK" => Some(keycode::BACK),
        "HOME" => Some(keycode::HOME),
        "ENTER" => Some(keycode::ENTER),
        "DEL" | "DELETE" => Some(keycode::DEL),
        "TAB" => Some(keycode::TAB),
        "SPACE" => Some(keycode::SPACE),
        other => other.parse().ok(),
    }
}
