//! Test-only helpers: UI node builders, a scripted oracle and a fake device.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow, bail};
use serde_json::{Value, json};

use crate::core::ui::{Bounds, UiNode};
use crate::io::device::{Device, keycode};
use crate::io::oracle::{Oracle, OracleCall, OracleRequest};

/// Non-clickable text view.
pub fn label(text: &str, bounds: Bounds) -> UiNode {
    UiNode {
        tag: "node".to_string(),
        text: text.to_string(),
        class_name: "android.widget.TextView".to_string(),
        package: "md.obsidian".to_string(),
        enabled: true,
        bounds,
        ..UiNode::default()
    }
}

pub fn button(text: &str, bounds: Bounds) -> UiNode {
    UiNode {
        class_name: "android.widget.Button".to_string(),
        clickable: true,
        focusable: true,
        ..label(text, bounds)
    }
}

/// Enabled `EditText` showing `text`.
pub fn edit_text(text: &str, bounds: Bounds) -> UiNode {
    UiNode {
        class_name: "android.widget.EditText".to_string(),
        clickable: true,
        focusable: true,
        ..label(text, bounds)
    }
}

/// Render nodes as a flat uiautomator dump.
pub fn snapshot_xml(nodes: &[UiNode]) -> String {
    let mut xml = String::from(
        "<?xml version='1.0' encoding='UTF-8' standalone='yes' ?><hierarchy rotation=\"0\">",
    );
    for (index, node) in nodes.iter().enumerate() {
        let b = node.bounds;
        xml.push_str(&format!(
            "<node index=\"{index}\" text=\"{}\" resource-id=\"{}\" class=\"{}\" package=\"{}\" \
             content-desc=\"{}\" checkable=\"{}\" checked=\"{}\" clickable=\"{}\" enabled=\"{}\" \
             focusable=\"{}\" focused=\"{}\" scrollable=\"{}\" long-clickable=\"{}\" \
             password=\"{}\" selected=\"{}\" bounds=\"[{},{}][{},{}]\" />",
            escape_attr(&node.text),
            escape_attr(&node.resource_id),
            escape_attr(&node.class_name),
            escape_attr(&node.package),
            escape_attr(&node.content_desc),
            node.checkable,
            node.checked,
            node.clickable,
            node.enabled,
            node.focusable,
            node.focused,
            node.scrollable,
            node.long_clickable,
            node.password,
            node.selected,
            b.left,
            b.top,
            b.right,
            b.bottom,
        ));
    }
    xml.push_str("</hierarchy>");
    xml
}

fn escape_attr(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Planner answer in the strict output shape, with unused params set to null.
pub fn plan(action_type: &str, description: &str, params: Value) -> Value {
    let mut full = json!({
        "text": null, "x": null, "y": null, "field_type": null, "direction": null,
        "key": null, "seconds": null, "condition": null, "reason": null
    });
    if let (Some(full), Some(given)) = (full.as_object_mut(), params.as_object()) {
        for (key, value) in given {
            full.insert(key.clone(), value.clone());
        }
    }
    json!({"action_type": action_type, "description": description, "params": full})
}

/// Oracle that replays queued answers per call kind and records every request.
///
/// A call with nothing queued fails, which exercises the error paths.
#[derive(Default)]
pub struct ScriptedOracle {
    answers: RefCell<HashMap<OracleCall, VecDeque<Result<Value>>>>,
    requests: RefCell<Vec<OracleRequest>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, call: OracleCall, answer: Value) -> &Self {
        self.answers
            .borrow_mut()
            .entry(call)
            .or_default()
            .push_back(Ok(answer));
        self
    }

    pub fn push_err(&self, call: OracleCall, message: &str) -> &Self {
        self.answers
            .borrow_mut()
            .entry(call)
            .or_default()
            .push_back(Err(anyhow!("{message}")));
        self
    }

    pub fn requests(&self) -> Vec<OracleRequest> {
        self.requests.borrow().clone()
    }

    pub fn count(&self, call: OracleCall) -> usize {
        self.requests
            .borrow()
            .iter()
            .filter(|request| request.call == call)
            .count()
    }
}

impl Oracle for ScriptedOracle {
    fn generate_structured(&self, request: &OracleRequest) -> Result<Value> {
        self.requests.borrow_mut().push(request.clone());
        let next = self
            .answers
            .borrow_mut()
            .get_mut(&request.call)
            .and_then(VecDeque::pop_front);
        match next {
            Some(answer) => answer,
            None => bail!("no scripted answer for {}", request.call.name()),
        }
    }
}

/// One recorded device interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    Screenshot,
    DumpUi,
    Tap(i32, i32),
    Swipe {
        from: (i32, i32),
        to: (i32, i32),
        duration_ms: u32,
    },
    KeyEvent(u32),
    KeyCombination(Vec<u32>),
    TypeText(String),
    Install(PathBuf),
    ClearData(String),
    Launch(String),
    ScreenSize,
}

/// In-memory device with a queue of screens.
///
/// Tapping an editable field focuses it and typing edits its text. Any other
/// tap, a swipe, BACK, HOME or a launch navigates to the next queued screen;
/// with the queue empty the current screen stays.
pub struct FakeDevice {
    current: RefCell<Vec<UiNode>>,
    queued: RefCell<VecDeque<Vec<UiNode>>>,
    focused: Cell<Option<usize>>,
    selected_all: Cell<bool>,
    calls: RefCell<Vec<DeviceCall>>,
    failing_taps: Cell<u32>,
    failing_launches: Cell<u32>,
    key_combination_supported: bool,
    size: (i32, i32),
}

impl FakeDevice {
    pub fn new(first: Vec<UiNode>) -> Self {
        Self {
            current: RefCell::new(first),
            queued: RefCell::new(VecDeque::new()),
            focused: Cell::new(None),
            selected_all: Cell::new(false),
            calls: RefCell::new(Vec::new()),
            failing_taps: Cell::new(0),
            failing_launches: Cell::new(0),
            key_combination_supported: true,
            size: (1080, 2400),
        }
    }

    pub fn then(self, screen: Vec<UiNode>) -> Self {
        self.queued.borrow_mut().push_back(screen);
        self
    }

    /// The next `n` taps fail with a transport error.
    pub fn failing_taps(self, n: u32) -> Self {
        self.failing_taps.set(n);
        self
    }

    /// The next `n` app launches fail.
    pub fn failing_launches(self, n: u32) -> Self {
        self.failing_launches.set(n);
        self
    }

    pub fn without_key_combination(mut self) -> Self {
        self.key_combination_supported = false;
        self
    }

    pub fn calls(&self) -> Vec<DeviceCall> {
        self.calls.borrow().clone()
    }

    pub fn taps(&self) -> Vec<(i32, i32)> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|call| match call {
                DeviceCall::Tap(x, y) => Some((*x, *y)),
                _ => None,
            })
            .collect()
    }

    pub fn current(&self) -> Vec<UiNode> {
        self.current.borrow().clone()
    }

    fn record(&self, call: DeviceCall) {
        self.calls.borrow_mut().push(call);
    }

    fn navigate(&self) {
        if let Some(next) = self.queued.borrow_mut().pop_front() {
            *self.current.borrow_mut() = next;
            self.focused.set(None);
            self.selected_all.set(false);
        }
    }

    fn edit_focused(&self, edit: impl FnOnce(&mut String)) {
        let Some(idx) = self.focused.get() else {
            return;
        };
        let mut current = self.current.borrow_mut();
        if let Some(node) = current.get_mut(idx) {
            edit(&mut node.text);
        }
    }
}

impl Device for FakeDevice {
    fn screenshot(&self, path: &Path) -> Result<()> {
        self.record(DeviceCall::Screenshot);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, b"\x89PNG fake")?;
        Ok(())
    }

    fn dump_ui(&self) -> Result<String> {
        self.record(DeviceCall::DumpUi);
        Ok(snapshot_xml(&self.current.borrow()))
    }

    fn tap(&self, x: i32, y: i32) -> Result<()> {
        self.record(DeviceCall::Tap(x, y));
        if self.failing_taps.get() > 0 {
            self.failing_taps.set(self.failing_taps.get() - 1);
            bail!("injected tap failure");
        }
        let hit = self.current.borrow().iter().position(|node| {
            let b = node.bounds;
            node.is_editable() && x >= b.left && x <= b.right && y >= b.top && y <= b.bottom
        });
        match hit {
            Some(idx) => {
                self.focused.set(Some(idx));
                self.selected_all.set(false);
            }
            None => self.navigate(),
        }
        Ok(())
    }

    fn swipe(&self, from: (i32, i32), to: (i32, i32), duration_ms: u32) -> Result<()> {
        self.record(DeviceCall::Swipe {
            from,
            to,
            duration_ms,
        });
        self.navigate();
        Ok(())
    }

    fn key_event(&self, code: u32) -> Result<()> {
        self.record(DeviceCall::KeyEvent(code));
        match code {
            keycode::BACK | keycode::HOME => self.navigate(),
            keycode::DEL => {
                if self.selected_all.replace(false) {
                    self.edit_focused(String::clear);
                } else {
                    self.edit_focused(|text| {
                        text.pop();
                    });
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn key_combination(&self, codes: &[u32]) -> Result<()> {
        self.record(DeviceCall::KeyCombination(codes.to_vec()));
        if !self.key_combination_supported {
            bail!("input keycombination not supported");
        }
        if codes == [keycode::CTRL_LEFT, keycode::A] {
            self.selected_all.set(true);
        }
        Ok(())
    }

    fn type_text(&self, text: &str) -> Result<()> {
        self.record(DeviceCall::TypeText(text.to_string()));
        self.edit_focused(|current| current.push_str(text));
        Ok(())
    }

    fn install_app(&self, apk: &Path) -> Result<()> {
        self.record(DeviceCall::Install(apk.to_path_buf()));
        Ok(())
    }

    fn clear_app_data(&self, package: &str) -> Result<()> {
        self.record(DeviceCall::ClearData(package.to_string()));
        Ok(())
    }

    fn launch_app(&self, package: &str) -> Result<()> {
        self.record(DeviceCall::Launch(package.to_string()));
        if self.failing_launches.get() > 0 {
            self.failing_launches.set(self.failing_launches.get() - 1);
            bail!("injected launch failure");
        }
        self.navigate();
        Ok(())
    }

    fn screen_size(&self) -> Result<(i32, i32)> {
        self.record(DeviceCall::ScreenSize);
        Ok(self.size)
    }
}
