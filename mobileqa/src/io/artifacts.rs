//! Per-test and per-step artifact layout under the artifacts root.
//!
//! Every file is written once. JSON is pretty-printed with a trailing newline
//! so artifacts diff cleanly across runs.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct TestPaths {
    pub dir: PathBuf,
    pub initial_screenshot: PathBuf,
    pub initial_ui: PathBuf,
    pub subgoals: PathBuf,
    pub subgoals_final: PathBuf,
    pub reward_summary: PathBuf,
    pub test_result: PathBuf,
    /// Working directory for oracle calls (schemas, raw outputs, logs).
    pub oracle_dir: PathBuf,
}

impl TestPaths {
    pub fn new(root: &Path, test_name: &str) -> Self {
        let dir = root.join(test_name);
        Self {
            initial_screenshot: dir.join("initial_screenshot.png"),
            initial_ui: dir.join("initial_ui.xml"),
            subgoals: dir.join("subgoals.json"),
            subgoals_final: dir.join("subgoals_final.json"),
            reward_summary: dir.join("reward_summary.json"),
            test_result: dir.join("test_result.json"),
            oracle_dir: dir.join("oracle"),
            dir,
        }
    }

    pub fn create(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create test artifacts dir {}", self.dir.display()))
    }

    pub fn step(&self, step: u32) -> StepPaths {
        StepPaths::new(&self.dir, step)
    }
}

#[derive(Debug, Clone)]
pub struct StepPaths {
    pub dir: PathBuf,
    pub screenshot: PathBuf,
    pub ui_xml: PathBuf,
    pub ui_summary: PathBuf,
    pub action: PathBuf,
    pub execution_result: PathBuf,
    pub screenshot_post: PathBuf,
    pub ui_post: PathBuf,
    pub verdict: PathBuf,
    pub validation_error: PathBuf,
    pub validation_error_final: PathBuf,
    pub auto_handled_popup: PathBuf,
    pub recovery: PathBuf,
}

impl StepPaths {
    pub fn new(test_dir: &Path, step: u32) -> Self {
        let dir = test_dir.join(format!("step_{step:02}"));
        Self {
            screenshot: dir.join("screenshot.png"),
            ui_xml: dir.join("ui.xml"),
            ui_summary: dir.join("ui_summary.txt"),
            action: dir.join("action.json"),
            execution_result: dir.join("execution_result.json"),
            screenshot_post: dir.join("screenshot_post.png"),
            ui_post: dir.join("ui_post.xml"),
            verdict: dir.join("verdict.json"),
            validation_error: dir.join("validation_error.txt"),
            validation_error_final: dir.join("validation_error_final.txt"),
            auto_handled_popup: dir.join("auto_handled_popup.txt"),
            recovery: dir.join("recovery.txt"),
            dir,
        }
    }

    pub fn create(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create step dir {}", self.dir.display()))
    }
}

pub fn write_text(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)
        .with_context(|| format!("serialize {}", path.display()))?;
    buf.push('\n');
    write_text(path, &buf)
}
