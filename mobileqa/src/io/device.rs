//! Device control abstraction.
//!
//! The [`Device`] trait decouples the orchestration loop from the transport
//! (currently `adb`). Tests use scripted devices that replay canned UI dumps
//! without spawning processes.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, info, instrument};

use crate::io::config::DeviceConfig;
use crate::io::process::{CommandOutput, run_command_with_timeout};

/// Android key codes used by the runner.
pub mod keycode {
    pub const HOME: u32 = 3;
    pub const BACK: u32 = 4;
    pub const CTRL_LEFT: u32 = 113;
    pub const A: u32 = 29;
    pub const TAB: u32 = 61;
    pub const SPACE: u32 = 62;
    pub const ENTER: u32 = 66;
    pub const DEL: u32 = 67;
    pub const MOVE_END: u32 = 123;
}

/// Capability calls the orchestration core needs from a device.
///
/// All calls are blocking.
pub trait Device {
    fn screenshot(&self, path: &Path) -> Result<()>;

    /// Raw UI hierarchy dump (uiautomator XML).
    fn dump_ui(&self) -> Result<String>;

    fn tap(&self, x: i32, y: i32) -> Result<()>;

    fn swipe(&self, from: (i32, i32), to: (i32, i32), duration_ms: u32) -> Result<()>;

    fn key_event(&self, code: u32) -> Result<()>;

    /// Press several keys together. Not every platform version supports this.
    fn key_combination(&self, codes: &[u32]) -> Result<()>;

    fn type_text(&self, text: &str) -> Result<()>;

    fn install_app(&self, apk: &Path) -> Result<()>;

    fn clear_app_data(&self, package: &str) -> Result<()>;

    fn launch_app(&self, package: &str) -> Result<()>;

    /// Screen size as `(width, height)` in pixels.
    fn screen_size(&self) -> Result<(i32, i32)>;
}

/// Where `uiautomator dump` writes on the device.
const DEVICE_DUMP_PATH: &str = "/sdcard/window_dump.xml";

/// Device driven through `adb` subprocesses.
pub struct AdbDevice {
    adb_path: PathBuf,
    serial: Option<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl AdbDevice {
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            adb_path: PathBuf::from(&config.adb_path),
            serial: config.serial.clone(),
            timeout: Duration::from_secs(config.command_timeout_secs),
            output_limit_bytes: config.output_limit_bytes,
        }
    }

    /// Fail early when `adb` is missing or no device is reachable.
    #[instrument(skip_all, fields(serial = ?self.serial))]
    pub fn verify(&self) -> Result<()> {
        let output = self.run(&["get-state"])?;
        output.ensure_success("adb get-state")?;
        let state = output.stdout_text();
        if state.trim() != "device" {
            bail!("device not ready (state: {})", state.trim());
        }
        info!("adb device ready");
        Ok(())
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.adb_path);
        if let Some(serial) = &self.serial {
            cmd.arg("-s").arg(serial);
        }
        cmd.args(args);
        cmd
    }

    fn run(&self, args: &[&str]) -> Result<CommandOutput> {
        debug!(?args, "adb");
        run_command_with_timeout(
            self.command(args),
            None,
            self.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run adb {}", args.join(" ")))
    }

    fn run_checked(&self, args: &[&str]) -> Result<CommandOutput> {
        let output = self.run(args)?;
        output.ensure_success(&format!("adb {}", args.join(" ")))?;
        Ok(output)
    }

    fn shell(&self, args: &[&str]) -> Result<CommandOutput> {
        let mut full = vec!["shell"];
        full.extend_from_slice(args);
        self.run_checked(&full)
    }
}

impl Device for AdbDevice {
    #[instrument(skip_all, fields(path = %path.display()))]
    fn screenshot(&self, path: &Path) -> Result<()> {
        let output = self.run_checked(&["exec-out", "screencap", "-p"])?;
        if output.stdout.is_empty() || output.stdout_truncated > 0 {
            bail!(
                "screencap returned {} bytes ({} truncated)",
                output.stdout.len(),
                output.stdout_truncated
            );
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create screenshot dir {}", parent.display()))?;
        }
        fs::write(path, &output.stdout)
            .with_context(|| format!("write screenshot {}", path.display()))
    }

    #[instrument(skip_all)]
    fn dump_ui(&self) -> Result<String> {
        self.shell(&["uiautomator", "dump", DEVICE_DUMP_PATH])?;
        let output = self.shell(&["cat", DEVICE_DUMP_PATH])?;
        Ok(output.stdout_text())
    }

    fn tap(&self, x: i32, y: i32) -> Result<()> {
        self.shell(&["input", "tap", &x.to_string(), &y.to_string()])?;
        Ok(())
    }

    fn swipe(&self, from: (i32, i32), to: (i32, i32), duration_ms: u32) -> Result<()> {
        self.shell(&[
            "input",
            "swipe",
            &from.0.to_string(),
            &from.1.to_string(),
            &to.0.to_string(),
            &to.1.to_string(),
            &duration_ms.to_string(),
        ])?;
        Ok(())
    }

    fn key_event(&self, code: u32) -> Result<()> {
        self.shell(&["input", "keyevent", &code.to_string()])?;
        Ok(())
    }

    fn key_combination(&self, codes: &[u32]) -> Result<()> {
        let codes: Vec<String> = codes.iter().map(u32::to_string).collect();
        let mut args = vec!["input", "keycombination"];
        args.extend(codes.iter().map(String::as_str));
        self.shell(&args)?;
        Ok(())
    }

    fn type_text(&self, text: &str) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        self.shell(&["input", "text", &escape_input_text(text)])?;
        Ok(())
    }

    #[instrument(skip_all, fields(apk = %apk.display()))]
    fn install_app(&self, apk: &Path) -> Result<()> {
        if !apk.is_file() {
            bail!("APK not found: {}", apk.display());
        }
        let apk = apk
            .to_str()
            .ok_or_else(|| anyhow!("APK path is not valid UTF-8: {}", apk.display()))?;
        let output = self.run_checked(&["install", "-r", apk])?;
        if !output.stdout_text().contains("Success") {
            bail!("adb install did not report success: {}", output.stdout_text().trim());
        }
        info!("installed app");
        Ok(())
    }

    fn clear_app_data(&self, package: &str) -> Result<()> {
        let output = self.shell(&["pm", "clear", package])?;
        if !output.stdout_text().contains("Success") {
            bail!("pm clear {package} did not report success");
        }
        Ok(())
    }

    fn launch_app(&self, package: &str) -> Result<()> {
        self.shell(&[
            "monkey",
            "-p",
            package,
            "-c",
            "android.intent.category.LAUNCHER",
            "1",
        ])?;
        Ok(())
    }

    fn screen_size(&self) -> Result<(i32, i32)> {
        let output = self.shell(&["wm", "size"])?;
        parse_wm_size(&output.stdout_text())
    }
}

/// Parse `wm size` output, preferring an override size when present.
pub fn parse_wm_size(output: &str) -> Result<(i32, i32)> {
    let line = output
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .ok_or_else(|| anyhow!("empty wm size output"))?;
    let size = line.rsplit(':').next().unwrap_or(line).trim();
    let (width, height) = size
        .split_once('x')
        .ok_or_else(|| anyhow!("could not parse screen size: {line}"))?;
    let width = width
        .trim()
        .parse()
        .with_context(|| format!("parse screen width in {line}"))?;
    let height = height
        .trim()
        .parse()
        .with_context(|| format!("parse screen height in {line}"))?;
    Ok((width, height))
}

/// `input text` treats `%s` as a space and runs through the device shell.
fn escape_input_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            ' ' => escaped.push_str("%s"),
            '\\' | '\'' | '"' | '`' | '$' | '&' | '|' | ';' | '<' | '>' | '(' | ')' | '*'
            | '~' | '!' | '?' | '#' => {
                escaped.push('\\');
                escaped.push(c);
            }
            _ => escaped.push(c),
        }
    }
    escaped
}
