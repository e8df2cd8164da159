//! Runner configuration and test suite files (TOML).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Runner configuration (TOML).
///
/// Missing fields default to the values the runner was tuned with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Step budget per test.
    pub max_steps: u32,

    /// Attempts per interactive action.
    pub max_retries: u32,

    /// Popup dismissal rounds per step.
    pub popup_max_attempts: u32,

    /// Pause after a successful interaction before the post-action snapshot.
    pub settle_ms: u64,

    /// Duration of the passive wait recovery.
    pub recovery_wait_ms: u64,

    pub device: DeviceConfig,

    pub oracle: OracleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device serial passed as `adb -s`. Unset uses the only attached device.
    pub serial: Option<String>,
    pub adb_path: String,
    pub command_timeout_secs: u64,
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OracleConfig {
    /// Program invoked as `<program> exec ...`.
    pub program: String,
    pub model: Option<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
    /// Upper bound on rendered prompt size before sections are dropped.
    pub prompt_budget_bytes: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            serial: None,
            adb_path: "adb".to_string(),
            command_timeout_secs: 30,
            output_limit_bytes: 16 * 1024 * 1024,
        }
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            program: "codex".to_string(),
            model: None,
            timeout_secs: 5 * 60,
            output_limit_bytes: 100_000,
            prompt_budget_bytes: 60_000,
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_steps: 30,
            max_retries: 3,
            popup_max_attempts: 5,
            settle_ms: 1000,
            recovery_wait_ms: 2000,
            device: DeviceConfig::default(),
            oracle: OracleConfig::default(),
        }
    }
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_steps == 0 {
            return Err(anyhow!("max_steps must be > 0"));
        }
        if self.max_retries == 0 {
            return Err(anyhow!("max_retries must be > 0"));
        }
        if self.device.adb_path.trim().is_empty() {
            return Err(anyhow!("device.adb_path must be non-empty"));
        }
        if self.device.command_timeout_secs == 0 {
            return Err(anyhow!("device.command_timeout_secs must be > 0"));
        }
        if self.device.output_limit_bytes == 0 {
            return Err(anyhow!("device.output_limit_bytes must be > 0"));
        }
        if self.oracle.program.trim().is_empty() {
            return Err(anyhow!("oracle.program must be non-empty"));
        }
        if self.oracle.timeout_secs == 0 {
            return Err(anyhow!("oracle.timeout_secs must be > 0"));
        }
        if self.oracle.output_limit_bytes == 0 {
            return Err(anyhow!("oracle.output_limit_bytes must be > 0"));
        }
        if self.oracle.prompt_budget_bytes == 0 {
            return Err(anyhow!("oracle.prompt_budget_bytes must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RunnerConfig::default()`.
pub fn load_config(path: &Path) -> Result<RunnerConfig> {
    if !path.exists() {
        let cfg = RunnerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RunnerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

pub const DEFAULT_PACKAGE: &str = "md.obsidian";

/// A list of natural-language tests against one app.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Suite {
    pub tests: Vec<TestCase>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestCase {
    pub name: String,
    pub goal: String,
    #[serde(default = "default_package")]
    pub package: String,
    /// Installed before the test when set.
    #[serde(default)]
    pub apk_path: Option<PathBuf>,
    /// Free-form preconditions, appended to the goal for the planner.
    #[serde(default)]
    pub setup: Option<String>,
}

fn default_package() -> String {
    DEFAULT_PACKAGE.to_string()
}

impl TestCase {
    /// Goal text given to the oracle, including setup notes.
    pub fn full_goal(&self) -> String {
        match self.setup.as_deref().map(str::trim) {
            Some(setup) if !setup.is_empty() => format!("{}\n\nPreconditions: {setup}", self.goal),
            _ => self.goal.clone(),
        }
    }
}

impl Suite {
    pub fn validate(&self) -> Result<()> {
        if self.tests.is_empty() {
            return Err(anyhow!("suite must contain at least one test"));
        }
        let mut seen = std::collections::HashSet::new();
        for test in &self.tests {
            if test.name.trim().is_empty() || test.name.chars().all(|c| c == '.') {
                return Err(anyhow!("test name '{}' is not a usable directory name", test.name));
            }
            if !test
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            {
                return Err(anyhow!(
                    "test name '{}' may only contain ASCII letters, digits, '_', '-' and '.'",
                    test.name
                ));
            }
            if !seen.insert(test.name.as_str()) {
                return Err(anyhow!("duplicate test name '{}'", test.name));
            }
            if test.goal.trim().is_empty() {
                return Err(anyhow!("test '{}' has an empty goal", test.name));
            }
            if test.package.trim().is_empty() {
                return Err(anyhow!("test '{}' has an empty package", test.name));
            }
        }
        Ok(())
    }

    /// Keep only the named test.
    pub fn select(self, name: &str) -> Result<Self> {
        let tests: Vec<TestCase> = self
            .tests
            .into_iter()
            .filter(|test| test.name == name)
            .collect();
        if tests.is_empty() {
            return Err(anyhow!("no test named '{name}' in suite"));
        }
        Ok(Self { tests })
    }
}

pub fn load_suite(path: &Path) -> Result<Suite> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let suite: Suite =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    suite
        .validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(suite)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, RunnerConfig::default());
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "max_steps = 12\n[device]\nserial = \"emulator-5554\"\n")
            .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_steps, 12);
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.device.serial.as_deref(), Some("emulator-5554"));
        assert_eq!(cfg.device.adb_path, "adb");
        assert_eq!(cfg.oracle.program, "codex");
    }

    #[test]
    fn rejects_zero_step_budget() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "max_steps = 0\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("max_steps"));
    }

    #[test]
    fn suite_defaults_package_and_validates_names() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("suite.toml");
        fs::write(
            &path,
            r#"
[[tests]]
name = "create_vault"
goal = "Create a vault named InternVault"

[[tests]]
name = "open_settings"
goal = "Open settings"
package = "com.example.notes"
setup = "Vault already exists"
"#,
        )
        .expect("write");
        let suite = load_suite(&path).expect("load");
        assert_eq!(suite.tests[0].package, DEFAULT_PACKAGE);
        assert_eq!(suite.tests[1].package, "com.example.notes");
        assert!(suite.tests[1].full_goal().ends_with("Preconditions: Vault already exists"));
        assert_eq!(suite.tests[0].full_goal(), "Create a vault named InternVault");

        let selected = suite.select("open_settings").expect("select");
        assert_eq!(selected.tests.len(), 1);
    }

    #[test]
    fn suite_rejects_duplicates_and_path_like_names() {
        let case = |name: &str| TestCase {
            name: name.to_string(),
            goal: "goal".to_string(),
            package: DEFAULT_PACKAGE.to_string(),
            apk_path: None,
            setup: None,
        };
        let dup = Suite {
            tests: vec![case("a"), case("a")],
        };
        assert!(dup.validate().is_err());
        let traversal = Suite {
            tests: vec![case("../escape")],
        };
        assert!(traversal.validate().is_err());
    }
}
