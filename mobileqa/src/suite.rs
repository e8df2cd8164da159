//! Suite runner: prepare the app, run each test, summarize.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{error, info, instrument};

use crate::core::types::TestVerdict;
use crate::io::artifacts::{TestPaths, write_json};
use crate::io::config::{RunnerConfig, Suite, TestCase};
use crate::io::device::Device;
use crate::io::oracle::Oracle;
use crate::looping::{TestResult, run_test};

/// Verdict label for a test that could not run to completion.
pub const ERROR_VERDICT: &str = "ERROR";

/// Per-run knobs from the command line.
#[derive(Debug, Clone, Default)]
pub struct SuiteOptions {
    /// Overrides every test's `apk_path`.
    pub apk: Option<PathBuf>,
    pub reset_app: bool,
}

/// One line of the suite summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuiteEntry {
    pub test_name: String,
    pub verdict: String,
    pub reason: String,
    pub total_steps: u32,
    pub final_reward: Option<f64>,
}

impl SuiteEntry {
    fn from_result(result: &TestResult) -> Self {
        Self {
            test_name: result.test_name.clone(),
            verdict: result.verdict.as_str().to_string(),
            reason: result.reason.clone(),
            total_steps: result.total_steps,
            final_reward: Some(result.reward.final_reward),
        }
    }

    fn from_error(test: &TestCase, err: &anyhow::Error) -> Self {
        Self {
            test_name: test.name.clone(),
            verdict: ERROR_VERDICT.to_string(),
            reason: format!("{err:#}"),
            total_steps: 0,
            final_reward: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuiteSummary {
    pub total: usize,
    pub passed: usize,
    pub failed_action: usize,
    pub failed_assertion: usize,
    pub errors: usize,
    pub tests: Vec<SuiteEntry>,
}

impl SuiteSummary {
    fn from_entries(tests: Vec<SuiteEntry>) -> Self {
        let count = |label: &str| tests.iter().filter(|t| t.verdict == label).count();
        Self {
            total: tests.len(),
            passed: count("PASS"),
            failed_action: count("FAIL_ACTION"),
            failed_assertion: count("FAIL_ASSERTION"),
            errors: count(ERROR_VERDICT),
            tests,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.passed == self.total
    }

    /// Plain-text report for stdout.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for test in &self.tests {
            let reward = test
                .final_reward
                .map(|r| format!(" reward={r:.2}"))
                .unwrap_or_default();
            out.push_str(&format!(
                "{:<15} {} ({} steps{reward}): {}\n",
                test.verdict, test.test_name, test.total_steps, test.reason
            ));
        }
        out.push_str(&format!(
            "\n{} tests: {} passed, {} failed (action), {} failed (assertion), {} errors\n",
            self.total, self.passed, self.failed_action, self.failed_assertion, self.errors
        ));
        out
    }
}

/// Install, reset and launch the app under test.
#[instrument(skip_all, fields(test = %test.name, package = %test.package))]
pub fn setup_app<D: Device>(
    device: &D,
    test: &TestCase,
    options: &SuiteOptions,
    settle: Duration,
) -> Result<()> {
    if let Some(apk) = options.apk.as_ref().or(test.apk_path.as_ref()) {
        device
            .install_app(apk)
            .with_context(|| format!("install {}", apk.display()))?;
    }
    if options.reset_app {
        device
            .clear_app_data(&test.package)
            .with_context(|| format!("clear data of {}", test.package))?;
    }
    device
        .launch_app(&test.package)
        .with_context(|| format!("launch {}", test.package))?;
    if !settle.is_zero() {
        thread::sleep(settle);
    }
    info!("app ready");
    Ok(())
}

/// Run every test in order. A test that errors is recorded and the suite
/// moves on.
///
/// `make_oracle` builds the oracle for a test from its artifact layout, so
/// per-call oracle logs land next to the test's steps.
pub fn run_suite<D, O, M, F>(
    device: &D,
    mut make_oracle: M,
    config: &RunnerConfig,
    suite: &Suite,
    options: &SuiteOptions,
    artifacts_root: &Path,
    mut on_step: F,
) -> Result<SuiteSummary>
where
    D: Device,
    O: Oracle,
    M: FnMut(&TestPaths) -> O,
    F: FnMut(&TestCase, &TestVerdict),
{
    let settle = Duration::from_millis(config.settle_ms);
    let mut entries = Vec::with_capacity(suite.tests.len());
    for test in &suite.tests {
        let oracle = make_oracle(&TestPaths::new(artifacts_root, &test.name));
        let outcome = setup_app(device, test, options, settle).and_then(|()| {
            run_test(device, &oracle, config, test, artifacts_root, |verdict| {
                on_step(test, verdict);
            })
        });
        let entry = match outcome {
            Ok(result) => SuiteEntry::from_result(&result),
            Err(err) => {
                error!(test = %test.name, err = %format!("{err:#}"), "test errored");
                SuiteEntry::from_error(test, &err)
            }
        };
        entries.push(entry);
    }

    let summary = SuiteSummary::from_entries(entries);
    write_json(&artifacts_root.join("suite_summary.json"), &summary)?;
    Ok(summary)
}
