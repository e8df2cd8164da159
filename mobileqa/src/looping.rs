//! Multi-step loop for one test: decompose, step until a verdict, persist.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::agents::decomposer::DecomposerAgent;
use crate::core::reward::RewardSummary;
use crate::core::subgoals::Subgoal;
use crate::core::types::{TestVerdict, Verdict};
use crate::io::artifacts::{TestPaths, write_json, write_text};
use crate::io::config::{RunnerConfig, TestCase};
use crate::io::device::Device;
use crate::io::oracle::Oracle;
use crate::io::prompt::PromptBuilder;
use crate::io::uixml::parse_snapshot;
use crate::step::TestSession;

/// Reward figures repeated in `test_result.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardBrief {
    pub final_reward: f64,
    pub step_penalty: f64,
    pub subgoal_reward: f64,
    pub completion_bonus: f64,
    pub subgoals_achieved: usize,
    pub total_subgoals: usize,
    pub completion_rate: f64,
}

impl From<&RewardSummary> for RewardBrief {
    fn from(summary: &RewardSummary) -> Self {
        Self {
            final_reward: summary.final_reward,
            step_penalty: summary.total_step_penalty,
            subgoal_reward: summary.total_subgoal_reward,
            completion_bonus: summary.completion_bonus,
            subgoals_achieved: summary.subgoals_achieved,
            total_subgoals: summary.total_subgoals,
            completion_rate: summary.subgoal_completion_rate,
        }
    }
}

/// Final record of one test run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub test_name: String,
    pub goal: String,
    /// Always terminal.
    pub verdict: Verdict,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub total_steps: u32,
    pub artifacts_dir: PathBuf,
    pub reward: RewardBrief,
    pub subgoals: Vec<Subgoal>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl TestResult {
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }
}

/// Run one test from its current screen to a terminal verdict.
///
/// `on_step` sees every step verdict, including the terminal one.
#[instrument(skip_all, fields(test = %test.name))]
pub fn run_test<D: Device, O: Oracle, F: FnMut(&TestVerdict)>(
    device: &D,
    oracle: &O,
    config: &RunnerConfig,
    test: &TestCase,
    artifacts_root: &Path,
    mut on_step: F,
) -> Result<TestResult> {
    let started_at = Utc::now();
    let paths = TestPaths::new(artifacts_root, &test.name);
    paths.create()?;
    let goal = test.full_goal();
    info!(goal = %goal, "starting test");

    device
        .screenshot(&paths.initial_screenshot)
        .context("capture initial screenshot")?;
    let initial_xml = device.dump_ui().context("dump initial UI")?;
    write_text(&paths.initial_ui, &initial_xml)?;
    let initial_summary = parse_snapshot(&initial_xml)?.summary();

    let builder = PromptBuilder::new(config.oracle.prompt_budget_bytes);
    let decomposition = DecomposerAgent::new(builder).decompose(
        oracle,
        &goal,
        &initial_summary,
        Some(paths.initial_screenshot.as_path()),
    );
    write_json(&paths.subgoals, &decomposition)?;

    let mut session = TestSession::new(device, oracle, config, test, &paths, decomposition);
    let mut last_step = 0;
    let mut terminal = None;
    for step in 1..=config.max_steps {
        last_step = step;
        let Some(verdict) = session.run_step(step)? else {
            continue;
        };
        on_step(&verdict);
        if verdict.is_terminal() {
            terminal = Some(verdict);
            break;
        }
    }
    let verdict = match terminal {
        Some(verdict) => verdict,
        None => {
            let verdict = session
                .supervisor()
                .budget_exhausted(last_step)
                .with_details("Test did not complete within step limit");
            on_step(&verdict);
            verdict
        }
    };

    let passed = verdict.verdict == Verdict::Pass;
    let summary = session.rewards().final_summary(last_step, passed);
    write_json(&paths.subgoals_final, session.subgoals())?;
    write_json(&paths.reward_summary, &summary)?;

    let result = TestResult {
        test_name: test.name.clone(),
        goal,
        verdict: verdict.verdict,
        reason: verdict.reason,
        details: verdict.details,
        total_steps: last_step,
        artifacts_dir: paths.dir.clone(),
        reward: RewardBrief::from(&summary),
        subgoals: session.subgoals().subgoals.clone(),
        started_at,
        finished_at: Utc::now(),
    };
    write_json(&paths.test_result, &result)?;
    info!(
        verdict = %result.verdict,
        steps = result.total_steps,
        final_reward = result.reward.final_reward,
        "test finished"
    );
    Ok(result)
}
