//! Orchestration for a single step of a test run.
//!
//! A step captures the screen, dismisses popups, checks for a stall, obtains
//! a valid action (re-planning once), executes it and asks the supervisor for
//! a verdict. Every intermediate is persisted under the step directory.

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::agents::executor::ExecutorAgent;
use crate::agents::planner::PlannerAgent;
use crate::agents::supervisor::{StepContext, SupervisorAgent};
use crate::core::action::{Action, ActionKind};
use crate::core::reward::RewardCalculator;
use crate::core::stall::{Recovery, StallCheck, StallDetector};
use crate::core::subgoals::SubgoalDecomposition;
use crate::core::types::{ExecutionResult, TestVerdict, Verdict};
use crate::core::ui::{UiSnapshot, digest};
use crate::io::artifacts::{StepPaths, TestPaths, write_json, write_text};
use crate::io::config::{RunnerConfig, TestCase};
use crate::io::device::{Device, keycode};
use crate::io::oracle::Oracle;
use crate::io::prompt::{HistoryEntry, PlanInputs, PromptBuilder};
use crate::io::uixml::parse_snapshot;
use crate::popup::dismiss_popups;

pub const STUCK_REASON: &str = "UI stuck - unchanged after recovery attempts";
pub const REPLAN_REASON: &str = "invalid action schema after replan";

/// Mutable state of one test run, advanced one step at a time.
pub struct TestSession<'a, D: Device, O: Oracle> {
    device: &'a D,
    oracle: &'a O,
    config: &'a RunnerConfig,
    test: &'a TestCase,
    paths: &'a TestPaths,
    goal: String,
    planner: PlannerAgent,
    executor: ExecutorAgent,
    supervisor: SupervisorAgent,
    stall: StallDetector,
    history: Vec<HistoryEntry>,
    subgoals: SubgoalDecomposition,
    rewards: RewardCalculator,
}

/// Screen state captured at one point of a step.
struct Capture {
    snapshot: UiSnapshot,
    summary: String,
}

impl<'a, D: Device, O: Oracle> TestSession<'a, D, O> {
    pub fn new(
        device: &'a D,
        oracle: &'a O,
        config: &'a RunnerConfig,
        test: &'a TestCase,
        paths: &'a TestPaths,
        subgoals: SubgoalDecomposition,
    ) -> Self {
        let builder = PromptBuilder::new(config.oracle.prompt_budget_bytes);
        let rewards = RewardCalculator::new(subgoals.total());
        Self {
            device,
            oracle,
            config,
            test,
            paths,
            goal: test.full_goal(),
            planner: PlannerAgent::new(builder.clone()),
            executor: ExecutorAgent::new(config.max_retries),
            supervisor: SupervisorAgent::new(config.max_steps, builder),
            stall: StallDetector::new(),
            history: Vec::new(),
            subgoals,
            rewards,
        }
    }

    pub fn supervisor(&self) -> &SupervisorAgent {
        &self.supervisor
    }

    pub fn subgoals(&self) -> &SubgoalDecomposition {
        &self.subgoals
    }

    pub fn rewards(&self) -> &RewardCalculator {
        &self.rewards
    }

    /// Run one step. `None` means the step was spent on stall recovery.
    #[instrument(skip_all, fields(test = %self.test.name, step = step))]
    pub fn run_step(&mut self, step: u32) -> Result<Option<TestVerdict>> {
        let paths = self.paths.step(step);
        paths.create()?;

        let capture = self.capture_pre_action(&paths)?;

        if let StallCheck::Recover { attempt, recovery } =
            self.stall.observe(&digest(&capture.summary))
        {
            return self.recover(step, &paths, attempt, recovery);
        }

        let action = match self.acquire_action(step, &paths, &capture)? {
            Ok(action) => action,
            Err(verdict) => return Ok(Some(verdict)),
        };
        write_json(&paths.action, &action)?;
        info!(step, action_type = action.action_type(), description = %action.description, "executing action");

        let result = self.executor.execute(self.device, &action);
        write_json(&paths.execution_result, &result)?;
        if settles_after(&action, &result) {
            sleep_ms(self.config.settle_ms);
        }

        self.device
            .screenshot(&paths.screenshot_post)
            .context("capture post-action screenshot")?;
        let post_xml = self.device.dump_ui().context("dump post-action UI")?;
        write_text(&paths.ui_post, &post_xml)?;
        let post_summary = parse_snapshot(&post_xml)?.summary();

        self.history.push(HistoryEntry {
            action_type: action.action_type().to_string(),
            description: action.description.clone(),
        });

        let ctx = StepContext {
            goal: &self.goal,
            step,
            action: &action,
            result: &result,
            ui_summary: &post_summary,
            screenshot: Some(paths.screenshot_post.as_path()),
        };
        let verdict =
            self.supervisor
                .evaluate_step(self.oracle, &ctx, &mut self.subgoals, &mut self.rewards);
        write_json(&paths.verdict, &verdict)?;
        info!(step, verdict = %verdict.verdict, reason = %verdict.reason, "step verdict");
        Ok(Some(verdict))
    }

    /// Dump the UI, clear popups, then record the settled screen.
    fn capture_pre_action(&self, paths: &StepPaths) -> Result<Capture> {
        let xml = self.device.dump_ui().context("dump UI")?;
        let snapshot = parse_snapshot(&xml)?;
        let popups = dismiss_popups(
            self.device,
            snapshot,
            xml,
            self.config.popup_max_attempts,
            Duration::from_millis(self.config.settle_ms),
        )?;
        if popups.handled > 0 {
            write_text(&paths.auto_handled_popup, &popups.report())?;
        }

        self.device
            .screenshot(&paths.screenshot)
            .context("capture screenshot")?;
        write_text(&paths.ui_xml, &popups.xml)?;
        let summary = popups.snapshot.summary();
        write_text(&paths.ui_summary, &summary)?;
        Ok(Capture {
            snapshot: popups.snapshot,
            summary,
        })
    }

    /// Plan, validate, and re-plan once with the rejection as feedback.
    ///
    /// The inner `Err` is the terminal verdict after two rejections.
    fn acquire_action(
        &self,
        step: u32,
        paths: &StepPaths,
        capture: &Capture,
    ) -> Result<Result<Action, TestVerdict>> {
        debug!(step, nodes = capture.snapshot.nodes().len(), "planning");
        let mut inputs = PlanInputs {
            goal: &self.goal,
            step,
            history: &self.history,
            ui_summary: &capture.summary,
            feedback: None,
        };
        let first = match self
            .planner
            .propose(self.oracle, &inputs, Some(paths.screenshot.as_path()))
        {
            Ok(action) => return Ok(Ok(action)),
            Err(reason) => reason,
        };
        warn!(step, reason = %first, "invalid action, re-planning");
        write_text(&paths.validation_error, &first)?;

        inputs.feedback = Some(first.as_str());
        match self
            .planner
            .propose(self.oracle, &inputs, Some(paths.screenshot.as_path()))
        {
            Ok(action) => Ok(Ok(action)),
            Err(reason) => {
                warn!(step, reason = %reason, "invalid action after re-plan");
                write_text(&paths.validation_error_final, &reason)?;
                let verdict = TestVerdict::new(Verdict::FailAction, REPLAN_REASON, step)
                    .with_details(format!("Planner output invalid action twice: {reason}"));
                write_json(&paths.verdict, &verdict)?;
                Ok(Err(verdict))
            }
        }
    }

    fn recover(
        &mut self,
        step: u32,
        paths: &StepPaths,
        attempt: u32,
        recovery: Recovery,
    ) -> Result<Option<TestVerdict>> {
        warn!(
            step,
            attempt,
            recovery = recovery.as_str(),
            unchanged = self.stall.unchanged(),
            "UI unchanged, recovering"
        );
        write_text(
            &paths.recovery,
            &format!(
                "recovery_attempt={attempt}\nrecovery={}\nunchanged_steps={}\n",
                recovery.as_str(),
                self.stall.unchanged()
            ),
        )?;

        match recovery {
            Recovery::Wait => sleep_ms(self.config.recovery_wait_ms),
            Recovery::Back => {
                if let Err(err) = self.device.key_event(keycode::BACK) {
                    warn!(err = %err, "back recovery failed");
                }
            }
            Recovery::HomeRelaunch => {
                if let Err(err) = self.device.key_event(keycode::HOME) {
                    warn!(err = %err, "home recovery failed");
                }
                if let Err(err) = self.device.launch_app(&self.test.package) {
                    warn!(err = %err, package = %self.test.package, "relaunch failed");
                }
                sleep_ms(self.config.settle_ms);

                let xml = self.device.dump_ui().context("dump UI after relaunch")?;
                let summary = parse_snapshot(&xml)?.summary();
                if self.stall.still_stuck(&digest(&summary)) {
                    let verdict = TestVerdict::new(Verdict::FailAction, STUCK_REASON, step)
                        .with_details("UI state did not change for 3+ steps despite recovery");
                    write_json(&paths.verdict, &verdict)?;
                    return Ok(Some(verdict));
                }
                info!(step, "UI changed after relaunch");
            }
        }
        Ok(None)
    }
}

fn settles_after(action: &Action, result: &ExecutionResult) -> bool {
    result.success && !matches!(action.kind, ActionKind::Wait(_) | ActionKind::Done)
}

fn sleep_ms(ms: u64) {
    if ms > 0 {
        thread::sleep(Duration::from_millis(ms));
    }
}

/// Human-readable one-line trail of a step, used in CLI progress output.
pub fn describe_verdict(verdict: &TestVerdict) -> String {
    match &verdict.details {
        Some(details) => format!(
            "step {}: {} - {} ({details})",
            verdict.step_number, verdict.verdict, verdict.reason
        ),
        None => format!(
            "step {}: {} - {}",
            verdict.step_number, verdict.verdict, verdict.reason
        ),
    }
}
