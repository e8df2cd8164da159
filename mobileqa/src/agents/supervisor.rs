//! Supervisor agent: renders a verdict for each executed step.
//!
//! Besides the verdict it owns subgoal detection and reward accounting, both
//! of which only run for steps inside the budget.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::core::action::{Action, ActionKind};
use crate::core::reward::RewardCalculator;
use crate::core::subgoals::{Detection, SubgoalDecomposition};
use crate::core::types::{ExecutionResult, TestVerdict, Verdict};
use crate::io::oracle::{Oracle, OracleCall, OracleRequest};
use crate::io::prompt::{DetectionInputs, PromptBuilder};

/// Everything the supervisor needs to judge one step.
#[derive(Debug, Clone)]
pub struct StepContext<'a> {
    pub goal: &'a str,
    pub step: u32,
    pub action: &'a Action,
    pub result: &'a ExecutionResult,
    /// UI summary captured after the action.
    pub ui_summary: &'a str,
    /// Screenshot captured after the action.
    pub screenshot: Option<&'a Path>,
}

/// Boolean judgment plus the oracle's explanation.
#[derive(Debug, Clone, PartialEq)]
pub struct Judgment {
    pub holds: bool,
    pub explanation: String,
}

impl Judgment {
    /// Missing or non-boolean fields count as false.
    fn from_answer(answer: &Value, field: &str) -> Self {
        Self {
            holds: answer.get(field).and_then(Value::as_bool).unwrap_or(false),
            explanation: answer
                .get("explanation")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DetectionAnswer {
    #[serde(default)]
    achieved: Vec<Detection>,
}

#[derive(Debug, Clone)]
pub struct SupervisorAgent {
    max_steps: u32,
    builder: PromptBuilder,
}

impl SupervisorAgent {
    pub fn new(max_steps: u32, builder: PromptBuilder) -> Self {
        Self { max_steps, builder }
    }

    /// Verdict for a loop that ran out of steps without a terminal verdict.
    pub fn budget_exhausted(&self, step: u32) -> TestVerdict {
        TestVerdict::new(
            Verdict::FailAction,
            format!("Test exceeded maximum steps ({})", self.max_steps),
            step,
        )
        .with_details("Test timeout - too many steps without completion")
    }

    /// Judge one executed step, updating subgoals and rewards.
    pub fn evaluate_step<O: Oracle>(
        &self,
        oracle: &O,
        ctx: &StepContext<'_>,
        subgoals: &mut SubgoalDecomposition,
        rewards: &mut RewardCalculator,
    ) -> TestVerdict {
        if ctx.step >= self.max_steps {
            return self.budget_exhausted(ctx.step);
        }

        let mut verdict = self.judge(oracle, ctx);
        let newly = self.detect_subgoals(oracle, ctx, subgoals);
        if !newly.is_empty() {
            info!(step = ctx.step, achieved = ?newly, "subgoals achieved");
        }
        verdict.step_reward = Some(rewards.step_reward(ctx.step, &newly));
        verdict.subgoals_achieved = newly;
        verdict
    }

    fn judge<O: Oracle>(&self, oracle: &O, ctx: &StepContext<'_>) -> TestVerdict {
        let step = ctx.step;
        let description = &ctx.action.description;

        if !ctx.result.success && !ctx.action.is_assert() {
            return TestVerdict::new(
                Verdict::FailAction,
                format!("Failed to execute action: {description}"),
                step,
            )
            .with_details(ctx.result.detail());
        }

        match &ctx.action.kind {
            ActionKind::Done => match self.verify_final_state(oracle, ctx) {
                Ok(judgment) if judgment.holds => {
                    TestVerdict::new(Verdict::Pass, "Test goal achieved", step)
                        .with_details(judgment.explanation)
                }
                Ok(judgment) => {
                    TestVerdict::new(Verdict::FailAssertion, "Test goal not achieved", step)
                        .with_details(judgment.explanation)
                }
                Err(err) => {
                    TestVerdict::new(Verdict::FailAssertion, "Failed to verify final state", step)
                        .with_details(format!("Oracle verification error: {err:#}"))
                }
            },
            ActionKind::Assert(assert) => {
                let condition = &assert.condition;
                match self.verify_assertion(oracle, ctx, condition) {
                    Ok(judgment) if judgment.holds => TestVerdict::new(
                        Verdict::Running,
                        format!("Assertion passed: {condition}"),
                        step,
                    )
                    .with_details(judgment.explanation),
                    Ok(judgment) => TestVerdict::new(
                        Verdict::FailAssertion,
                        format!("Assertion failed: {condition}"),
                        step,
                    )
                    .with_details(judgment.explanation),
                    Err(err) => TestVerdict::new(
                        Verdict::FailAssertion,
                        format!("Failed to verify assertion: {condition}"),
                        step,
                    )
                    .with_details(format!("Oracle verification error: {err:#}")),
                }
            }
            _ => TestVerdict::new(
                Verdict::Running,
                format!("Step {step} completed: {description}"),
                step,
            ),
        }
    }

    pub fn verify_assertion<O: Oracle>(
        &self,
        oracle: &O,
        ctx: &StepContext<'_>,
        condition: &str,
    ) -> Result<Judgment> {
        let prompt = self
            .builder
            .verify_assertion(ctx.goal, condition, ctx.ui_summary)?;
        let answer = oracle
            .generate_structured(&OracleRequest::new(
                OracleCall::VerifyAssertion,
                prompt,
                ctx.screenshot,
            ))
            .context("verify assertion")?;
        Ok(Judgment::from_answer(&answer, "assertion_holds"))
    }

    pub fn verify_final_state<O: Oracle>(
        &self,
        oracle: &O,
        ctx: &StepContext<'_>,
    ) -> Result<Judgment> {
        let prompt = self.builder.verify_final_state(ctx.goal, ctx.ui_summary)?;
        let answer = oracle
            .generate_structured(&OracleRequest::new(
                OracleCall::VerifyFinalState,
                prompt,
                ctx.screenshot,
            ))
            .context("verify final state")?;
        Ok(Judgment::from_answer(&answer, "goal_achieved"))
    }

    /// Ask which pending subgoals this step achieved; failures yield none.
    fn detect_subgoals<O: Oracle>(
        &self,
        oracle: &O,
        ctx: &StepContext<'_>,
        subgoals: &mut SubgoalDecomposition,
    ) -> Vec<String> {
        if !subgoals.has_pending() {
            return Vec::new();
        }
        match self.request_detections(oracle, ctx, subgoals) {
            Ok(detections) => subgoals.apply_detections(&detections, ctx.step),
            Err(err) => {
                warn!(step = ctx.step, err = %format!("{err:#}"), "subgoal detection failed");
                Vec::new()
            }
        }
    }

    fn request_detections<O: Oracle>(
        &self,
        oracle: &O,
        ctx: &StepContext<'_>,
        subgoals: &SubgoalDecomposition,
    ) -> Result<Vec<Detection>> {
        let pending = subgoals.pending();
        let message = if ctx.result.success {
            &ctx.result.message
        } else {
            &ctx.result.error
        };
        let prompt = self.builder.detect_subgoals(&DetectionInputs {
            goal: ctx.goal,
            pending: &pending,
            action_type: ctx.action.action_type(),
            action_description: &ctx.action.description,
            success: ctx.result.success,
            result_message: message,
            ui_summary: ctx.ui_summary,
        })?;
        let answer = oracle.generate_structured(&OracleRequest::new(
            OracleCall::DetectSubgoals,
            prompt,
            ctx.screenshot,
        ))?;
        let answer: DetectionAnswer =
            serde_json::from_value(answer).context("parse subgoal detection")?;
        debug!(step = ctx.step, detections = answer.achieved.len(), "subgoal detection");
        Ok(answer.achieved)
    }
}
