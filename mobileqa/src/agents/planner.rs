//! Planner agent: asks the oracle for the next action and validates it.

use std::path::Path;

use tracing::{debug, warn};

use crate::core::action::{Action, check_visible, parse_action};
use crate::io::oracle::{Oracle, OracleCall, OracleRequest};
use crate::io::prompt::{PlanInputs, PromptBuilder};

#[derive(Debug, Clone)]
pub struct PlannerAgent {
    builder: PromptBuilder,
}

impl PlannerAgent {
    pub fn new(builder: PromptBuilder) -> Self {
        Self { builder }
    }

    /// Propose one action for the current screen.
    ///
    /// The error is the reason the proposal was rejected; an oracle failure
    /// counts as a rejected proposal.
    pub fn propose<O: Oracle>(
        &self,
        oracle: &O,
        inputs: &PlanInputs<'_>,
        screenshot: Option<&Path>,
    ) -> Result<Action, String> {
        let prompt = self
            .builder
            .plan(inputs)
            .map_err(|err| format!("render planner prompt: {err:#}"))?;
        let raw = oracle
            .generate_structured(&OracleRequest::new(OracleCall::Plan, prompt, screenshot))
            .map_err(|err| {
                warn!(step = inputs.step, err = %err, "planner call failed");
                format!("Planner returned no usable action: {err:#}")
            })?;
        debug!(step = inputs.step, %raw, "planner proposal");
        let action = parse_action(&raw)?;
        check_visible(&action, inputs.ui_summary)?;
        Ok(action)
    }
}
