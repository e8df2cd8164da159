//! Decomposer agent: splits a test goal into an ordered subgoal checklist.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

use crate::core::subgoals::{Subgoal, SubgoalDecomposition};
use crate::io::oracle::{Oracle, OracleCall, OracleRequest};
use crate::io::prompt::PromptBuilder;

pub const MAX_SUBGOALS: usize = 7;

#[derive(Debug, Deserialize)]
struct DecompositionAnswer {
    #[serde(default)]
    subgoals: Vec<ProposedSubgoal>,
}

#[derive(Debug, Deserialize)]
struct ProposedSubgoal {
    #[serde(default)]
    id: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    detection_criteria: String,
}

#[derive(Debug, Clone)]
pub struct DecomposerAgent {
    builder: PromptBuilder,
}

impl DecomposerAgent {
    pub fn new(builder: PromptBuilder) -> Self {
        Self { builder }
    }

    /// Decompose `goal`. Never fails: an unusable answer yields the
    /// single-subgoal fallback.
    pub fn decompose<O: Oracle>(
        &self,
        oracle: &O,
        goal: &str,
        ui_summary: &str,
        screenshot: Option<&Path>,
    ) -> SubgoalDecomposition {
        match self.request(oracle, goal, ui_summary, screenshot) {
            Ok(subgoals) if !subgoals.is_empty() => {
                info!(count = subgoals.len(), "goal decomposed");
                SubgoalDecomposition::new(goal, subgoals)
            }
            Ok(_) => {
                warn!("decomposition returned no subgoals, using fallback");
                SubgoalDecomposition::fallback(goal)
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "decomposition failed, using fallback");
                SubgoalDecomposition::fallback(goal)
            }
        }
    }

    fn request<O: Oracle>(
        &self,
        oracle: &O,
        goal: &str,
        ui_summary: &str,
        screenshot: Option<&Path>,
    ) -> Result<Vec<Subgoal>> {
        let prompt = self.builder.decompose(goal, ui_summary)?;
        let answer = oracle.generate_structured(&OracleRequest::new(
            OracleCall::DecomposeGoal,
            prompt,
            screenshot,
        ))?;
        let answer: DecompositionAnswer =
            serde_json::from_value(answer).context("parse subgoal decomposition")?;
        Ok(normalize(answer.subgoals))
    }
}

/// Drop blank entries, cap the list and fill in missing ids.
fn normalize(proposed: Vec<ProposedSubgoal>) -> Vec<Subgoal> {
    proposed
        .into_iter()
        .filter(|subgoal| !subgoal.description.trim().is_empty())
        .take(MAX_SUBGOALS)
        .enumerate()
        .map(|(idx, subgoal)| {
            let id = if subgoal.id.trim().is_empty() {
                format!("subgoal_{}", idx + 1)
            } else {
                subgoal.id.trim().to_string()
            };
            Subgoal::pending(id, subgoal.description.trim(), subgoal.detection_criteria)
        })
        .collect()
}
