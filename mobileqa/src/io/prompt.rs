//! Prompt rendering for every oracle call site.
//!
//! Templates mark their sections with `<!-- section:KEY required|droppable -->`.
//! When a rendered prompt exceeds the byte budget, droppable sections go first
//! and the last section is truncated as a final resort.

use std::sync::LazyLock;

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::core::subgoals::Subgoal;

const PLANNER_TEMPLATE: &str = include_str!("prompts/planner.md");
const VERIFY_ASSERTION_TEMPLATE: &str = include_str!("prompts/verify_assertion.md");
const VERIFY_FINAL_STATE_TEMPLATE: &str = include_str!("prompts/verify_final_state.md");
const DETECT_SUBGOALS_TEMPLATE: &str = include_str!("prompts/detect_subgoals.md");
const DECOMPOSE_TEMPLATE: &str = include_str!("prompts/decompose.md");

/// Drop order when over budget.
const DROP_ORDER: [&str; 2] = ["examples", "history"];

/// One previously executed action, as shown to the planner.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub action_type: String,
    pub description: String,
}

/// Inputs for the planner prompt.
#[derive(Debug, Clone)]
pub struct PlanInputs<'a> {
    pub goal: &'a str,
    pub step: u32,
    pub history: &'a [HistoryEntry],
    pub ui_summary: &'a str,
    /// Validation failure of the previous proposal, on re-plan.
    pub feedback: Option<&'a str>,
}

/// Inputs for the subgoal-detection prompt.
#[derive(Debug, Clone)]
pub struct DetectionInputs<'a> {
    pub goal: &'a str,
    pub pending: &'a [&'a Subgoal],
    pub action_type: &'a str,
    pub action_description: &'a str,
    pub success: bool,
    pub result_message: &'a str,
    pub ui_summary: &'a str,
}

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("planner", PLANNER_TEMPLATE)?;
        env.add_template("verify_assertion", VERIFY_ASSERTION_TEMPLATE)?;
        env.add_template("verify_final_state", VERIFY_FINAL_STATE_TEMPLATE)?;
        env.add_template("detect_subgoals", DETECT_SUBGOALS_TEMPLATE)?;
        env.add_template("decompose", DECOMPOSE_TEMPLATE)?;
        Ok(Self { env })
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String> {
        Ok(self.env.get_template(name)?.render(ctx)?)
    }
}

/// Subgoal fields exposed to templates.
#[derive(Debug, Clone, Serialize)]
struct SubgoalContext<'a> {
    id: &'a str,
    description: &'a str,
    detection_criteria: &'a str,
}

/// Builds prompts within a byte budget, dropping less critical sections first.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn plan(&self, input: &PlanInputs<'_>) -> Result<String> {
        let rendered = PromptEngine::new()?.render(
            "planner",
            context! {
                goal => input.goal.trim(),
                step => input.step,
                history => input.history,
                ui_summary => non_empty_ui(input.ui_summary),
                feedback => input.feedback.map(str::trim).filter(|s| !s.is_empty()),
            },
        )?;
        Ok(self.fit(&rendered))
    }

    pub fn verify_assertion(&self, goal: &str, assertion: &str, ui_summary: &str) -> Result<String> {
        let rendered = PromptEngine::new()?.render(
            "verify_assertion",
            context! {
                goal => goal.trim(),
                assertion => assertion.trim(),
                ui_summary => non_empty_ui(ui_summary),
            },
        )?;
        Ok(self.fit(&rendered))
    }

    pub fn verify_final_state(&self, goal: &str, ui_summary: &str) -> Result<String> {
        let rendered = PromptEngine::new()?.render(
            "verify_final_state",
            context! {
                goal => goal.trim(),
                ui_summary => non_empty_ui(ui_summary),
            },
        )?;
        Ok(self.fit(&rendered))
    }

    pub fn detect_subgoals(&self, input: &DetectionInputs<'_>) -> Result<String> {
        let subgoals: Vec<SubgoalContext<'_>> = input
            .pending
            .iter()
            .map(|subgoal| SubgoalContext {
                id: &subgoal.id,
                description: &subgoal.description,
                detection_criteria: &subgoal.detection_criteria,
            })
            .collect();
        let rendered = PromptEngine::new()?.render(
            "detect_subgoals",
            context! {
                goal => input.goal.trim(),
                subgoals => subgoals,
                action_type => input.action_type,
                action_description => input.action_description,
                success => input.success,
                result_message => input.result_message,
                ui_summary => non_empty_ui(input.ui_summary),
            },
        )?;
        Ok(self.fit(&rendered))
    }

    pub fn decompose(&self, goal: &str, ui_summary: &str) -> Result<String> {
        let rendered = PromptEngine::new()?.render(
            "decompose",
            context! {
                goal => goal.trim(),
                ui_summary => non_empty_ui(ui_summary),
            },
        )?;
        Ok(self.fit(&rendered))
    }

    fn fit(&self, rendered: &str) -> String {
        let mut sections = parse_sections(rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        render_sections(&sections)
    }
}

fn non_empty_ui(summary: &str) -> &str {
    let summary = summary.trim();
    if summary.is_empty() {
        "(no visible elements)"
    } else {
        summary
    }
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    /// Section content without its marker.
    content: String,
}

fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    static SECTION_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
        regex::Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
            .expect("valid section regex")
    });

    let markers: Vec<(usize, usize, String, bool)> = SECTION_RE
        .captures_iter(rendered)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some((
                whole.start(),
                whole.end(),
                caps.get(1)?.as_str().to_string(),
                caps.get(2)?.as_str() == "required",
            ))
        })
        .collect();

    let mut sections = Vec::new();
    for (i, (_, end, key, required)) in markers.iter().enumerate() {
        let next = markers
            .get(i + 1)
            .map_or(rendered.len(), |(start, ..)| *start);
        let content = rendered[*end..next].trim().to_string();
        if !content.is_empty() || *required {
            sections.push(ParsedSection {
                key: key.clone(),
                required: *required,
                content,
            });
        }
    }
    sections
}

fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total_len =
        |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    if total_len(sections) <= budget {
        return;
    }
    let other_len: usize = sections
        .iter()
        .rev()
        .skip(1)
        .map(|s| s.content.len())
        .sum();
    let allowed = budget.saturating_sub(other_len);
    if let Some(last) = sections.last_mut() {
        let before_len = last.content.len();
        let marker = "\n[truncated]";
        let keep = floor_char_boundary(&last.content, allowed.saturating_sub(marker.len()));
        last.content.truncate(keep);
        last.content.push_str(marker);
        debug!(
            section = last.key,
            before_len,
            after_len = last.content.len(),
            "truncated section for budget"
        );
    }
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    (0..=index)
        .rev()
        .find(|&i| text.is_char_boundary(i))
        .unwrap_or(0)
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
