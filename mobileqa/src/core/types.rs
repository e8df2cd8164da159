//! Shared deterministic types for the orchestration core.
//!
//! These types define stable contracts between the executor, the supervisor
//! and the loop. They are serialized into step artifacts verbatim.

use serde::{Deserialize, Serialize};

use crate::core::reward::StepReward;

/// Outcome of attempting one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub message: String,
    /// Empty on success, never empty on failure.
    pub error: String,
}

impl ExecutionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            error: String::new(),
        }
    }

    pub fn failed(message: impl Into<String>, error: impl Into<String>) -> Self {
        let message = message.into();
        let mut error = error.into();
        if error.trim().is_empty() {
            error = if message.trim().is_empty() {
                "unknown execution error".to_string()
            } else {
                message.clone()
            };
        }
        Self {
            success: false,
            message,
            error,
        }
    }

    /// Failure detail, falling back to the message.
    pub fn detail(&self) -> &str {
        if self.error.is_empty() {
            &self.message
        } else {
            &self.error
        }
    }
}

/// Verdict of a single step or of a whole test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Pass,
    FailAction,
    FailAssertion,
    /// The only non-terminal verdict.
    Running,
}

impl Verdict {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Verdict::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Pass => "PASS",
            Verdict::FailAction => "FAIL_ACTION",
            Verdict::FailAssertion => "FAIL_ASSERTION",
            Verdict::Running => "RUNNING",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict rendered by the supervisor for one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestVerdict {
    pub verdict: Verdict,
    pub reason: String,
    pub step_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default)]
    pub subgoals_achieved: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_reward: Option<StepReward>,
}

impl TestVerdict {
    pub fn new(verdict: Verdict, reason: impl Into<String>, step_number: u32) -> Self {
        Self {
            verdict,
            reason: reason.into(),
            step_number,
            details: None,
            subgoals_achieved: Vec::new(),
            step_reward: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        let details = details.into();
        self.details = (!details.is_empty()).then_some(details);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.verdict.is_terminal()
    }
}
