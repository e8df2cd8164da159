//! Deterministic reward accounting.

use serde::{Deserialize, Serialize};

pub const STEP_PENALTY: f64 = -0.05;
pub const SUBGOAL_REWARD: f64 = 0.2;
pub const COMPLETION_BONUS: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReward {
    pub step_number: u32,
    pub step_penalty: f64,
    pub subgoal_reward: f64,
    pub subgoals_achieved_this_step: Vec<String>,
    pub cumulative_reward: f64,
    pub total_subgoals_achieved: usize,
    pub total_subgoals: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardSummary {
    pub total_steps: u32,
    pub total_step_penalty: f64,
    pub total_subgoal_reward: f64,
    pub completion_bonus: f64,
    pub final_reward: f64,
    pub subgoals_achieved: usize,
    pub total_subgoals: usize,
    pub subgoal_completion_rate: f64,
    pub step_rewards: Vec<StepReward>,
}

/// Running reward totals for one test.
#[derive(Debug, Clone)]
pub struct RewardCalculator {
    total_subgoals: usize,
    cumulative_reward: f64,
    achieved: usize,
    step_rewards: Vec<StepReward>,
}

impl RewardCalculator {
    pub fn new(total_subgoals: usize) -> Self {
        Self {
            total_subgoals,
            cumulative_reward: 0.0,
            achieved: 0,
            step_rewards: Vec::new(),
        }
    }

    /// Record one step and return its reward breakdown.
    pub fn step_reward(&mut self, step_number: u32, achieved_this_step: &[String]) -> StepReward {
        let subgoal_reward = achieved_this_step.len() as f64 * SUBGOAL_REWARD;
        self.achieved += achieved_this_step.len();
        self.cumulative_reward += STEP_PENALTY + subgoal_reward;

        let reward = StepReward {
            step_number,
            step_penalty: STEP_PENALTY,
            subgoal_reward,
            subgoals_achieved_this_step: achieved_this_step.to_vec(),
            cumulative_reward: self.cumulative_reward,
            total_subgoals_achieved: self.achieved,
            total_subgoals: self.total_subgoals,
        };
        self.step_rewards.push(reward.clone());
        reward
    }

    pub fn step_rewards(&self) -> &[StepReward] {
        &self.step_rewards
    }

    /// Final summary; the completion bonus is granted only when `passed`.
    pub fn final_summary(&self, total_steps: u32, passed: bool) -> RewardSummary {
        let total_step_penalty = f64::from(total_steps) * STEP_PENALTY;
        let total_subgoal_reward = self.achieved as f64 * SUBGOAL_REWARD;
        let completion_bonus = if passed { COMPLETION_BONUS } else { 0.0 };
        let subgoal_completion_rate = if self.total_subgoals > 0 {
            self.achieved as f64 / self.total_subgoals as f64
        } else {
            0.0
        };

        RewardSummary {
            total_steps,
            total_step_penalty,
            total_subgoal_reward,
            completion_bonus,
            final_reward: total_step_penalty + total_subgoal_reward + completion_bonus,
            subgoals_achieved: self.achieved,
            total_subgoals: self.total_subgoals,
            subgoal_completion_rate,
            step_rewards: self.step_rewards.clone(),
        }
    }
}
