//! Subgoal checklist derived from a test goal.
//!
//! A decomposition is created once per test. Afterwards only subgoal status
//! fields change, and only through [`SubgoalDecomposition::apply_detections`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Detections below this confidence are ignored.
pub const MIN_DETECTION_CONFIDENCE: f64 = 0.5;

pub const FALLBACK_SUBGOAL_ID: &str = "subgoal_generic";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubgoalStatus {
    Pending,
    InProgress,
    Achieved,
    Failed,
    Skipped,
}

impl SubgoalStatus {
    /// Whether detection may still mark the subgoal achieved.
    pub fn is_open(self) -> bool {
        match self {
            SubgoalStatus::Pending | SubgoalStatus::InProgress => true,
            SubgoalStatus::Achieved | SubgoalStatus::Failed | SubgoalStatus::Skipped => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subgoal {
    pub id: String,
    pub description: String,
    pub detection_criteria: String,
    pub status: SubgoalStatus,
    #[serde(default)]
    pub achieved_at_step: Option<u32>,
    #[serde(default)]
    pub confidence: f64,
}

impl Subgoal {
    pub fn pending(
        id: impl Into<String>,
        description: impl Into<String>,
        detection_criteria: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            detection_criteria: detection_criteria.into(),
            status: SubgoalStatus::Pending,
            achieved_at_step: None,
            confidence: 0.0,
        }
    }
}

/// One subgoal reported as achieved by the detection oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub id: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub evidence: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubgoalDecomposition {
    pub test_goal: String,
    pub subgoals: Vec<Subgoal>,
    pub decomposition_timestamp: DateTime<Utc>,
}

impl SubgoalDecomposition {
    pub fn new(test_goal: impl Into<String>, subgoals: Vec<Subgoal>) -> Self {
        Self {
            test_goal: test_goal.into(),
            subgoals,
            decomposition_timestamp: Utc::now(),
        }
    }

    /// Single generic subgoal so reward tracking always has a unit to count.
    pub fn fallback(test_goal: impl Into<String>) -> Self {
        Self::new(
            test_goal,
            vec![Subgoal::pending(
                FALLBACK_SUBGOAL_ID,
                "Complete test goal",
                "Test marked as done",
            )],
        )
    }

    pub fn total(&self) -> usize {
        self.subgoals.len()
    }

    pub fn achieved_count(&self) -> usize {
        self.subgoals
            .iter()
            .filter(|subgoal| subgoal.status == SubgoalStatus::Achieved)
            .count()
    }

    pub fn pending(&self) -> Vec<&Subgoal> {
        self.subgoals
            .iter()
            .filter(|subgoal| subgoal.status.is_open())
            .collect()
    }

    pub fn has_pending(&self) -> bool {
        self.subgoals.iter().any(|subgoal| subgoal.status.is_open())
    }

    /// Mark detected subgoals achieved and return the ids newly achieved.
    ///
    /// Unknown ids, ids that are no longer open, repeats and low-confidence
    /// detections are ignored.
    pub fn apply_detections(&mut self, detections: &[Detection], step: u32) -> Vec<String> {
        let mut newly = Vec::new();
        for detection in detections {
            let confidence = detection.confidence.clamp(0.0, 1.0);
            if confidence < MIN_DETECTION_CONFIDENCE {
                continue;
            }
            let Some(subgoal) = self
                .subgoals
                .iter_mut()
                .find(|subgoal| subgoal.id == detection.id)
            else {
                continue;
            };
            if !subgoal.status.is_open() {
                continue;
            }
            subgoal.status = SubgoalStatus::Achieved;
            subgoal.achieved_at_step = Some(step);
            subgoal.confidence = confidence;
            newly.push(subgoal.id.clone());
        }
        newly
    }
}
