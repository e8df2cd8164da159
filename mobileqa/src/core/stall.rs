//! Stall detection over consecutive UI digests.
//!
//! The detector only sees digests; the loop decides how to perform a recovery.
//! Any change of the UI resets all counters.

/// Consecutive identical digests that count as a stall.
pub const STALL_WINDOW: u32 = 3;

/// Escalating recovery rungs, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Passive wait.
    Wait,
    /// Back-navigation key event.
    Back,
    /// Home key, relaunch the app, then re-check the UI.
    HomeRelaunch,
}

impl Recovery {
    pub fn as_str(self) -> &'static str {
        match self {
            Recovery::Wait => "wait",
            Recovery::Back => "back",
            Recovery::HomeRelaunch => "home+relaunch",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallCheck {
    /// UI changed, or not enough identical digests yet.
    Progressing,
    /// UI is stuck; perform this recovery instead of planning.
    Recover { attempt: u32, recovery: Recovery },
}

#[derive(Debug, Clone, Default)]
pub struct StallDetector {
    last_digest: Option<String>,
    /// Length of the current run of identical digests.
    unchanged: u32,
    recovery_attempts: u32,
}

impl StallDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the digest of a fresh snapshot.
    pub fn observe(&mut self, digest: &str) -> StallCheck {
        match &self.last_digest {
            Some(last) if last == digest => self.unchanged += 1,
            _ => {
                self.last_digest = Some(digest.to_string());
                self.unchanged = 1;
                self.recovery_attempts = 0;
            }
        }

        if self.unchanged < STALL_WINDOW {
            return StallCheck::Progressing;
        }

        self.recovery_attempts += 1;
        let recovery = match self.recovery_attempts {
            1 => Recovery::Wait,
            2 => Recovery::Back,
            _ => Recovery::HomeRelaunch,
        };
        StallCheck::Recover {
            attempt: self.recovery_attempts,
            recovery,
        }
    }

    /// After the final rung: whether the re-snapshot is still the stuck UI.
    ///
    /// A changed digest resets the detector, so the loop continues normally.
    pub fn still_stuck(&mut self, digest: &str) -> bool {
        if self.last_digest.as_deref() == Some(digest) {
            self.unchanged += 1;
            return true;
        }
        self.last_digest = Some(digest.to_string());
        self.unchanged = 1;
        self.recovery_attempts = 0;
        false
    }

    pub fn unchanged(&self) -> u32 {
        self.unchanged
    }

    pub fn recovery_attempts(&self) -> u32 {
        self.recovery_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_identical_digests_are_not_a_stall() {
        let mut detector = StallDetector::new();
        assert_eq!(detector.observe("a"), StallCheck::Progressing);
        assert_eq!(detector.observe("a"), StallCheck::Progressing);
        assert_eq!(detector.unchanged(), 2);
    }

    #[test]
    fn escalates_wait_back_home_then_stays_stuck() {
        let mut detector = StallDetector::new();
        detector.observe("a");
        detector.observe("a");
        assert_eq!(
            detector.observe("a"),
            StallCheck::Recover {
                attempt: 1,
                recovery: Recovery::Wait
            }
        );
        assert_eq!(
            detector.observe("a"),
            StallCheck::Recover {
                attempt: 2,
                recovery: Recovery::Back
            }
        );
        assert_eq!(
            detector.observe("a"),
            StallCheck::Recover {
                attempt: 3,
                recovery: Recovery::HomeRelaunch
            }
        );
        assert!(detector.still_stuck("a"));
    }

    #[test]
    fn any_change_resets_both_counters() {
        let mut detector = StallDetector::new();
        for _ in 0..4 {
            detector.observe("a");
        }
        assert_eq!(detector.recovery_attempts(), 2);

        assert_eq!(detector.observe("b"), StallCheck::Progressing);
        assert_eq!(detector.unchanged(), 1);
        assert_eq!(detector.recovery_attempts(), 0);
    }

    #[test]
    fn relaunch_that_changes_the_ui_clears_the_stall() {
        let mut detector = StallDetector::new();
        for _ in 0..5 {
            detector.observe("a");
        }
        assert!(!detector.still_stuck("b"));
        assert_eq!(detector.recovery_attempts(), 0);
        assert_eq!(detector.observe("b"), StallCheck::Progressing);
    }
}
