//! Automatic dismissal of permission and onboarding popups.
//!
//! Runs once per step before stall detection so dialogs never reach the
//! planner.

use std::collections::HashSet;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::core::ui::UiSnapshot;
use crate::io::device::Device;
use crate::io::uixml::parse_snapshot;

/// Button labels that dismiss common popups, in priority order.
pub const POPUP_LABELS: [&str; 11] = [
    "Allow",
    "ALLOW",
    "While using the app",
    "Continue",
    "Continue without sync",
    "Not now",
    "OK",
    "Got it",
    "USE THIS FOLDER",
    "Grant",
    "Permit",
];

/// UI state after popup handling.
#[derive(Debug, Clone)]
pub struct PopupOutcome {
    pub snapshot: UiSnapshot,
    pub xml: String,
    /// Number of popup buttons tapped.
    pub handled: u32,
}

impl PopupOutcome {
    /// Contents of `auto_handled_popup.txt`.
    pub fn report(&self) -> String {
        format!(
            "auto_handled_popup=true\nTapped locations: {}\n",
            self.handled
        )
    }
}

/// Tap popup buttons until none is left or `max_rounds` is reached.
///
/// A location is tapped at most once per call, so a button that survives its
/// own tap cannot loop.
pub fn dismiss_popups<D: Device>(
    device: &D,
    snapshot: UiSnapshot,
    xml: String,
    max_rounds: u32,
    settle: Duration,
) -> Result<PopupOutcome> {
    let mut outcome = PopupOutcome {
        snapshot,
        xml,
        handled: 0,
    };
    let mut tapped = HashSet::new();

    for round in 1..=max_rounds {
        let Some((label, (x, y))) = next_popup_target(&outcome.snapshot, &tapped) else {
            break;
        };
        info!(round, label, x, y, "dismissing popup");
        if let Err(err) = device.tap(x, y) {
            warn!(err = %err, label, "popup tap failed");
            break;
        }
        tapped.insert(format!("{label}_{x}_{y}"));
        outcome.handled += 1;
        if !settle.is_zero() {
            thread::sleep(settle);
        }
        outcome.xml = device.dump_ui().context("dump UI after popup tap")?;
        outcome.snapshot = parse_snapshot(&outcome.xml)?;
    }

    if outcome.handled > 0 {
        debug!(handled = outcome.handled, "popups handled");
    }
    Ok(outcome)
}

fn next_popup_target(
    snapshot: &UiSnapshot,
    tapped: &HashSet<String>,
) -> Option<(&'static str, (i32, i32))> {
    POPUP_LABELS.iter().find_map(|&label| {
        let node = snapshot.find_containing(label).into_iter().next()?;
        let (x, y) = node.center();
        (!tapped.contains(&format!("{label}_{x}_{y}"))).then_some((label, (x, y)))
    })
}
