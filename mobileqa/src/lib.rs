//! Goal-directed test runner for Android apps.
//!
//! A natural-language test goal is turned into a bounded sequence of device
//! actions by three cooperating roles: a planner proposes the next action, an
//! executor performs it, and a supervisor judges the result. The architecture
//! enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (UI model, action validation,
//!   stall detection, subgoals, rewards). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (device control, oracle calls,
//!   config, artifacts). Behind traits so tests can script them.
//!
//! Orchestration modules ([`step`], [`looping`], [`popup`], [`suite`]) combine
//! the agents with I/O to implement CLI commands.

pub mod agents;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod popup;
pub mod step;
pub mod suite;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
