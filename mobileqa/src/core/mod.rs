//! Deterministic, pure logic shared by the test runner.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod action;
pub mod reward;
pub mod stall;
pub mod subgoals;
pub mod types;
pub mod ui;
