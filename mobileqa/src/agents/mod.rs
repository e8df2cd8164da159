//! The three decision roles of a test run plus goal decomposition.
//!
//! Each agent holds only its prompt settings; oracle and device handles are
//! passed per call.

pub mod decomposer;
pub mod executor;
pub mod planner;
pub mod supervisor;
