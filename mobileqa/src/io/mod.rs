//! I/O helpers for runner commands.

pub mod artifacts;
pub mod config;
pub mod device;
pub mod oracle;
pub mod process;
pub mod prompt;
pub mod uixml;
