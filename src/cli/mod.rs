//! Command-line interface for promptforge.
//!
//! Provides commands for optimizing templates, batch submission, job
//! status lookup, and engine diagnostics.

mod commands;

pub use commands::{parse_cli, run, run_with_cli};
