//! Run coordination.
//!
//! Wires the printer, scheduler and tasks together for one run and reduces
//! the per-task exit codes to the process exit code. The CLI layer builds the
//! configuration and calls into this module.

mod controller;
mod exit_code;

pub(crate) use controller::{run_commands, RunSummary};
