//! Stable exit codes for swarm CLI commands.

use crate::core::types::RunStatus;

/// Every run finished `DONE`, or a non-run command succeeded.
pub const DONE: i32 = 0;
/// A run `FAILED`, or the command failed on usage, config or I/O errors.
pub const FAILED: i32 = 1;
/// A run spent its iteration or failure budget.
pub const EXHAUSTED: i32 = 2;

pub fn for_status(status: RunStatus) -> i32 {
    match status {
        RunStatus::Done => DONE,
        RunStatus::Failed => FAILED,
        RunStatus::Exhausted => EXHAUSTED,
    }
}
