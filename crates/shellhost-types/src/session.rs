//! Session lifecycle state.

use serde::{Deserialize, Serialize};

/// Session lifecycle.
///
/// Transitions: Created -> Running on a successful spawn, Running ->
/// Cleaning on exit, process death or a stdin write failure, Cleaning ->
/// Done once both output channels report finished. Operations on a Done
/// session are tolerated no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Running,
    Cleaning,
    Done,
}

impl SessionState {
    pub fn is_done(self) -> bool {
        matches!(self, Self::Done)
    }
}
