//! Task lifecycle status and its transition rules.
//!
//! This module lives in `core` (zero internal deps) so the same state machine
//! governs the store, the polling engine, and any CLI tooling.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Lifecycle state of a task.
///
/// `Queued` is the only initial state. `Success`, `Failed`, and `Canceled`
/// are terminal; once a task reaches one of them its status never changes
/// again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Accepted, waiting for a concurrency slot.
    Queued,
    /// Submitted to the backend and being polled.
    Running,
    /// Finished with a result URL.
    Success,
    /// Finished with an error.
    Failed,
    /// Stopped by the user before completion.
    Canceled,
}

impl TaskStatus {
    /// Returns the set of statuses reachable from `self`.
    ///
    /// Terminal states return an empty slice because no further transitions
    /// are allowed.
    pub fn valid_transitions(&self) -> &'static [TaskStatus] {
        match self {
            TaskStatus::Queued => &[TaskStatus::Running, TaskStatus::Failed, TaskStatus::Canceled],
            TaskStatus::Running => &[TaskStatus::Success, TaskStatus::Failed, TaskStatus::Canceled],
            TaskStatus::Success | TaskStatus::Failed | TaskStatus::Canceled => &[],
        }
    }

    /// Check whether a transition from `self` to `to` is valid.
    pub fn can_transition(&self, to: TaskStatus) -> bool {
        self.valid_transitions().contains(&to)
    }

    /// Validate a transition, returning a typed error for invalid ones.
    pub fn validate_transition(&self, to: TaskStatus) -> Result<(), CoreError> {
        if self.can_transition(to) {
            Ok(())
        } else {
            Err(CoreError::InvalidTransition {
                from: *self,
                to,
            })
        }
    }

    /// Whether this status admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Failed | TaskStatus::Canceled
        )
    }

    /// Stable string form (matches the serde representation).
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
            TaskStatus::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
