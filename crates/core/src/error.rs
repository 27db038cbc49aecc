//! Error type shared by the core model.

use crate::status::TaskStatus;

/// Error type for core model operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Input failed a validation rule.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A status change violated the lifecycle state machine.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },
}
