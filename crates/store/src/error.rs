//! Error type for task store operations.

use genq_core::{CoreError, TaskId};

use crate::persistence::PersistenceError;

/// Error type for task store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No task with the given id exists.
    #[error("task {0} not found")]
    NotFound(TaskId),

    /// The persisted state contains the same id twice.
    #[error("duplicate task id {0} in persisted state")]
    Duplicate(TaskId),

    /// Creation input failed validation.
    #[error("invalid task: {0}")]
    Invalid(CoreError),

    /// The patch would violate a lifecycle rule; nothing was changed.
    #[error("patch rejected: {0}")]
    RejectedPatch(CoreError),

    /// Reading or writing durable state failed.
    #[error("persistence failed: {0}")]
    Persistence(#[from] PersistenceError),
}
