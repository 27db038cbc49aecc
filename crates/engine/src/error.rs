use genq_core::TaskId;
use genq_store::StoreError;

/// Errors surfaced by scheduler operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The store rejected the operation (unknown task, invalid patch, or a
    /// persistence failure).
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The task already reached a terminal state and cannot be acted on.
    #[error("task {0} is already in a terminal state")]
    AlreadyTerminal(TaskId),

    /// Concurrency caps must admit at least one task.
    #[error("invalid concurrency limit {0}; the minimum is 1")]
    InvalidLimit(usize),
}
