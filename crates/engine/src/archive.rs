//! Archival of completed results.

use async_trait::async_trait;
use genq_core::{Category, SubmissionPayload, TaskId};

/// Everything the archival collaborator needs to persist one completed
/// result.
#[derive(Debug, Clone)]
pub struct ArchiveRequest {
    pub task_id: TaskId,
    pub category: Category,
    /// The submission as it was sent upstream; `payload.prompt` is the
    /// original prompt.
    pub payload: SubmissionPayload,
    pub result_url: String,
}

/// Error from the archival collaborator.
#[derive(Debug, thiserror::Error)]
#[error("archival failed: {0}")]
pub struct ArchiveError(pub String);

/// One-shot completion side effect: durably archive a successful result.
///
/// The polling engine dispatches this at most once per task, guarded by the
/// task's history flag. The returned string is the canonical archived URL.
/// A failure here is a secondary error; the task keeps its successful
/// status and the flag stays unset so a later retry remains possible.
#[async_trait]
pub trait Archiver: Send + Sync {
    async fn archive(&self, request: &ArchiveRequest) -> Result<String, ArchiveError>;
}
