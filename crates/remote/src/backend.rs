//! The backend seam the engine drives.

use async_trait::async_trait;
use genq_core::{Category, SubmissionPayload};

use crate::error::BackendError;
use crate::wire::PollSnapshot;

/// One submission request, assembled by the scheduler.
#[derive(Debug, Clone)]
pub struct SubmitJob {
    pub category: Category,
    pub payload: SubmissionPayload,
}

/// An accepted submission: the backend's identifier for the new job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub remote_job_id: String,
}

/// Client for the remote generation service.
///
/// Implementations normalize their responses through [`crate::wire`], so the
/// engine only ever sees canonical job ids and [`PollSnapshot`]s.
#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Submit a job, returning the backend's id for it.
    async fn submit(&self, job: &SubmitJob) -> Result<SubmitReceipt, BackendError>;

    /// Query the current state of a previously submitted job.
    async fn poll(
        &self,
        category: Category,
        remote_job_id: &str,
    ) -> Result<PollSnapshot, BackendError>;
}
