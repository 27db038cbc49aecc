//! Pre-submission gate.

use async_trait::async_trait;
use genq_core::Task;

/// Decision gate consulted immediately before a task is submitted upstream.
///
/// Deployments plug in whatever checks they need here, such as requiring an
/// authenticated session or a sufficient credit balance for billed
/// categories. A rejection fails the task with the returned reason and no
/// network call is made.
#[async_trait]
pub trait Preflight: Send + Sync {
    /// Returns `Err(reason)` to block the submission.
    async fn check(&self, task: &Task) -> Result<(), String>;
}

/// Permits every submission.
#[derive(Debug, Default)]
pub struct AllowAll;

#[async_trait]
impl Preflight for AllowAll {
    async fn check(&self, _task: &Task) -> Result<(), String> {
        Ok(())
    }
}
