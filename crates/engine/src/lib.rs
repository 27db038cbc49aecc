//! Scheduling and polling engine for generation tasks.
//!
//! The [`Scheduler`] accepts new tasks, enforces per-category concurrency
//! caps through the [`ConcurrencyLimiter`], and drives each accepted task
//! through submission and status polling until it reaches a terminal state.
//! The [`PollingEngine`] owns the per-task polling loops and the one-shot
//! archival side effect that follows a successful completion.

pub mod archive;
pub mod config;
pub mod error;
pub mod limiter;
pub mod poller;
pub mod preflight;
pub mod scheduler;

pub use archive::{ArchiveError, ArchiveRequest, Archiver};
pub use config::PollConfig;
pub use error::EngineError;
pub use limiter::{ConcurrencyLimiter, OpHandle, SlotGuard};
pub use poller::PollingEngine;
pub use preflight::{AllowAll, Preflight};
pub use scheduler::Scheduler;
