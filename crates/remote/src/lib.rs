//! Client layer for the remote generation service.
//!
//! Exposes the [`JobBackend`] trait the engine drives (submit a job, poll
//! its status), the [`HttpBackend`] implementation over `reqwest`, and the
//! [`wire`] module: the one place upstream field-name and status-string
//! variance is normalized into canonical types.

pub mod api;
pub mod backend;
pub mod error;
pub mod wire;

pub use api::HttpBackend;
pub use backend::{JobBackend, SubmitJob, SubmitReceipt};
pub use error::BackendError;
pub use wire::{PollOutcome, PollSnapshot};
