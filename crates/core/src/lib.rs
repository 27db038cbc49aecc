//! Core domain types for the genq generation scheduler.
//!
//! This crate has zero internal dependencies so the task model, status
//! machine, and validation rules can be shared by the store, the engine,
//! and any future CLI tooling without dragging in runtime concerns.

pub mod category;
pub mod error;
pub mod moderation;
pub mod status;
pub mod task;
pub mod types;

pub use category::Category;
pub use error::CoreError;
pub use status::TaskStatus;
pub use task::{LocalSource, NewTask, SubmissionPayload, Task, TaskPatch};
pub use types::{TaskId, Timestamp};
