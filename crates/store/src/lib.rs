//! Durable task storage.
//!
//! [`TaskStore`] is the single source of truth for [`Task`](genq_core::Task)
//! records: the scheduler and polling engine read and mutate through it
//! rather than holding private copies. Every mutation is validated against
//! the task lifecycle rules and written through a [`TaskPersistence`]
//! implementation, so state survives a process restart.

pub mod error;
pub mod persistence;
pub mod store;

pub use error::StoreError;
pub use persistence::{JsonFilePersistence, MemoryPersistence, PersistenceError, TaskPersistence};
pub use store::{ReloadReport, TaskFilter, TaskStore};
