//! Durable storage behind the task store.
//!
//! [`TaskPersistence`] abstracts where the task list lives so the store can
//! run against a JSON file in production and plain memory in tests.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use genq_core::Task;

/// Error type for persistence operations.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Durable storage for the full task list.
///
/// The store calls [`save`](TaskPersistence::save) after every mutation.
/// Implementations must make the write atomic so a crash mid-save never
/// truncates the previously saved state.
#[async_trait]
pub trait TaskPersistence: Send + Sync {
    /// Replace the stored task list with `tasks`.
    async fn save(&self, tasks: &[Task]) -> Result<(), PersistenceError>;

    /// Load the stored task list. An absent store yields an empty list.
    async fn load(&self) -> Result<Vec<Task>, PersistenceError>;
}

// ---------------------------------------------------------------------------
// JSON file
// ---------------------------------------------------------------------------

/// Task persistence backed by a pretty-printed JSON file.
///
/// Writes go to a sibling `.tmp` file first and are renamed over the target,
/// so a reader never observes a half-written list.
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The file this persistence writes to.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl TaskPersistence for JsonFilePersistence {
    async fn save(&self, tasks: &[Task]) -> Result<(), PersistenceError> {
        let bytes = serde_json::to_vec_pretty(tasks)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn load(&self) -> Result<Vec<Task>, PersistenceError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Task persistence held entirely in memory, for tests and ephemeral runs.
///
/// Counts saves so tests can assert that the store persists after every
/// mutation.
#[derive(Default)]
pub struct MemoryPersistence {
    tasks: Mutex<Vec<Task>>,
    saves: AtomicUsize,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times `save` has been called.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskPersistence for MemoryPersistence {
    async fn save(&self, tasks: &[Task]) -> Result<(), PersistenceError> {
        *self.tasks.lock().unwrap() = tasks.to_vec();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load(&self) -> Result<Vec<Task>, PersistenceError> {
        Ok(self.tasks.lock().unwrap().clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
