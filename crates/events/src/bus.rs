//! Publish/subscribe hub for [`TaskEvent`]s, backed by
//! `tokio::sync::broadcast`. Shared as `Arc<EventBus>` between the scheduler,
//! the polling engine, and any number of listeners.

use genq_core::{Category, TaskId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// TaskEvent
// ---------------------------------------------------------------------------

/// A lifecycle notification about one task (or, for `SessionExpired`, about
/// the session shared by all of them).
///
/// `Archived` is the hook for completion collaborators: the history view and
/// the balance display refresh when they observe it, rather than being called
/// directly from the poll loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum TaskEvent {
    /// A task was accepted into the store.
    Created { task_id: TaskId, category: Category },
    /// The backend accepted the submission.
    Started { task_id: TaskId, remote_job_id: String },
    /// A poll tick reported forward progress.
    Progress { task_id: TaskId, progress: u8 },
    /// The task reached `Success`.
    Completed { task_id: TaskId, result_url: String },
    /// The task reached `Failed`.
    Failed { task_id: TaskId, error: String },
    /// The task was canceled by the user.
    Canceled { task_id: TaskId },
    /// The archival side effect was confirmed.
    Archived { task_id: TaskId, archived_url: String },
    /// The archival side effect failed; the task stays `Success`.
    ArchiveFailed { task_id: TaskId, error: String },
    /// A backend call was rejected as unauthenticated.
    SessionExpired,
}

impl TaskEvent {
    /// The task this event concerns, if any.
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            TaskEvent::Created { task_id, .. }
            | TaskEvent::Started { task_id, .. }
            | TaskEvent::Progress { task_id, .. }
            | TaskEvent::Completed { task_id, .. }
            | TaskEvent::Failed { task_id, .. }
            | TaskEvent::Canceled { task_id }
            | TaskEvent::Archived { task_id, .. }
            | TaskEvent::ArchiveFailed { task_id, .. } => Some(*task_id),
            TaskEvent::SessionExpired => None,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// Every subscriber receives every published [`TaskEvent`] independently.
/// Slow subscribers that fall more than the channel capacity behind observe
/// a `RecvError::Lagged` and skip ahead rather than blocking publishers.
///
/// # Usage
///
/// ```rust
/// use genq_events::{EventBus, TaskEvent};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(TaskEvent::SessionExpired);
/// assert!(matches!(rx.try_recv(), Ok(TaskEvent::SessionExpired)));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<TaskEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// With zero subscribers the event is silently dropped.
    pub fn publish(&self, event: TaskEvent) {
        // A SendError only means there are no receivers right now.
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
