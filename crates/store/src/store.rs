//! The task store: single source of truth for task records.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use genq_core::{Category, LocalSource, NewTask, Task, TaskId, TaskPatch, TaskStatus, Timestamp};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::persistence::TaskPersistence;

/// Filter for [`TaskStore::list`]. The default matches every task.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskFilter {
    pub category: Option<Category>,
    pub status: Option<TaskStatus>,
}

/// Outcome of loading and reconciling persisted state after a restart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadReport {
    /// Records present in the persisted state.
    pub loaded: usize,
    /// Tasks forced to `Failed` during reconciliation.
    pub failed: Vec<TaskId>,
    /// Running tasks with a remote job id, awaiting poll re-attachment.
    pub resumable: usize,
}

/// Owns every task record and the volatile local-source side map.
///
/// All mutation funnels through [`Task::apply`], so a patch that would
/// violate the lifecycle rules is rejected without touching the record.
/// After every accepted mutation the full list is written through the
/// persistence collaborator; saves are serialized so a slow older snapshot
/// can never overwrite a newer one.
pub struct TaskStore {
    persistence: Arc<dyn TaskPersistence>,
    tasks: RwLock<Vec<Task>>,
    /// Joined to tasks by id; never serialized (see [`LocalSource`]).
    local_sources: Mutex<HashMap<TaskId, LocalSource>>,
    save_lock: tokio::sync::Mutex<()>,
}

impl TaskStore {
    pub fn new(persistence: Arc<dyn TaskPersistence>) -> Self {
        Self {
            persistence,
            tasks: RwLock::new(Vec::new()),
            local_sources: Mutex::new(HashMap::new()),
            save_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Create a task from validated input, stash its local source (if any),
    /// and persist.
    pub async fn create(&self, new: NewTask) -> Result<Task, StoreError> {
        let (task, local) = Task::from_new(new, Utc::now()).map_err(StoreError::Invalid)?;
        if let Some(local) = local {
            self.local_sources.lock().unwrap().insert(task.id, local);
        }
        self.tasks.write().await.push(task.clone());
        self.save().await?;
        Ok(task)
    }

    /// Fetch a snapshot of one task.
    pub async fn get(&self, id: TaskId) -> Result<Task, StoreError> {
        self.tasks
            .read()
            .await
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    /// Apply a patch atomically and persist the result.
    ///
    /// A patch that violates the lifecycle rules is rejected as a no-op and
    /// reported as [`StoreError::RejectedPatch`].
    pub async fn update(&self, id: TaskId, patch: &TaskPatch) -> Result<Task, StoreError> {
        let updated = {
            let mut tasks = self.tasks.write().await;
            let task = tasks
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or(StoreError::NotFound(id))?;
            let next = task
                .apply(patch, Utc::now())
                .map_err(StoreError::RejectedPatch)?;
            *task = next.clone();
            next
        };
        self.save().await?;
        Ok(updated)
    }

    /// Snapshot the tasks matching `filter`, ordered by `created_at` with
    /// ties broken by insertion order.
    pub async fn list(&self, filter: TaskFilter) -> Vec<Task> {
        let mut out: Vec<Task> = self
            .tasks
            .read()
            .await
            .iter()
            .filter(|t| filter.category.map_or(true, |c| t.category == c))
            .filter(|t| filter.status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        out.sort_by_key(|t| t.created_at);
        out
    }

    /// Remove a task and its local source, then persist.
    pub async fn delete(&self, id: TaskId) -> Result<(), StoreError> {
        {
            let mut tasks = self.tasks.write().await;
            let before = tasks.len();
            tasks.retain(|t| t.id != id);
            if tasks.len() == before {
                return Err(StoreError::NotFound(id));
            }
        }
        self.local_sources.lock().unwrap().remove(&id);
        self.save().await?;
        Ok(())
    }

    /// The volatile local source for a task, if one is still held.
    pub fn local_source(&self, id: TaskId) -> Option<LocalSource> {
        self.local_sources.lock().unwrap().get(&id).cloned()
    }

    /// Replace the in-memory state with the persisted one and reconcile it
    /// for restart recovery.
    ///
    /// Reconciliation forces to `Failed`:
    /// - tasks reloaded `Running` without a remote job id (the process died
    ///   between accepting the task and the backend accepting the job);
    /// - tasks reloaded `Queued` in a file-requiring category without an
    ///   uploaded source reference (the local file handle did not survive
    ///   the restart).
    ///
    /// Everything else reloads verbatim. Returns a report for the caller to
    /// log; the reconciled state is persisted when anything changed.
    pub async fn load(&self) -> Result<ReloadReport, StoreError> {
        let mut tasks = self.persistence.load().await?;

        let mut seen = HashSet::new();
        for task in &tasks {
            if !seen.insert(task.id) {
                return Err(StoreError::Duplicate(task.id));
            }
        }

        let now = Utc::now();
        let mut report = ReloadReport {
            loaded: tasks.len(),
            ..ReloadReport::default()
        };
        for task in &mut tasks {
            let reason = match task.status {
                TaskStatus::Running if task.remote_job_id.is_none() => {
                    Some("Interrupted by a restart before the backend accepted the submission")
                }
                TaskStatus::Queued
                    if task.category.requires_source_file()
                        && task.payload.source_url.as_deref().map_or(true, str::is_empty) =>
                {
                    Some("Source file reference lost during restart; please re-upload")
                }
                _ => None,
            };
            if let Some(reason) = reason {
                tracing::warn!(
                    task_id = %task.id,
                    status = %task.status,
                    reason,
                    "Task failed during reload reconciliation"
                );
                fail_in_place(task, reason, now);
                report.failed.push(task.id);
            }
        }
        report.resumable = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Running && t.remote_job_id.is_some())
            .count();

        *self.tasks.write().await = tasks;
        self.local_sources.lock().unwrap().clear();
        if !report.failed.is_empty() {
            self.save().await?;
        }
        Ok(report)
    }

    /// Write the current task list through the persistence collaborator.
    ///
    /// The snapshot is taken after the save lock is acquired, so concurrent
    /// mutations are always captured by whichever save runs last.
    async fn save(&self) -> Result<(), StoreError> {
        let _guard = self.save_lock.lock().await;
        let snapshot = self.tasks.read().await.clone();
        self.persistence.save(&snapshot).await?;
        Ok(())
    }
}

/// Force a non-terminal task to `Failed` during reconciliation.
///
/// Bypasses [`Task::apply`]: reconciliation is the one repair path allowed
/// to rewrite records, and both rules above only ever touch non-terminal
/// states.
fn fail_in_place(task: &mut Task, reason: &str, now: Timestamp) {
    task.status = TaskStatus::Failed;
    task.error = Some(reason.to_string());
    task.finished_at = Some(now);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use genq_core::CoreError;

    use crate::persistence::{JsonFilePersistence, MemoryPersistence};

    use super::*;

    fn new_text(prompt: &str) -> NewTask {
        NewTask {
            category: Category::TextToVideo,
            prompt: prompt.to_string(),
            source_url: None,
            local_source: None,
            aspect_ratio: None,
            duration_secs: None,
        }
    }

    fn new_enhance(source_url: Option<&str>, local: Option<&str>) -> NewTask {
        NewTask {
            category: Category::Enhance,
            prompt: String::new(),
            source_url: source_url.map(str::to_string),
            local_source: local.map(|p| LocalSource { path: p.into() }),
            aspect_ratio: None,
            duration_secs: None,
        }
    }

    fn store() -> (TaskStore, Arc<MemoryPersistence>) {
        let persistence = Arc::new(MemoryPersistence::new());
        (TaskStore::new(persistence.clone()), persistence)
    }

    #[tokio::test]
    async fn create_lists_and_persists() {
        let (store, persistence) = store();
        let task = store.create(new_text("a red kite")).await.expect("create");

        let listed = store.list(TaskFilter::default()).await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, task.id);
        assert_eq!(persistence.save_count(), 1);
    }

    #[tokio::test]
    async fn create_rejects_invalid_input_without_saving() {
        let (store, persistence) = store();
        let result = store.create(new_text("  ")).await;
        assert_matches!(result, Err(StoreError::Invalid(CoreError::Validation(_))));
        assert_eq!(persistence.save_count(), 0);
        assert!(store.list(TaskFilter::default()).await.is_empty());
    }

    #[tokio::test]
    async fn local_source_is_stashed_out_of_band() {
        let (store, persistence) = store();
        let task = store
            .create(new_enhance(None, Some("/tmp/in.mp4")))
            .await
            .expect("create");

        assert!(store.local_source(task.id).is_some());
        // The durable projection carries no trace of the local path.
        let saved = persistence.load().await.expect("load");
        assert!(saved[0].payload.source_url.is_none());
    }

    #[tokio::test]
    async fn update_applies_patch_and_persists() {
        let (store, persistence) = store();
        let task = store.create(new_text("p")).await.expect("create");

        let updated = store
            .update(task.id, &TaskPatch::running("job-9"))
            .await
            .expect("update");
        assert_eq!(updated.status, TaskStatus::Running);
        assert_eq!(updated.remote_job_id.as_deref(), Some("job-9"));
        assert_eq!(persistence.save_count(), 2);
    }

    #[tokio::test]
    async fn rejected_patch_is_a_noop() {
        let (store, persistence) = store();
        let task = store.create(new_text("p")).await.expect("create");

        // Queued cannot jump straight to Success.
        let patch = TaskPatch {
            status: Some(TaskStatus::Success),
            result_url: Some("https://x/v.mp4".to_string()),
            ..TaskPatch::default()
        };
        let result = store.update(task.id, &patch).await;
        assert_matches!(result, Err(StoreError::RejectedPatch(_)));

        let current = store.get(task.id).await.expect("get");
        assert_eq!(current.status, TaskStatus::Queued);
        assert!(current.result_url.is_none());
        assert_eq!(persistence.save_count(), 1);
    }

    #[tokio::test]
    async fn update_unknown_task_is_not_found() {
        let (store, _) = store();
        let result = store.update(TaskId::new(), &TaskPatch::canceled()).await;
        assert_matches!(result, Err(StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_filters_by_category_and_status() {
        let (store, _) = store();
        let a = store.create(new_text("first")).await.expect("create");
        let _b = store.create(new_text("second")).await.expect("create");
        let c = store
            .create(new_enhance(Some("https://x/in.mp4"), None))
            .await
            .expect("create");
        store
            .update(a.id, &TaskPatch::running("job-a"))
            .await
            .expect("start");

        let text = store
            .list(TaskFilter {
                category: Some(Category::TextToVideo),
                status: None,
            })
            .await;
        assert_eq!(text.len(), 2);

        let queued = store
            .list(TaskFilter {
                category: None,
                status: Some(TaskStatus::Queued),
            })
            .await;
        assert_eq!(queued.len(), 2);
        assert!(queued.iter().any(|t| t.id == c.id));
    }

    #[tokio::test]
    async fn list_orders_by_creation() {
        let (store, _) = store();
        let first = store.create(new_text("first")).await.expect("create");
        let second = store.create(new_text("second")).await.expect("create");
        let third = store.create(new_text("third")).await.expect("create");

        let ids: Vec<TaskId> = store
            .list(TaskFilter::default())
            .await
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec![first.id, second.id, third.id]);
    }

    #[tokio::test]
    async fn delete_removes_task_and_local_source() {
        let (store, persistence) = store();
        let task = store
            .create(new_enhance(None, Some("/tmp/in.mp4")))
            .await
            .expect("create");

        store.delete(task.id).await.expect("delete");
        assert!(store.list(TaskFilter::default()).await.is_empty());
        assert!(store.local_source(task.id).is_none());
        assert!(persistence.load().await.expect("load").is_empty());

        assert_matches!(store.delete(task.id).await, Err(StoreError::NotFound(_)));
    }

    // -----------------------------------------------------------------------
    // Reload reconciliation
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn load_fails_running_task_without_remote_job_id() {
        let persistence = Arc::new(MemoryPersistence::new());
        let (mut orphan, _) = Task::from_new(new_text("p"), Utc::now()).expect("task");
        orphan.status = TaskStatus::Running;
        persistence.save(&[orphan.clone()]).await.expect("seed");

        let store = TaskStore::new(persistence);
        let report = store.load().await.expect("load");
        assert_eq!(report.loaded, 1);
        assert_eq!(report.failed, vec![orphan.id]);
        assert_eq!(report.resumable, 0);

        let task = store.get(orphan.id).await.expect("get");
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.as_deref().unwrap().contains("restart"));
        assert!(task.finished_at.is_some());
    }

    #[tokio::test]
    async fn load_fails_queued_file_task_without_source() {
        let persistence = Arc::new(MemoryPersistence::new());
        let (stranded, _) =
            Task::from_new(new_enhance(None, Some("/tmp/in.mp4")), Utc::now()).expect("task");
        persistence.save(&[stranded.clone()]).await.expect("seed");

        let store = TaskStore::new(persistence);
        let report = store.load().await.expect("load");
        assert_eq!(report.failed, vec![stranded.id]);

        let task = store.get(stranded.id).await.expect("get");
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.as_deref().unwrap().contains("re-upload"));
    }

    #[tokio::test]
    async fn load_keeps_resumable_and_terminal_tasks_verbatim() {
        let persistence = Arc::new(MemoryPersistence::new());
        let now = Utc::now();
        let (mut running, _) = Task::from_new(new_text("a"), now).expect("task");
        running = running.apply(&TaskPatch::running("job-1"), now).expect("start");
        let (queued_text, _) = Task::from_new(new_text("b"), now).expect("task");
        let (mut done, _) = Task::from_new(new_text("c"), now).expect("task");
        done = done.apply(&TaskPatch::running("job-2"), now).expect("start");
        done = done
            .apply(&TaskPatch::succeeded("https://x/v.mp4"), now)
            .expect("succeed");
        persistence
            .save(&[running.clone(), queued_text.clone(), done.clone()])
            .await
            .expect("seed");

        let store = TaskStore::new(persistence);
        let report = store.load().await.expect("load");
        assert_eq!(report.loaded, 3);
        assert!(report.failed.is_empty());
        assert_eq!(report.resumable, 1);

        assert_eq!(store.get(running.id).await.expect("get").status, TaskStatus::Running);
        assert_eq!(store.get(queued_text.id).await.expect("get").status, TaskStatus::Queued);
        let reloaded = store.get(done.id).await.expect("get");
        assert_eq!(reloaded.status, TaskStatus::Success);
        assert_eq!(reloaded.result_url, done.result_url);
    }

    #[tokio::test]
    async fn load_rejects_duplicate_ids() {
        let persistence = Arc::new(MemoryPersistence::new());
        let (task, _) = Task::from_new(new_text("p"), Utc::now()).expect("task");
        persistence
            .save(&[task.clone(), task.clone()])
            .await
            .expect("seed");

        let store = TaskStore::new(persistence);
        assert_matches!(store.load().await, Err(StoreError::Duplicate(id)) if id == task.id);
    }

    #[tokio::test]
    async fn terminal_fields_survive_a_file_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tasks.json");

        let store = TaskStore::new(Arc::new(JsonFilePersistence::new(path.clone())));
        let task = store.create(new_text("p")).await.expect("create");
        store
            .update(task.id, &TaskPatch::running("job-1"))
            .await
            .expect("start");
        store
            .update(task.id, &TaskPatch::succeeded("https://x/v.mp4"))
            .await
            .expect("succeed");
        store
            .update(task.id, &TaskPatch::archived("https://archive/v.mp4"))
            .await
            .expect("archive");

        let reopened = TaskStore::new(Arc::new(JsonFilePersistence::new(path)));
        let report = reopened.load().await.expect("load");
        assert_eq!(report.loaded, 1);
        assert!(report.failed.is_empty());

        let reloaded = reopened.get(task.id).await.expect("get");
        assert_eq!(reloaded.status, TaskStatus::Success);
        assert_eq!(reloaded.result_url.as_deref(), Some("https://x/v.mp4"));
        assert_eq!(reloaded.archived_url.as_deref(), Some("https://archive/v.mp4"));
        assert!(reloaded.history_saved);
    }
}
