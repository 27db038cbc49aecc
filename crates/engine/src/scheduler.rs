//! Task intake and submission control.
//!
//! `submit` records the task as `Queued` and hands its start operation to
//! the per-category limiter. Once a slot is granted the operation
//! re-validates the task, submits it upstream, and then polls it inline so
//! the slot stays held until the task settles. Cancellation marks the store
//! first and only then signals the operation, so a start racing a cancel
//! can never resurrect the task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use genq_core::{Category, NewTask, Task, TaskId, TaskPatch, TaskStatus};
use genq_events::{EventBus, TaskEvent};
use genq_remote::{JobBackend, SubmitJob};
use genq_store::{StoreError, TaskFilter, TaskStore};
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::limiter::{ConcurrencyLimiter, OpHandle};
use crate::poller::PollingEngine;
use crate::preflight::Preflight;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Everything a start operation needs once it owns a slot.
#[derive(Clone)]
struct StartCtx {
    store: Arc<TaskStore>,
    backend: Arc<dyn JobBackend>,
    preflight: Arc<dyn Preflight>,
    poller: PollingEngine,
    bus: Arc<EventBus>,
}

/// Accepts tasks and drives them through submission under per-category
/// concurrency caps.
#[derive(Clone)]
pub struct Scheduler {
    store: Arc<TaskStore>,
    backend: Arc<dyn JobBackend>,
    preflight: Arc<dyn Preflight>,
    poller: PollingEngine,
    bus: Arc<EventBus>,
    limiter: ConcurrencyLimiter<Category>,
    ops: Arc<Mutex<HashMap<TaskId, OpHandle<Category, ()>>>>,
}

impl Scheduler {
    /// `limiter` must be the same instance the polling engine uses, so that
    /// tasks resumed after a restart count against the caps.
    pub fn new(
        store: Arc<TaskStore>,
        backend: Arc<dyn JobBackend>,
        preflight: Arc<dyn Preflight>,
        poller: PollingEngine,
        bus: Arc<EventBus>,
        limiter: ConcurrencyLimiter<Category>,
    ) -> Self {
        for category in Category::ALL {
            limiter
                .set_limit(category, category.default_max_concurrent())
                .expect("default category caps are positive");
        }
        Self {
            store,
            backend,
            preflight,
            poller,
            bus,
            limiter,
            ops: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Accept a task: validate, record it as `Queued`, and enqueue its start
    /// operation under the category cap.
    pub async fn submit(&self, new: NewTask) -> Result<Task, EngineError> {
        let task = self.store.create(new).await?;
        tracing::info!(task_id = %task.id, category = %task.category, "Task accepted");
        self.bus.publish(TaskEvent::Created {
            task_id: task.id,
            category: task.category,
        });
        self.spawn_start(&task);
        Ok(task)
    }

    /// Cancel a task in any non-terminal state.
    ///
    /// A queued task is removed from the wait queue and never submitted; a
    /// running task has its in-flight work signalled to stop, though the
    /// remote side may still finish the job on its own.
    pub async fn cancel(&self, id: TaskId) -> Result<Task, EngineError> {
        // Mark the store first so a start racing this cancel cannot win.
        let canceled = match self.store.update(id, &TaskPatch::canceled()).await {
            Ok(task) => task,
            Err(StoreError::RejectedPatch(_)) => return Err(EngineError::AlreadyTerminal(id)),
            Err(err) => return Err(err.into()),
        };
        let handle = self.ops.lock().unwrap().remove(&id);
        if let Some(handle) = handle {
            handle.abort();
        }
        self.poller.stop(id);
        tracing::info!(task_id = %id, "Task canceled");
        self.bus.publish(TaskEvent::Canceled { task_id: id });
        Ok(canceled)
    }

    /// Cancel (when still active) and remove a task record.
    pub async fn delete(&self, id: TaskId) -> Result<(), EngineError> {
        match self.cancel(id).await {
            Ok(_) | Err(EngineError::AlreadyTerminal(_)) => {}
            Err(err) => return Err(err),
        }
        self.store.delete(id).await?;
        tracing::info!(task_id = %id, "Task deleted");
        Ok(())
    }

    /// Change the concurrency cap for one category. Raising it promotes
    /// waiting tasks immediately; lowering it drains as running tasks
    /// finish.
    pub fn set_limit(&self, category: Category, limit: usize) -> Result<(), EngineError> {
        self.limiter.set_limit(category, limit)?;
        tracing::info!(category = %category, limit, "Concurrency cap updated");
        Ok(())
    }

    /// Re-enqueue tasks reloaded as `Queued`, oldest first.
    ///
    /// Idempotent: ids that already have a live start operation are
    /// skipped.
    pub async fn resume_queued(&self) -> usize {
        let queued = self
            .store
            .list(TaskFilter {
                category: None,
                status: Some(TaskStatus::Queued),
            })
            .await;
        let mut enqueued = 0;
        for task in queued {
            let live = self
                .ops
                .lock()
                .unwrap()
                .get(&task.id)
                .is_some_and(|op| !op.is_finished());
            if live {
                continue;
            }
            self.spawn_start(&task);
            enqueued += 1;
        }
        enqueued
    }

    /// Abort queued starts, signal running operations and polling loops,
    /// and wait briefly for them to settle.
    pub async fn shutdown(&self) {
        let handles: Vec<OpHandle<Category, ()>> = {
            let mut ops = self.ops.lock().unwrap();
            ops.drain().map(|(_, handle)| handle).collect()
        };
        for handle in &handles {
            handle.abort();
        }
        self.poller.shutdown();

        let drain = async {
            for handle in handles {
                let _ = handle.join().await;
            }
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            tracing::warn!("Shutdown grace period elapsed with operations still settling");
        }
        tracing::info!("Scheduler stopped");
    }

    fn spawn_start(&self, task: &Task) {
        let token = CancellationToken::new();
        let ctx = StartCtx {
            store: Arc::clone(&self.store),
            backend: Arc::clone(&self.backend),
            preflight: Arc::clone(&self.preflight),
            poller: self.poller.clone(),
            bus: Arc::clone(&self.bus),
        };
        let id = task.id;
        let handle =
            self.limiter
                .enqueue_with_token(task.category, token.clone(), run_task(ctx, id, token));
        let mut ops = self.ops.lock().unwrap();
        ops.retain(|_, op| !op.is_finished());
        ops.insert(id, handle);
    }
}

/// The start operation: runs once a category slot is granted and holds it
/// until the task settles.
async fn run_task(ctx: StartCtx, id: TaskId, token: CancellationToken) {
    let current = match ctx.store.get(id).await {
        Ok(task) => task,
        Err(_) => return,
    };
    // Canceled or otherwise moved on while waiting for the slot.
    if current.status != TaskStatus::Queued {
        return;
    }

    if let Err(reason) = ctx.preflight.check(&current).await {
        tracing::warn!(task_id = %id, reason = %reason, "Preflight rejected the submission");
        fail(&ctx, id, reason).await;
        return;
    }

    // File-backed categories need an uploaded source by start time; a local
    // path alone cannot be sent upstream.
    if current.category.requires_source_file()
        && current
            .payload
            .source_url
            .as_deref()
            .map_or(true, str::is_empty)
    {
        fail(&ctx, id, "Source file has not been uploaded".to_string()).await;
        return;
    }

    let job = SubmitJob {
        category: current.category,
        payload: current.payload.clone(),
    };
    let receipt = match ctx.backend.submit(&job).await {
        Ok(receipt) => receipt,
        Err(err) => {
            if err.is_auth() {
                tracing::warn!(task_id = %id, "Submission rejected as unauthenticated");
                ctx.bus.publish(TaskEvent::SessionExpired);
            }
            fail(&ctx, id, err.to_string()).await;
            return;
        }
    };

    if ctx
        .store
        .update(id, &TaskPatch::running(receipt.remote_job_id.clone()))
        .await
        .is_err()
    {
        // Canceled inside the acceptance window; the remote job runs on
        // unsupervised.
        tracing::debug!(task_id = %id, "Task left the queue before acceptance was recorded");
        return;
    }
    tracing::info!(task_id = %id, remote_job_id = %receipt.remote_job_id, "Submission accepted");
    ctx.bus.publish(TaskEvent::Started {
        task_id: id,
        remote_job_id: receipt.remote_job_id.clone(),
    });

    // Poll inline so the category slot stays held until a terminal state.
    ctx.poller
        .track(id, current.category, receipt.remote_job_id, token)
        .await;
}

async fn fail(ctx: &StartCtx, id: TaskId, reason: String) {
    match ctx.store.update(id, &TaskPatch::failed(reason.clone())).await {
        Ok(_) => {
            tracing::info!(task_id = %id, reason = %reason, "Task failed before acceptance");
            ctx.bus.publish(TaskEvent::Failed {
                task_id: id,
                error: reason,
            });
        }
        Err(err) => {
            tracing::debug!(task_id = %id, error = %err, "Skipped failure mark");
        }
    }
}
