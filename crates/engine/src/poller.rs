//! Per-task status polling.
//!
//! Every running task gets exactly one polling loop, registered by task id.
//! The loop queries the backend on a fixed interval until it observes a
//! terminal condition or exhausts its wall-clock budget, then applies the
//! outcome to the store and dispatches the one-shot archival side effect
//! for successes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use genq_core::moderation::is_policy_rejection;
use genq_core::{Category, TaskId, TaskPatch, TaskStatus};
use genq_events::{EventBus, TaskEvent};
use genq_remote::{JobBackend, PollOutcome, PollSnapshot};
use genq_store::{TaskFilter, TaskStore};
use tokio_util::sync::CancellationToken;

use crate::archive::{ArchiveRequest, Archiver};
use crate::config::PollConfig;
use crate::limiter::ConcurrencyLimiter;

type LoopRegistry = Arc<Mutex<HashMap<TaskId, CancellationToken>>>;

/// Removes the registry entry when its polling loop ends, however it ends.
struct RegistryGuard {
    loops: LoopRegistry,
    id: TaskId,
}

impl Drop for RegistryGuard {
    fn drop(&mut self) {
        self.loops.lock().unwrap().remove(&self.id);
    }
}

enum Verdict {
    Continue,
    Done,
}

/// Drives the polling loops and the completion side effect.
#[derive(Clone)]
pub struct PollingEngine {
    store: Arc<TaskStore>,
    backend: Arc<dyn JobBackend>,
    archiver: Arc<dyn Archiver>,
    bus: Arc<EventBus>,
    limiter: ConcurrencyLimiter<Category>,
    config: PollConfig,
    loops: LoopRegistry,
    shutdown: CancellationToken,
}

impl PollingEngine {
    pub fn new(
        store: Arc<TaskStore>,
        backend: Arc<dyn JobBackend>,
        archiver: Arc<dyn Archiver>,
        bus: Arc<EventBus>,
        limiter: ConcurrencyLimiter<Category>,
        config: PollConfig,
    ) -> Self {
        Self {
            store,
            backend,
            archiver,
            bus,
            limiter,
            config,
            loops: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    /// Poll `remote_job_id` inline until the task reaches a terminal state.
    ///
    /// Registers the loop under the task id first; if a loop is already
    /// attached this returns immediately, so a task can never be polled by
    /// two loops at once.
    pub async fn track(
        &self,
        id: TaskId,
        category: Category,
        remote_job_id: String,
        token: CancellationToken,
    ) {
        let Some(guard) = self.register(id, token.clone()) else {
            tracing::debug!(task_id = %id, "Polling loop already attached");
            return;
        };
        self.run_loop(id, category, remote_job_id, token, guard).await;
    }

    /// Re-attach polling loops for tasks reloaded as `Running`.
    ///
    /// Idempotent: ids already in the registry are skipped, so a repeated
    /// scan never creates a second loop. Each resumed loop occupies a
    /// limiter slot so the per-category cap holds across restarts.
    pub async fn resume(&self) -> usize {
        let running = self
            .store
            .list(TaskFilter {
                category: None,
                status: Some(TaskStatus::Running),
            })
            .await;

        let mut attached = 0;
        for task in running {
            let Some(remote_job_id) = task.remote_job_id.clone() else {
                continue;
            };
            let token = self.shutdown.child_token();
            let Some(guard) = self.register(task.id, token.clone()) else {
                continue;
            };
            let slot = self.limiter.occupy(task.category);
            attached += 1;
            tracing::info!(task_id = %task.id, remote_job_id = %remote_job_id, "Polling loop re-attached");

            let engine = self.clone();
            tokio::spawn(async move {
                let _slot = slot;
                engine
                    .run_loop(task.id, task.category, remote_job_id, token, guard)
                    .await;
            });
        }
        attached
    }

    /// Signal the polling loop for `id`, if one is attached.
    pub fn stop(&self, id: TaskId) -> bool {
        let loops = self.loops.lock().unwrap();
        match loops.get(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Signal every attached loop to stop.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let loops = self.loops.lock().unwrap();
        for token in loops.values() {
            token.cancel();
        }
    }

    fn register(&self, id: TaskId, token: CancellationToken) -> Option<RegistryGuard> {
        let mut loops = self.loops.lock().unwrap();
        if loops.contains_key(&id) {
            return None;
        }
        loops.insert(id, token);
        Some(RegistryGuard {
            loops: Arc::clone(&self.loops),
            id,
        })
    }

    async fn run_loop(
        &self,
        id: TaskId,
        category: Category,
        remote_job_id: String,
        token: CancellationToken,
        _guard: RegistryGuard,
    ) {
        let started = Instant::now();
        let mut ticker = tokio::time::interval(self.config.interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!(task_id = %id, "Polling loop stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }

            if started.elapsed() >= self.config.budget {
                let reason = format!(
                    "Timed out after {} seconds without a terminal status",
                    self.config.budget.as_secs()
                );
                self.fail(id, reason).await;
                return;
            }

            let snapshot = match self.backend.poll(category, &remote_job_id).await {
                Ok(snapshot) => snapshot,
                Err(err) if err.is_auth() => {
                    // The session is gone; leave the task as-is so polling
                    // can pick it up again after a re-login.
                    tracing::warn!(task_id = %id, "Poll rejected as unauthenticated; suspending loop");
                    self.bus.publish(TaskEvent::SessionExpired);
                    return;
                }
                Err(err) => {
                    tracing::debug!(task_id = %id, error = %err, "Transient poll error");
                    continue;
                }
            };

            match self.apply_snapshot(id, &snapshot).await {
                Verdict::Continue => {}
                Verdict::Done => return,
            }
        }
    }

    async fn apply_snapshot(&self, id: TaskId, snapshot: &PollSnapshot) -> Verdict {
        // A content-policy rejection wins over everything else in the
        // response, including a nominally pending status.
        if let Some(message) = &snapshot.error_message {
            if is_policy_rejection(message) {
                self.fail(id, message.clone()).await;
                return Verdict::Done;
            }
        }

        // A result URL counts as success even when the reported status lags
        // behind or contradicts it.
        let result_url = snapshot.result_url.as_deref().filter(|url| !url.is_empty());
        if snapshot.outcome == PollOutcome::Success || result_url.is_some() {
            match result_url {
                Some(url) => self.complete(id, url, snapshot.archived_url.as_deref()).await,
                None => {
                    self.fail(id, "Backend reported success without a result URL".to_string())
                        .await
                }
            }
            return Verdict::Done;
        }

        match snapshot.outcome {
            PollOutcome::Pending => {
                if let Some(progress) = snapshot.progress {
                    if let Ok(task) = self.store.update(id, &TaskPatch::progress(progress)).await {
                        self.bus.publish(TaskEvent::Progress {
                            task_id: id,
                            progress: task.progress,
                        });
                    }
                }
                Verdict::Continue
            }
            PollOutcome::Failed | PollOutcome::Timeout => {
                let fallback = if snapshot.outcome == PollOutcome::Timeout {
                    "Generation timed out upstream"
                } else {
                    "Generation failed"
                };
                let reason = snapshot
                    .error_message
                    .clone()
                    .unwrap_or_else(|| fallback.to_string());
                self.fail(id, reason).await;
                Verdict::Done
            }
            PollOutcome::Canceled => {
                self.cancel_local(id).await;
                Verdict::Done
            }
            // Handled above.
            PollOutcome::Success => Verdict::Done,
        }
    }

    async fn complete(&self, id: TaskId, url: &str, archived_hint: Option<&str>) {
        match self.store.update(id, &TaskPatch::succeeded(url)).await {
            Ok(_) => {
                tracing::info!(task_id = %id, result_url = %url, "Task completed");
                self.bus.publish(TaskEvent::Completed {
                    task_id: id,
                    result_url: url.to_string(),
                });
            }
            Err(err) => {
                // Concurrent cancel; the terminal state stands.
                tracing::debug!(task_id = %id, error = %err, "Skipped completion mark");
                return;
            }
        }
        self.dispatch_archival(id, archived_hint).await;
    }

    /// Dispatch the archival side effect at most once.
    ///
    /// The history flag is re-read from the store immediately before the
    /// dispatch; that check-then-set is the single synchronization point
    /// keeping the side effect one-shot.
    async fn dispatch_archival(&self, id: TaskId, archived_hint: Option<&str>) {
        let current = match self.store.get(id).await {
            Ok(task) => task,
            Err(_) => return,
        };
        if current.history_saved {
            return;
        }
        let Some(result_url) = current.result_url.clone() else {
            return;
        };

        // An archived URL already reported upstream means the result is
        // durably stored; record it without a second archival call.
        let archived_url = if let Some(hint) = archived_hint {
            hint.to_string()
        } else {
            let request = ArchiveRequest {
                task_id: current.id,
                category: current.category,
                payload: current.payload.clone(),
                result_url,
            };
            match self.archiver.archive(&request).await {
                Ok(url) => url,
                Err(err) => {
                    tracing::warn!(task_id = %id, error = %err, "Archival failed; the task keeps its result");
                    self.bus.publish(TaskEvent::ArchiveFailed {
                        task_id: id,
                        error: err.to_string(),
                    });
                    return;
                }
            }
        };

        match self
            .store
            .update(id, &TaskPatch::archived(archived_url.clone()))
            .await
        {
            Ok(_) => {
                tracing::info!(task_id = %id, archived_url = %archived_url, "Result archived");
                self.bus.publish(TaskEvent::Archived {
                    task_id: id,
                    archived_url,
                });
            }
            Err(err) => {
                tracing::warn!(task_id = %id, error = %err, "Archival done but the flag update was rejected");
            }
        }
    }

    async fn fail(&self, id: TaskId, reason: String) {
        match self.store.update(id, &TaskPatch::failed(reason.clone())).await {
            Ok(_) => {
                tracing::info!(task_id = %id, reason = %reason, "Task failed");
                self.bus.publish(TaskEvent::Failed {
                    task_id: id,
                    error: reason,
                });
            }
            Err(err) => {
                tracing::debug!(task_id = %id, error = %err, "Skipped failure mark");
            }
        }
    }

    async fn cancel_local(&self, id: TaskId) {
        match self.store.update(id, &TaskPatch::canceled()).await {
            Ok(_) => {
                tracing::info!(task_id = %id, "Task canceled upstream");
                self.bus.publish(TaskEvent::Canceled { task_id: id });
            }
            Err(err) => {
                tracing::debug!(task_id = %id, error = %err, "Skipped cancel mark");
            }
        }
    }
}
