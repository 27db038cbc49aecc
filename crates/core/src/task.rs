//! Task record, creation input, and atomic patch application.
//!
//! A [`Task`] is the durable projection of a job. The local source file a
//! submission may need is deliberately kept out of it (see [`LocalSource`]);
//! paths into a dead process's filesystem layout are useless after a restart,
//! so the durable record only ever carries uploaded URLs.
//!
//! All mutation goes through [`Task::apply`], which enforces the lifecycle
//! rules in one place: the status state machine, the result-URL/Success
//! coupling, and the once-only history flag.

use serde::{Deserialize, Serialize};

use crate::category::Category;
use crate::error::CoreError;
use crate::status::TaskStatus;
use crate::types::{TaskId, Timestamp};

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// Maximum prompt length in characters.
pub const MAX_PROMPT_LENGTH: usize = 5_000;

/// Maximum requested clip duration in seconds.
pub const MAX_DURATION_SECS: u32 = 600;

/// Progress ceiling; upstream values above this are clamped.
pub const MAX_PROGRESS: u8 = 100;

// ---------------------------------------------------------------------------
// Submission payload
// ---------------------------------------------------------------------------

/// The durable parameters needed to issue (or re-issue) a submit call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionPayload {
    pub prompt: String,
    /// Already-uploaded source reference for file-backed categories.
    pub source_url: Option<String>,
    pub aspect_ratio: Option<String>,
    pub duration_secs: Option<u32>,
}

/// A locally staged source file, held in memory only.
///
/// Never serialized: the path stops meaning anything after a restart, so a
/// reload treats a pre-submission task whose local source is gone as failed
/// rather than re-submitting with a missing input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSource {
    pub path: std::path::PathBuf,
}

// ---------------------------------------------------------------------------
// Task record
// ---------------------------------------------------------------------------

/// The durable record of one generation job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub category: Category,
    pub status: TaskStatus,
    pub payload: SubmissionPayload,
    /// Backend identifier, set once the submission is accepted.
    pub remote_job_id: Option<String>,
    /// Best-effort progress, 0 to 100, never decreasing.
    pub progress: u8,
    /// Set exactly when `status` is `Success`.
    pub result_url: Option<String>,
    /// Canonical URL after the result has been durably archived.
    pub archived_url: Option<String>,
    /// Flips `false` to `true` at most once, after a confirmed archival.
    pub history_saved: bool,
    /// Failure reason, set only on `Failed`.
    pub error: Option<String>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
}

/// Caller-supplied input for creating a task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub category: Category,
    pub prompt: String,
    pub source_url: Option<String>,
    pub local_source: Option<LocalSource>,
    pub aspect_ratio: Option<String>,
    pub duration_secs: Option<u32>,
}

impl NewTask {
    /// Validate creation input against the category's requirements.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.category == Category::TextToVideo && self.prompt.trim().is_empty() {
            return Err(CoreError::Validation(
                "Prompt must not be empty for text-to-video tasks".to_string(),
            ));
        }
        if self.prompt.len() > MAX_PROMPT_LENGTH {
            return Err(CoreError::Validation(format!(
                "Prompt exceeds maximum length of {MAX_PROMPT_LENGTH} characters (got {})",
                self.prompt.len()
            )));
        }
        if self.category.requires_source_file()
            && self.source_url.as_deref().map_or(true, str::is_empty)
            && self.local_source.is_none()
        {
            return Err(CoreError::Validation(format!(
                "Category {} requires a source file (uploaded URL or local file)",
                self.category
            )));
        }
        if let Some(secs) = self.duration_secs {
            if secs == 0 {
                return Err(CoreError::Validation(
                    "Duration must be at least 1 second".to_string(),
                ));
            }
            if secs > MAX_DURATION_SECS {
                return Err(CoreError::Validation(format!(
                    "Duration exceeds maximum of {MAX_DURATION_SECS} seconds (got {secs})"
                )));
            }
        }
        if let Some(ratio) = &self.aspect_ratio {
            validate_aspect_ratio(ratio)?;
        }
        Ok(())
    }
}

/// Validate an aspect ratio of the form `W:H` with positive integer parts.
fn validate_aspect_ratio(ratio: &str) -> Result<(), CoreError> {
    let valid = match ratio.split_once(':') {
        Some((w, h)) => {
            w.parse::<u32>().map_or(false, |n| n > 0) && h.parse::<u32>().map_or(false, |n| n > 0)
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "Aspect ratio must look like 16:9 (got {ratio:?})"
        )))
    }
}

impl Task {
    /// Build a fresh `Queued` task from creation input.
    ///
    /// Returns the durable record together with the volatile local source,
    /// which the caller must stash separately.
    pub fn from_new(new: NewTask, now: Timestamp) -> Result<(Task, Option<LocalSource>), CoreError> {
        new.validate()?;
        let task = Task {
            id: TaskId::new(),
            category: new.category,
            status: TaskStatus::Queued,
            payload: SubmissionPayload {
                prompt: new.prompt,
                source_url: new.source_url,
                aspect_ratio: new.aspect_ratio,
                duration_secs: new.duration_secs,
            },
            remote_job_id: None,
            progress: 0,
            result_url: None,
            archived_url: None,
            history_saved: false,
            error: None,
            created_at: now,
            started_at: None,
            finished_at: None,
        };
        Ok((task, new.local_source))
    }

    /// Apply a patch, returning the updated record.
    ///
    /// Rejects any patch that would violate the lifecycle rules: backward
    /// status transitions, a result URL outside `Success`, a `Success`
    /// without a result URL, a second flip of `history_saved`, or an error
    /// message outside `Failed`. Progress only ever moves forward and is
    /// clamped to [`MAX_PROGRESS`]. Timestamps are stamped here so callers
    /// cannot forget them.
    pub fn apply(&self, patch: &TaskPatch, now: Timestamp) -> Result<Task, CoreError> {
        let target = patch.status.unwrap_or(self.status);
        if target != self.status {
            self.status.validate_transition(target)?;
        }

        if patch.remote_job_id.is_some() && self.remote_job_id.is_some() {
            return Err(CoreError::Validation(
                "Remote job id is already set and cannot change".to_string(),
            ));
        }

        if let Some(url) = &patch.result_url {
            if target != TaskStatus::Success {
                return Err(CoreError::Validation(
                    "Result URL is only valid on a successful task".to_string(),
                ));
            }
            if url.is_empty() {
                return Err(CoreError::Validation(
                    "Result URL must not be empty".to_string(),
                ));
            }
        }
        if target == TaskStatus::Success {
            let effective = patch.result_url.as_deref().or(self.result_url.as_deref());
            if effective.map_or(true, str::is_empty) {
                return Err(CoreError::Validation(
                    "A successful task must carry a result URL".to_string(),
                ));
            }
        }

        if let Some(url) = &patch.archived_url {
            if target != TaskStatus::Success {
                return Err(CoreError::Validation(
                    "Archived URL is only valid on a successful task".to_string(),
                ));
            }
            if url.is_empty() {
                return Err(CoreError::Validation(
                    "Archived URL must not be empty".to_string(),
                ));
            }
        }

        match patch.history_saved {
            Some(true) => {
                if target != TaskStatus::Success {
                    return Err(CoreError::Validation(
                        "History flag is only valid on a successful task".to_string(),
                    ));
                }
                if self.history_saved {
                    return Err(CoreError::Validation(
                        "History flag may only flip once".to_string(),
                    ));
                }
            }
            Some(false) if self.history_saved => {
                return Err(CoreError::Validation(
                    "History flag cannot be cleared".to_string(),
                ));
            }
            _ => {}
        }

        if patch.error.is_some() && target != TaskStatus::Failed {
            return Err(CoreError::Validation(
                "An error message is only valid on a failed task".to_string(),
            ));
        }

        let mut next = self.clone();
        next.status = target;
        if let Some(id) = &patch.remote_job_id {
            next.remote_job_id = Some(id.clone());
        }
        if let Some(p) = patch.progress {
            next.progress = next.progress.max(p.min(MAX_PROGRESS));
        }
        if let Some(url) = &patch.result_url {
            next.result_url = Some(url.clone());
        }
        if let Some(url) = &patch.archived_url {
            next.archived_url = Some(url.clone());
        }
        if patch.history_saved == Some(true) {
            next.history_saved = true;
        }
        if let Some(msg) = &patch.error {
            next.error = Some(msg.clone());
        }
        if target == TaskStatus::Running && self.status != TaskStatus::Running {
            next.started_at = Some(now);
        }
        if target.is_terminal() && !self.status.is_terminal() {
            next.finished_at = Some(now);
        }
        Ok(next)
    }
}

// ---------------------------------------------------------------------------
// Patch
// ---------------------------------------------------------------------------

/// Partial update to a task. Every field is optional; absent fields are
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub remote_job_id: Option<String>,
    pub progress: Option<u8>,
    pub result_url: Option<String>,
    pub archived_url: Option<String>,
    pub history_saved: Option<bool>,
    pub error: Option<String>,
}

impl TaskPatch {
    /// Mark accepted by the backend: `Running` plus the remote job id.
    pub fn running(remote_job_id: impl Into<String>) -> Self {
        Self {
            status: Some(TaskStatus::Running),
            remote_job_id: Some(remote_job_id.into()),
            ..Self::default()
        }
    }

    /// Mark finished with a result. Forces progress to the ceiling.
    pub fn succeeded(result_url: impl Into<String>) -> Self {
        Self {
            status: Some(TaskStatus::Success),
            result_url: Some(result_url.into()),
            progress: Some(MAX_PROGRESS),
            ..Self::default()
        }
    }

    /// Mark failed with a reason.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(TaskStatus::Failed),
            error: Some(message.into()),
            ..Self::default()
        }
    }

    /// Mark canceled by the user.
    pub fn canceled() -> Self {
        Self {
            status: Some(TaskStatus::Canceled),
            ..Self::default()
        }
    }

    /// Record forward progress only.
    pub fn progress(value: u8) -> Self {
        Self {
            progress: Some(value),
            ..Self::default()
        }
    }

    /// Record a confirmed archival: canonical URL plus the history flag.
    pub fn archived(url: impl Into<String>) -> Self {
        Self {
            archived_url: Some(url.into()),
            history_saved: Some(true),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::Utc;

    use super::*;

    fn text_task() -> Task {
        let (task, _) = Task::from_new(
            NewTask {
                category: Category::TextToVideo,
                prompt: "a lighthouse in a storm".to_string(),
                source_url: None,
                local_source: None,
                aspect_ratio: None,
                duration_secs: Some(5),
            },
            Utc::now(),
        )
        .expect("valid task");
        task
    }

    fn running_task() -> Task {
        text_task()
            .apply(&TaskPatch::running("job-1"), Utc::now())
            .expect("start")
    }

    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    #[test]
    fn from_new_starts_queued() {
        let task = text_task();
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.progress, 0);
        assert!(!task.history_saved);
        assert!(task.remote_job_id.is_none());
        assert!(task.started_at.is_none());
        assert!(task.finished_at.is_none());
    }

    #[test]
    fn text_task_requires_prompt() {
        let new = NewTask {
            category: Category::TextToVideo,
            prompt: "   ".to_string(),
            source_url: None,
            local_source: None,
            aspect_ratio: None,
            duration_secs: None,
        };
        assert_matches!(new.validate(), Err(CoreError::Validation(_)));
    }

    #[test]
    fn file_category_requires_a_source() {
        let new = NewTask {
            category: Category::ImageToVideo,
            prompt: String::new(),
            source_url: None,
            local_source: None,
            aspect_ratio: None,
            duration_secs: None,
        };
        assert_matches!(new.validate(), Err(CoreError::Validation(_)));
    }

    #[test]
    fn local_source_satisfies_file_requirement() {
        let new = NewTask {
            category: Category::Enhance,
            prompt: String::new(),
            source_url: None,
            local_source: Some(LocalSource {
                path: "/tmp/clip.mp4".into(),
            }),
            aspect_ratio: None,
            duration_secs: None,
        };
        assert!(new.validate().is_ok());
        let (task, local) = Task::from_new(new, Utc::now()).expect("valid");
        assert!(task.payload.source_url.is_none());
        assert!(local.is_some());
    }

    #[test]
    fn duration_bounds_are_enforced() {
        let mut new = NewTask {
            category: Category::TextToVideo,
            prompt: "p".to_string(),
            source_url: None,
            local_source: None,
            aspect_ratio: None,
            duration_secs: Some(0),
        };
        assert_matches!(new.validate(), Err(CoreError::Validation(_)));
        new.duration_secs = Some(MAX_DURATION_SECS + 1);
        assert_matches!(new.validate(), Err(CoreError::Validation(_)));
        new.duration_secs = Some(MAX_DURATION_SECS);
        assert!(new.validate().is_ok());
    }

    #[test]
    fn aspect_ratio_format() {
        assert!(validate_aspect_ratio("16:9").is_ok());
        assert!(validate_aspect_ratio("9:16").is_ok());
        assert!(validate_aspect_ratio("1:1").is_ok());
        assert!(validate_aspect_ratio("wide").is_err());
        assert!(validate_aspect_ratio("0:9").is_err());
        assert!(validate_aspect_ratio("16:").is_err());
        assert!(validate_aspect_ratio("").is_err());
    }

    // -----------------------------------------------------------------------
    // Patch application
    // -----------------------------------------------------------------------

    #[test]
    fn running_patch_stamps_started_at() {
        let task = running_task();
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.remote_job_id.as_deref(), Some("job-1"));
        assert!(task.started_at.is_some());
        assert!(task.finished_at.is_none());
    }

    #[test]
    fn succeeded_patch_sets_url_progress_and_finished_at() {
        let task = running_task()
            .apply(&TaskPatch::succeeded("https://x/video.mp4"), Utc::now())
            .expect("succeed");
        assert_eq!(task.status, TaskStatus::Success);
        assert_eq!(task.result_url.as_deref(), Some("https://x/video.mp4"));
        assert_eq!(task.progress, MAX_PROGRESS);
        assert!(task.finished_at.is_some());
        assert!(!task.history_saved);
    }

    #[test]
    fn success_without_result_url_is_rejected() {
        let patch = TaskPatch {
            status: Some(TaskStatus::Success),
            ..TaskPatch::default()
        };
        assert_matches!(
            running_task().apply(&patch, Utc::now()),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn backward_transition_is_rejected() {
        let done = running_task()
            .apply(&TaskPatch::succeeded("https://x/v.mp4"), Utc::now())
            .expect("succeed");
        let patch = TaskPatch {
            status: Some(TaskStatus::Queued),
            ..TaskPatch::default()
        };
        assert_matches!(
            done.apply(&patch, Utc::now()),
            Err(CoreError::InvalidTransition { .. })
        );
    }

    #[test]
    fn equal_status_patch_is_a_noop_transition() {
        let task = running_task();
        let updated = task
            .apply(&TaskPatch::progress(40), Utc::now())
            .expect("progress");
        assert_eq!(updated.status, TaskStatus::Running);
        assert_eq!(updated.progress, 40);
        // started_at is not restamped on a same-status patch.
        assert_eq!(updated.started_at, task.started_at);
    }

    #[test]
    fn result_url_outside_success_is_rejected() {
        let patch = TaskPatch {
            result_url: Some("https://x/v.mp4".to_string()),
            ..TaskPatch::default()
        };
        assert_matches!(
            running_task().apply(&patch, Utc::now()),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn progress_is_monotonic_and_clamped() {
        let task = running_task();
        let task = task.apply(&TaskPatch::progress(50), Utc::now()).expect("up");
        let task = task.apply(&TaskPatch::progress(30), Utc::now()).expect("down");
        assert_eq!(task.progress, 50);
        let task = task.apply(&TaskPatch::progress(200), Utc::now()).expect("over");
        assert_eq!(task.progress, MAX_PROGRESS);
    }

    #[test]
    fn history_flag_flips_once() {
        let done = running_task()
            .apply(&TaskPatch::succeeded("https://x/v.mp4"), Utc::now())
            .expect("succeed");
        let archived = done
            .apply(&TaskPatch::archived("https://archive/v.mp4"), Utc::now())
            .expect("archive");
        assert!(archived.history_saved);
        assert_eq!(archived.archived_url.as_deref(), Some("https://archive/v.mp4"));
        assert_matches!(
            archived.apply(&TaskPatch::archived("https://archive/v2.mp4"), Utc::now()),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn history_flag_requires_success() {
        let patch = TaskPatch {
            history_saved: Some(true),
            ..TaskPatch::default()
        };
        assert_matches!(
            running_task().apply(&patch, Utc::now()),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn history_flag_cannot_be_cleared() {
        let archived = running_task()
            .apply(&TaskPatch::succeeded("https://x/v.mp4"), Utc::now())
            .expect("succeed")
            .apply(&TaskPatch::archived("https://archive/v.mp4"), Utc::now())
            .expect("archive");
        let patch = TaskPatch {
            history_saved: Some(false),
            ..TaskPatch::default()
        };
        assert_matches!(
            archived.apply(&patch, Utc::now()),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn remote_job_id_is_set_once() {
        let task = running_task();
        let patch = TaskPatch {
            remote_job_id: Some("job-2".to_string()),
            ..TaskPatch::default()
        };
        assert_matches!(task.apply(&patch, Utc::now()), Err(CoreError::Validation(_)));
    }

    #[test]
    fn error_message_requires_failed() {
        let patch = TaskPatch {
            error: Some("boom".to_string()),
            ..TaskPatch::default()
        };
        assert_matches!(
            running_task().apply(&patch, Utc::now()),
            Err(CoreError::Validation(_))
        );
        let failed = running_task()
            .apply(&TaskPatch::failed("boom"), Utc::now())
            .expect("fail");
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert!(failed.finished_at.is_some());
    }

    #[test]
    fn canceled_patch_leaves_no_error() {
        let task = running_task()
            .apply(&TaskPatch::canceled(), Utc::now())
            .expect("cancel");
        assert_eq!(task.status, TaskStatus::Canceled);
        assert!(task.error.is_none());
        assert!(task.finished_at.is_some());
    }

    #[test]
    fn queued_task_can_fail_directly() {
        let task = text_task()
            .apply(&TaskPatch::failed("precondition failed"), Utc::now())
            .expect("fail");
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.started_at.is_none());
        assert!(task.finished_at.is_some());
    }

    // -----------------------------------------------------------------------
    // Serialization
    // -----------------------------------------------------------------------

    #[test]
    fn task_round_trips_through_json() {
        let task = running_task()
            .apply(&TaskPatch::succeeded("https://x/v.mp4"), Utc::now())
            .expect("succeed");
        let json = serde_json::to_string(&task).expect("serialize");
        let back: Task = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.id, task.id);
        assert_eq!(back.status, task.status);
        assert_eq!(back.result_url, task.result_url);
        assert_eq!(back.history_saved, task.history_saved);
    }
}
