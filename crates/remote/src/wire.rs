//! Normalization of upstream response variance.
//!
//! The generation service reports the same facts under several field names
//! and status vocabularies depending on endpoint generation. Every call site
//! goes through this module, so the complete mapping lives in exactly one
//! place and is tested as a table.

use serde_json::Value;

// ---------------------------------------------------------------------------
// Field-name tables
// ---------------------------------------------------------------------------

/// Keys under which a job id may appear, checked in order. Each key is
/// tried both at the top level and under `data`.
const JOB_ID_KEYS: &[&str] = &["task_id", "id", "job_id", "taskId"];

/// Keys that may carry the upstream status string.
const STATUS_KEYS: &[&str] = &["status", "state", "task_status"];

/// Keys that may carry the result URL.
const RESULT_URL_KEYS: &[&str] = &["result_url", "video_url", "output_url", "url"];

/// Keys that may carry the durably archived URL.
const ARCHIVED_URL_KEYS: &[&str] = &["archived_url", "saved_url", "history_url"];

/// Keys that may carry an error message.
const ERROR_KEYS: &[&str] = &["error_message", "err_msg", "fail_reason", "error", "message"];

/// Keys that may carry a progress value.
const PROGRESS_KEYS: &[&str] = &["progress", "percent", "progress_percent"];

// ---------------------------------------------------------------------------
// Canonical types
// ---------------------------------------------------------------------------

/// Canonical poll outcome, collapsed from the upstream status string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Pending,
    Success,
    Failed,
    Timeout,
    Canceled,
}

/// A poll response reduced to the fields the engine acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSnapshot {
    pub outcome: PollOutcome,
    pub progress: Option<u8>,
    pub result_url: Option<String>,
    pub archived_url: Option<String>,
    pub error_message: Option<String>,
}

impl PollSnapshot {
    /// A bare pending snapshot with no optional fields.
    pub fn pending() -> Self {
        Self {
            outcome: PollOutcome::Pending,
            progress: None,
            result_url: None,
            archived_url: None,
            error_message: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Extract the remote job id from a submit response body.
///
/// Accepts every known key, at the top level or nested under `data`, as a
/// non-empty string or an integer.
pub fn extract_job_id(body: &Value) -> Option<String> {
    for scope in scopes(body) {
        for key in JOB_ID_KEYS {
            match scope.get(key) {
                Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
                Some(Value::Number(n)) => return Some(n.to_string()),
                _ => {}
            }
        }
    }
    None
}

/// Map an upstream status string onto a canonical [`PollOutcome`].
///
/// Matching is case-insensitive. Unknown strings map to `Pending`: the loop
/// keeps polling and the wall-clock budget still bounds it.
pub fn normalize_status(raw: &str) -> PollOutcome {
    match raw.trim().to_ascii_lowercase().as_str() {
        "pending" | "queued" | "queueing" | "in_queue" | "waiting" | "submitted" | "created"
        | "processing" | "running" | "in_progress" | "generating" => PollOutcome::Pending,
        "success" | "succeed" | "succeeded" | "completed" | "complete" | "finished" | "done" => {
            PollOutcome::Success
        }
        "failed" | "fail" | "error" => PollOutcome::Failed,
        "timeout" | "timed_out" | "expired" => PollOutcome::Timeout,
        "canceled" | "cancelled" | "cancel" | "aborted" => PollOutcome::Canceled,
        _ => PollOutcome::Pending,
    }
}

/// Normalize a poll response body into a [`PollSnapshot`].
///
/// A body with no recognizable status string is treated as pending.
pub fn normalize_poll(body: &Value) -> PollSnapshot {
    let outcome = first_string(body, STATUS_KEYS)
        .as_deref()
        .map_or(PollOutcome::Pending, normalize_status);
    PollSnapshot {
        outcome,
        progress: first_progress(body),
        result_url: first_string(body, RESULT_URL_KEYS),
        archived_url: first_string(body, ARCHIVED_URL_KEYS),
        error_message: first_string(body, ERROR_KEYS),
    }
}

/// The scopes a field may live in: the body itself, then `data`.
fn scopes(body: &Value) -> impl Iterator<Item = &Value> {
    [Some(body), body.get("data")].into_iter().flatten()
}

/// First non-empty string found under any of `keys`, in scope order.
fn first_string(body: &Value, keys: &[&str]) -> Option<String> {
    for scope in scopes(body) {
        for key in keys {
            if let Some(Value::String(s)) = scope.get(key) {
                if !s.is_empty() {
                    return Some(s.clone());
                }
            }
        }
    }
    None
}

/// First progress value found, clamped to 0..=100.
///
/// Accepts integers, floats (truncated), and numeric strings with an
/// optional trailing `%`.
fn first_progress(body: &Value) -> Option<u8> {
    for scope in scopes(body) {
        for key in PROGRESS_KEYS {
            match scope.get(key) {
                Some(Value::Number(n)) => {
                    if let Some(v) = n.as_u64() {
                        return Some(v.min(100) as u8);
                    }
                    if let Some(v) = n.as_f64() {
                        if v >= 0.0 {
                            return Some(v.min(100.0) as u8);
                        }
                    }
                }
                Some(Value::String(s)) => {
                    if let Ok(v) = s.trim().trim_end_matches('%').parse::<u64>() {
                        return Some(v.min(100) as u8);
                    }
                }
                _ => {}
            }
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
