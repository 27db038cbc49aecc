//! Polling cadence knobs.

use std::time::Duration;

/// Default pause between consecutive status polls for one task.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default wall-clock budget for a single task's polling loop.
pub const DEFAULT_POLL_BUDGET: Duration = Duration::from_secs(2 * 60 * 60);

/// Cadence and budget for the per-task polling loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Pause between consecutive status polls.
    pub interval: Duration,
    /// Wall-clock budget after which a still-pending task is failed locally,
    /// whatever the remote side reports.
    pub budget: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            budget: DEFAULT_POLL_BUDGET,
        }
    }
}
