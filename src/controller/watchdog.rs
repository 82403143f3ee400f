//! Rollout progress watchdog
//!
//! The stall marker lives in the Upgrading condition: reason is the tier
//! being rolled out, message is its updated replica count, and
//! `lastUpdateTime` is when that pair last changed.

use crate::crd::cluster::ClusterCondition;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// How long a rollout may go without progress before it is aborted
pub const PROGRESS_DEADLINE: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// The marker changed; the caller must record `(reason, message)` now
    Advanced,
    /// No change yet, still inside the window
    Waiting,
    /// No change for at least the whole window
    Stalled { since: DateTime<Utc> },
}

pub fn check_progress(
    last: Option<&ClusterCondition>,
    reason: &str,
    message: &str,
    now: DateTime<Utc>,
    window: Duration,
) -> Progress {
    let Some(last) = last.filter(|c| c.reason == reason && c.message == message) else {
        return Progress::Advanced;
    };

    let Ok(since) = DateTime::parse_from_rfc3339(&last.last_update_time) else {
        // Unreadable marker: restart the window rather than fail the rollout
        return Progress::Advanced;
    };
    let since = since.with_timezone(&Utc);

    match now.signed_duration_since(since).to_std() {
        Ok(elapsed) if elapsed >= window => Progress::Stalled { since },
        _ => Progress::Waiting,
    }
}
