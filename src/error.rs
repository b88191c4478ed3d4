// src/error.rs
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::ScanTrigger;

/// Failure to obtain rendered markup for a page.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("browser error: {0}")]
    Browser(String),

    #[error("rendering {url} timed out after {secs}s")]
    Timeout { url: String, secs: u64 },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("a {} scan is already running since {}", trigger.as_str(), since.format("%H:%M:%S UTC"))]
    AlreadyRunning {
        trigger: ScanTrigger,
        since: DateTime<Utc>,
    },

    /// Terminal: the process is expected to exit and be restarted by its supervisor.
    #[error("{failures} consecutive scans failed, stopping")]
    FailStop { failures: u32 },
}
