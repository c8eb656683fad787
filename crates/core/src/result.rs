//! The structured value returned to the host runtime for every job.

use serde::Serialize;

/// Status tag carried by successful results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Success,
}

/// Terminal outcome of one job.
///
/// Serializes to exactly one of the three wire shapes:
///
/// ```text
/// { "status": "success", "message": "<url>", "all_urls": [...], "refresh_worker": bool }
/// { "status": "success", "uploaded_count": <int>, "refresh_worker": bool }
/// { "error": "<message>" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum JobResult {
    /// Outputs were uploaded from an engine-reported manifest.
    Published {
        status: JobStatus,
        /// Remote URL of the first uploaded file.
        message: String,
        all_urls: Vec<String>,
        refresh_worker: bool,
    },
    /// Outputs were discovered by scanning the output directory.
    Counted {
        status: JobStatus,
        uploaded_count: usize,
        refresh_worker: bool,
    },
    /// Any stage failed.
    Error { error: String },
}

impl JobResult {
    pub fn published(urls: Vec<String>, refresh_worker: bool) -> Self {
        let message = urls.first().cloned().unwrap_or_default();
        Self::Published {
            status: JobStatus::Success,
            message,
            all_urls: urls,
            refresh_worker,
        }
    }

    pub fn counted(uploaded_count: usize, refresh_worker: bool) -> Self {
        Self::Counted {
            status: JobStatus::Success,
            uploaded_count,
            refresh_worker,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Error { .. })
    }

    /// Whether the host should tear down and restart the worker.
    pub fn should_recycle(&self) -> bool {
        match self {
            Self::Published { refresh_worker, .. } | Self::Counted { refresh_worker, .. } => {
                *refresh_worker
            }
            Self::Error { .. } => false,
        }
    }
}
