use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Live state of an export job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum ExportStatus {
    Ready,
    InProgress {
        total_files: usize,
        files_done: usize,
        total_bytes: u64,
        bytes_copied: u64,
        current_file: String,
        percentage: u8,
    },
    Unmounting,
    /// The job ran to the end; individual files may still have failed.
    Finished(ExportReport),
    /// The job could not run at all.
    Failed(String),
}

impl ExportStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished(_) | Self::Failed(_))
    }
}

/// Outcome of one export job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportReport {
    pub drive_name: String,
    pub archive_dir: PathBuf,
    pub files_total: usize,
    pub files_copied: usize,
    pub files_failed: usize,
    pub files_deleted: usize,
    pub bytes_copied: u64,
    pub unmounted: bool,
    pub device_removed: bool,
    /// First few error messages, for display.
    pub errors: Vec<String>,
    pub duration_secs: u64,
}

impl ExportReport {
    pub fn succeeded(&self) -> bool {
        self.errors.is_empty() && self.files_failed == 0 && !self.device_removed
    }
}

/// An export job as tracked by the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub drive_name: String,
    pub started_at: DateTime<Local>,
    pub status: ExportStatus,
}
