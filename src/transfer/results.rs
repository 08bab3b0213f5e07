//! Transfer result types
//!
//! Describes planned transfers and the progress reported while they run.

use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Direction of a file transfer, seen from the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Upload,
    Download,
}

/// One file transfer request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferDescriptor {
    pub local_path: PathBuf,
    pub remote_path: String,
    pub direction: Direction,
    pub expected_size: Option<u64>,
    /// Resume offset
    pub offset: u64,
    /// Modification time of the source, used to stamp the destination
    pub modified_time: Option<DateTime<Utc>>,
    /// Path below the synchronized roots, set by the synchronizer
    pub relative_path: Option<String>,
}

impl TransferDescriptor {
    pub fn upload(local_path: impl Into<PathBuf>, remote_path: impl Into<String>) -> Self {
        Self {
            local_path: local_path.into(),
            remote_path: remote_path.into(),
            direction: Direction::Upload,
            expected_size: None,
            offset: 0,
            modified_time: None,
            relative_path: None,
        }
    }

    pub fn download(remote_path: impl Into<String>, local_path: impl Into<PathBuf>) -> Self {
        Self {
            local_path: local_path.into(),
            remote_path: remote_path.into(),
            direction: Direction::Download,
            expected_size: None,
            offset: 0,
            modified_time: None,
            relative_path: None,
        }
    }

    pub fn with_expected_size(mut self, size: Option<u64>) -> Self {
        self.expected_size = size;
        self
    }

    pub fn with_modified_time(mut self, time: Option<DateTime<Utc>>) -> Self {
        self.modified_time = time;
        self
    }

    pub fn with_relative_path(mut self, relative: impl Into<String>) -> Self {
        self.relative_path = Some(relative.into());
        self
    }

    /// Name used in reports: the relative path when known, else the remote one.
    pub fn report_path(&self) -> &str {
        self.relative_path.as_deref().unwrap_or(&self.remote_path)
    }
}

/// Snapshot handed to progress callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferProgress {
    pub remote_path: String,
    pub bytes_transferred: u64,
    pub total_expected: Option<u64>,
}

/// Callback invoked after every chunk of a transfer.
pub type ProgressCallback = Box<dyn FnMut(&TransferProgress) + Send>;
