// Job: the state of the one job this process executes.

use anyhow::{Context, Result};
use rndflow_common::constants::layout;
use std::fmt;
use std::fs;
use std::path::PathBuf;

/// Lifecycle phase of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Initializing,
    Downloading,
    Executing,
    Uploading,
    Completed,
    Failed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Initializing => "Initializing",
            JobState::Downloading => "Downloading",
            JobState::Executing => "Executing",
            JobState::Uploading => "Uploading",
            JobState::Completed => "Completed",
            JobState::Failed => "Failed",
        };
        write!(f, "{s}")
    }
}

/// The `error` value of an error report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobErrorKind {
    DownloadError,
    ExecuteError,
    UploadError,
}

impl JobErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobErrorKind::DownloadError => "DownloadError",
            JobErrorKind::ExecuteError => "ExecuteError",
            JobErrorKind::UploadError => "UploadError",
        }
    }
}

impl fmt::Display for JobErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: u64,

    /// Working directory of the script; everything below it except the
    /// excluded directories is uploaded.
    pub root: PathBuf,

    /// `{root}/{id}.log`.
    pub log_file: PathBuf,

    /// Exit code of the script once it has run.
    pub status: Option<i32>,

    /// Set once the final status and manifest were accepted by the server.
    pub data_upload: bool,

    pub state: JobState,
}

impl Job {
    pub fn new(id: u64, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let log_file = root.join(layout::log_file_name(id));
        Self {
            id,
            root,
            log_file,
            status: None,
            data_upload: false,
            state: JobState::Initializing,
        }
    }

    /// Create the job root and make its path absolute.
    pub fn prepare(&mut self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create job root '{}'", self.root.display()))?;
        self.root = fs::canonicalize(&self.root)
            .with_context(|| format!("Failed to resolve job root '{}'", self.root.display()))?;
        self.log_file = self.root.join(layout::log_file_name(self.id));
        Ok(())
    }

    pub fn transition(&mut self, state: JobState) {
        tracing::debug!("Job {}: {} -> {}", self.id, self.state, state);
        self.state = state;
    }
}
