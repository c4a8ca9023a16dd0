// Constants shared by the agent crates: environment variable names, control
// plane paths, job root layout and process exit codes.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Environment variables
// ---------------------------------------------------------------------------

pub mod variables {
    pub const API_SERVER: &str = "RNDFLOW_API_SERVER";
    pub const REFRESH_TOKEN: &str = "RNDFLOW_REFRESH_TOKEN";
    pub const ACCESS_TOKEN: &str = "RNDFLOW_ACCESS_TOKEN";
    pub const LOGGING_LEVEL: &str = "RNDFLOW_LOGGING_LEVEL";
    pub const DATE_FORMAT: &str = "RNDFLOW_DATEFORMAT";
    pub const TIMEZONE: &str = "RNDFLOW_TIMEZONE";
    pub const SSL_VERIFY: &str = "RNDFLOW_SSL_VERIFY";
    pub const HEARTBEAT_INTERVAL: &str = "RNDFLOW_HEARTBEAT_INTERVAL";
    pub const ERROR_REPORT_ATTEMPTS: &str = "RNDFLOW_ERROR_REPORT_ATTEMPTS";
    pub const ERROR_REPORT_INTERVAL: &str = "RNDFLOW_ERROR_REPORT_INTERVAL";
    pub const EXCLUDE_DIRS: &str = "RNDFLOW_EXCLUDE_DIRS";
    pub const WORK_DIRECTORY: &str = "RNDFLOW_WORK_DIRECTORY";
    pub const JUPYTER_BASE_URL: &str = "JUPYTER_BASE_URL";

    /// Prefix of the common (short call) retry profile variables.
    pub const COMMON_PROFILE_PREFIX: &str = "RNDFLOW_COMMON";
    /// Prefix of the spec (long call) retry profile variables.
    pub const SPEC_PROFILE_PREFIX: &str = "RNDFLOW_SPEC";

    /// Variables that must never reach the job script's environment.
    pub const SCRUBBED_FROM_CHILD: &[&str] = &[REFRESH_TOKEN, ACCESS_TOKEN];
}

// ---------------------------------------------------------------------------
// Control plane paths
// ---------------------------------------------------------------------------

pub mod api {
    /// Appended to the configured host to form the API base URL.
    pub const BASE_SUFFIX: &str = "/api";
    /// Job execution namespace below the API base.
    pub const NAMESPACE: &str = "/executor_api";
    pub const AUTH_REFRESH: &str = "/executor_api/auth/refresh";

    pub fn job(id: u64) -> String {
        format!("{NAMESPACE}/jobs/{id}")
    }

    pub fn job_files(id: u64) -> String {
        format!("{}/files", job(id))
    }

    pub fn job_packages(id: u64) -> String {
        format!("{}/packages", job(id))
    }

    pub fn job_heartbeat(id: u64) -> String {
        format!("{}/heartbeat", job(id))
    }

    pub fn job_status(id: u64) -> String {
        format!("{}/status", job(id))
    }

    pub fn job_error(id: u64) -> String {
        format!("{}/error", job(id))
    }

    pub fn job_upload_objects(id: u64) -> String {
        format!("{}/upload_objects", job(id))
    }
}

// ---------------------------------------------------------------------------
// Job root layout
// ---------------------------------------------------------------------------

pub mod layout {
    pub const INPUT_DIRECTORY: &str = "in";
    pub const OUTPUT_DIRECTORY: &str = "out";
    pub const PARAMS_FILE: &str = "params.json";
    pub const LABEL_FILE: &str = "label";
    pub const FIELDS_FILE: &str = "fields.json";
    pub const DEFAULT_EXCLUDE_DIRS: &[&str] = &["in", "__pycache__", ".ipynb_checkpoints"];

    pub fn log_file_name(job_id: u64) -> String {
        format!("{job_id}.log")
    }
}

// ---------------------------------------------------------------------------
// Process exit codes
// ---------------------------------------------------------------------------

pub mod exit_codes {
    pub const COMPLETED: i32 = 0;
    pub const DOWNLOAD_FAILED: i32 = 1;
    pub const EXECUTE_OR_UPLOAD_FAILED: i32 = 2;
    pub const STARTUP_FAILED: i32 = 3;
}

/// Lines of the job log sent with every heartbeat.
pub const HEARTBEAT_LOG_TAIL_LINES: usize = 100;

/// Total attempts for a checksum-verified download.
pub const DOWNLOAD_ATTEMPTS: u32 = 2;

/// Response codes that count against the status retry budget.
pub const RETRYABLE_STATUS_CODES: &[u16] = &[502, 504];

/// Status reported after all inputs are in place.
pub const STATUS_DOWNLOADED: &str = "downloaded";

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_ERROR_REPORT_ATTEMPTS: u32 = 144;
pub const DEFAULT_ERROR_REPORT_INTERVAL: Duration = Duration::from_secs(600);
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const DEFAULT_LOGGING_LEVEL: &str = "info";
