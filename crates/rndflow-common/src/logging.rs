// Process log setup and the per-job log file writer.
//
// Process diagnostics go through a `tracing_subscriber::fmt` subscriber whose
// timestamps follow the configured date format and timezone. The job log
// (`{id}.log` in the job root) receives the agent's own milestone lines as
// `[timestamp] message`, next to the script output the shell wrapper tees in.

use crate::secret_masker::SecretMasker;
use crate::settings::{LogTimezone, Settings};
use crate::constants;
use anyhow::Result;
use rndflow_sdk::TraceWriter;
use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::EnvFilter;

/// Renders timestamps with a chrono format string in UTC or local time.
#[derive(Debug, Clone)]
pub struct LogClock {
    format: String,
    timezone: LogTimezone,
}

impl LogClock {
    pub fn new(format: impl Into<String>, timezone: LogTimezone) -> Self {
        Self {
            format: format.into(),
            timezone,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.date_format.clone(), settings.timezone)
    }

    /// The current time. An unusable format string falls back to the default.
    pub fn now(&self) -> String {
        let mut out = String::new();
        let rendered = match self.timezone {
            LogTimezone::Utc => write!(out, "{}", chrono::Utc::now().format(&self.format)),
            LogTimezone::Local => write!(out, "{}", chrono::Local::now().format(&self.format)),
        };
        if rendered.is_err() {
            out = chrono::Utc::now()
                .format(constants::DEFAULT_DATE_FORMAT)
                .to_string();
        }
        out
    }
}

impl FormatTime for LogClock {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "[{}]", self.now())
    }
}

/// Install the process-wide subscriber. `RUST_LOG` overrides the configured level.
pub fn init_logging(settings: &Settings) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&settings.logging_level)?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(LogClock::from_settings(settings))
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install log subscriber: {e}"))
}

/// Appends the agent's own lines to the job log file.
///
/// Every write opens, appends and closes the file, so nothing holds it open
/// while the script's wrapper is appending to it. Lines are masked and
/// mirrored to `tracing`. Write failures are reported to `tracing` only.
pub struct JobLog {
    path: PathBuf,
    clock: LogClock,
    secret_masker: Arc<SecretMasker>,
}

impl JobLog {
    pub fn new(path: impl Into<PathBuf>, clock: LogClock, secret_masker: Arc<SecretMasker>) -> Self {
        Self {
            path: path.into(),
            clock,
            secret_masker,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, message: &str) {
        let line = format!("[{}] {}\n", self.clock.now(), message);
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(line.as_bytes()));
        if let Err(e) = result {
            tracing::warn!("Failed to write job log {}: {}", self.path.display(), e);
        }
    }
}

impl TraceWriter for JobLog {
    fn info(&self, message: &str) {
        let message = self.secret_masker.mask_secrets(message);
        tracing::info!("{}", message);
        self.append(&message);
    }

    fn verbose(&self, message: &str) {
        tracing::debug!("{}", self.secret_masker.mask_secrets(message));
    }

    fn warning(&self, message: &str) {
        let message = self.secret_masker.mask_secrets(message);
        tracing::warn!("{}", message);
        self.append(&format!("WARNING: {message}"));
    }

    fn error(&self, message: &str) {
        let message = self.secret_masker.mask_secrets(message);
        tracing::error!("{}", message);
        self.append(&format!("ERROR: {message}"));
    }
}
