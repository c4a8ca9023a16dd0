// HostContext: the process-wide context handed to every component.
// Holds the settings, the secret masker, named trace sources and the
// shutdown token that OS signals trigger.

use crate::logging::{JobLog, LogClock};
use crate::secret_masker::SecretMasker;
use crate::settings::Settings;
use crate::tracing::{TraceManager, Tracing};

use parking_lot::Mutex;
use rndflow_sdk::TraceWriter;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct HostContext {
    settings: Arc<Settings>,

    /// Shared by every trace source and job log.
    pub secret_masker: Arc<SecretMasker>,

    trace_manager: TraceManager,

    shutdown_token: CancellationToken,

    shutdown_reason: Mutex<Option<String>>,
}

impl HostContext {
    /// Create the context. Configured tokens are registered as secrets.
    pub fn new(settings: Settings) -> Arc<Self> {
        let secret_masker = Arc::new(SecretMasker::new());
        secret_masker.add_value(&settings.refresh_token);
        if let Some(ref access_token) = settings.access_token {
            secret_masker.add_value(access_token);
        }

        Arc::new(Self {
            settings: Arc::new(settings),
            trace_manager: TraceManager::new(secret_masker.clone()),
            secret_masker,
            shutdown_token: CancellationToken::new(),
            shutdown_reason: Mutex::new(None),
        })
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    /// A named trace source.
    pub fn get_trace(&self, name: &str) -> Tracing {
        self.trace_manager.get(name)
    }

    /// The root directory of job `job_id`.
    pub fn job_root(&self, job_id: u64) -> PathBuf {
        self.settings.work_directory.join(job_id.to_string())
    }

    /// A writer appending to the job log at `path`.
    pub fn job_log(&self, path: impl Into<PathBuf>) -> JobLog {
        JobLog::new(
            path,
            LogClock::from_settings(&self.settings),
            self.secret_masker.clone(),
        )
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn shutdown_reason(&self) -> Option<String> {
        self.shutdown_reason.lock().clone()
    }

    /// Cancel everything waiting on the shutdown token.
    pub fn shutdown(&self, reason: &str) {
        self.get_trace("HostContext")
            .info(&format!("Agent will be shut down: {reason}"));
        self.shutdown_reason.lock().get_or_insert_with(|| reason.to_string());
        self.shutdown_token.cancel();
    }

    /// Sleep for `duration` unless `token` fires first.
    /// Returns `false` when woken by cancellation.
    pub async fn delay(duration: Duration, token: &CancellationToken) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = token.cancelled() => false,
        }
    }
}
