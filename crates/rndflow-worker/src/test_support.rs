// Shared fixtures for the worker tests.

use rndflow_client::{ExecutorApi, RetryingTransport};
use rndflow_common::{HostContext, Settings};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use wiremock::MockServer;

/// Delegated-mode settings with no backoff and short escalation waits.
pub(crate) fn test_settings(work_directory: &Path) -> Settings {
    let mut settings = Settings::new("r0");
    settings.access_token = Some("a0".into());
    settings.common.backoff_factor = 0.0;
    settings.spec.backoff_factor = 0.0;
    settings.error_report_attempts = 3;
    settings.error_report_interval = Duration::from_millis(10);
    settings.work_directory = work_directory.to_path_buf();
    settings
}

pub(crate) fn test_context(work_directory: &Path) -> Arc<HostContext> {
    HostContext::new(test_settings(work_directory))
}

pub(crate) fn transport_for(ctx: &HostContext, server: &MockServer) -> Arc<RetryingTransport> {
    Arc::new(RetryingTransport::new(ctx, &format!("{}/api", server.uri())).unwrap())
}

pub(crate) fn api_for(ctx: &HostContext, server: &MockServer, job_id: u64) -> ExecutorApi {
    ExecutorApi::new(transport_for(ctx, server), job_id)
}
