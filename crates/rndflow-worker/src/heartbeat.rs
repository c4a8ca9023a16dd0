// HeartbeatEmitter: background liveness pings carrying the job log tail.

use rndflow_client::ExecutorApi;
use rndflow_common::constants::HEARTBEAT_LOG_TAIL_LINES;
use rndflow_common::{HostContext, Tracing};
use rndflow_sdk::{IOUtil, TraceWriter};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Posts the last lines of the job log every `period` until stopped.
///
/// The first periodic beat goes out one full period after `start`. Milestone
/// beats are sent through [`HeartbeatEmitter::send_now`]. Failures are
/// logged and dropped; the next period tries again.
pub struct HeartbeatEmitter {
    api: ExecutorApi,
    log_file: PathBuf,
    period: Duration,
    trace: Tracing,
    stop_token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl HeartbeatEmitter {
    /// The emitter also stops when `parent` is cancelled.
    pub fn new(
        context: &HostContext,
        api: ExecutorApi,
        log_file: impl Into<PathBuf>,
        period: Duration,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            api,
            log_file: log_file.into(),
            period,
            trace: context.get_trace("HeartbeatEmitter"),
            stop_token: parent.child_token(),
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }
        let api = self.api.clone();
        let log_file = self.log_file.clone();
        let period = self.period;
        let trace = self.trace.clone();
        let token = self.stop_token.clone();

        self.handle = Some(tokio::spawn(async move {
            loop {
                if !HostContext::delay(period, &token).await {
                    break;
                }
                tokio::select! {
                    _ = beat(&api, &log_file, &trace) => {}
                    _ = token.cancelled() => break,
                }
            }
            trace.verbose("Heartbeat stopped");
        }));
    }

    /// Send one heartbeat now, outside the periodic cadence.
    pub async fn send_now(&self) {
        beat(&self.api, &self.log_file, &self.trace).await;
    }

    /// Signal the task to stop and wait for it to finish.
    pub async fn stop(&mut self) {
        self.stop_token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                self.trace.warning(&format!("Heartbeat task failed: {e}"));
            }
        }
    }
}

async fn beat(api: &ExecutorApi, log_file: &Path, trace: &Tracing) {
    let log_tail = match IOUtil::tail_lines(log_file, HEARTBEAT_LOG_TAIL_LINES) {
        Ok(tail) => tail,
        Err(e) => {
            trace.warning(&format!("Failed to read log tail: {e:#}"));
            String::new()
        }
    };
    if let Err(e) = api.heartbeat(&log_tail).await {
        trace.warning(&format!("Heartbeat failed: {e}"));
    }
}
