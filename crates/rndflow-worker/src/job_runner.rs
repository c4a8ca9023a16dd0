// JobRunner: drives one job through Download, Execute and Upload.
//
// A download failure is reported once and aborts the job. Execute and upload
// failures are reported through a bounded retry loop, which stops as soon as
// the final manifest has been accepted. The heartbeat runs for the whole
// job and is stopped and joined on every path out of `run`.

use anyhow::{Context, Result};
use rndflow_client::{
    ContentAddressableTransfer, ExecutorApi, FileDescriptor, JobSpec, RetryingTransport,
};
use rndflow_common::constants::{exit_codes, STATUS_DOWNLOADED};
use rndflow_common::{HostContext, JobLog, Tracing};
use rndflow_sdk::TraceWriter;
use std::sync::Arc;

use crate::heartbeat::HeartbeatEmitter;
use crate::job::{Job, JobErrorKind, JobState};
use crate::script_handler::ScriptHandler;
use crate::workspace;

pub struct JobRunner {
    context: Arc<HostContext>,
    api: ExecutorApi,
    transfer: ContentAddressableTransfer,
    scripts: ScriptHandler,
    trace: Tracing,
}

impl JobRunner {
    pub fn new(context: Arc<HostContext>, transport: Arc<RetryingTransport>, job_id: u64) -> Self {
        Self {
            api: ExecutorApi::new(transport.clone(), job_id),
            transfer: ContentAddressableTransfer::new(transport),
            scripts: ScriptHandler::new(context.clone()),
            trace: context.get_trace("JobRunner"),
            context,
        }
    }

    /// Run `job` to the end and return the process exit code.
    ///
    /// The script's own exit code is reported to the server, not returned.
    pub async fn run(&self, job: &mut Job) -> i32 {
        self.trace.info(&format!("Starting job {}", job.id));
        if let Err(e) = job.prepare() {
            self.trace.error_chain(&e);
            let message = format!("{e:?}");
            self.report_error(job, JobErrorKind::DownloadError, &message, 1).await;
            job.transition(JobState::Failed);
            return exit_codes::DOWNLOAD_FAILED;
        }

        let log = self.context.job_log(&job.log_file);
        let mut heartbeat = HeartbeatEmitter::new(
            &self.context,
            self.api.clone(),
            &job.log_file,
            self.context.settings().heartbeat_interval,
            &self.context.shutdown_token(),
        );
        heartbeat.start();

        let exit_code = self.run_phases(job, &log, &heartbeat).await;

        heartbeat.stop().await;
        self.trace.info(&format!(
            "Job {} finished in state {} with exit code {exit_code}",
            job.id, job.state
        ));
        exit_code
    }

    async fn run_phases(&self, job: &mut Job, log: &JobLog, heartbeat: &HeartbeatEmitter) -> i32 {
        job.transition(JobState::Downloading);
        let spec = match self.download(job, log, heartbeat).await {
            Ok(spec) => spec,
            Err(e) => {
                let message = format!("{e:?}");
                log.error(&message);
                self.report_error(job, JobErrorKind::DownloadError, &message, 1)
                    .await;
                job.transition(JobState::Failed);
                return exit_codes::DOWNLOAD_FAILED;
            }
        };

        job.transition(JobState::Executing);
        match self.scripts.run(job, &spec).await {
            Ok(status) => job.status = Some(status),
            Err(e) => {
                let message = format!("{e:?}");
                log.error(&message);
                self.escalate(job, JobErrorKind::ExecuteError, &message).await;
                job.transition(JobState::Failed);
                return exit_codes::EXECUTE_OR_UPLOAD_FAILED;
            }
        }

        job.transition(JobState::Uploading);
        if let Err(e) = self.upload(job, log, heartbeat).await {
            let message = format!("{e:?}");
            log.error(&message);
            self.escalate(job, JobErrorKind::UploadError, &message).await;
            job.transition(JobState::Failed);
            return exit_codes::EXECUTE_OR_UPLOAD_FAILED;
        }

        job.transition(JobState::Completed);
        exit_codes::COMPLETED
    }

    // -----------------------------------------------------------------------
    // Phases
    // -----------------------------------------------------------------------

    async fn download(
        &self,
        job: &Job,
        log: &JobLog,
        heartbeat: &HeartbeatEmitter,
    ) -> Result<JobSpec> {
        let spec = self.api.job().await.context("Failed to fetch job metadata")?;
        heartbeat.send_now().await;

        let files = self.api.files().await.context("Failed to list job files")?;
        let packages = self
            .api
            .packages()
            .await
            .context("Failed to list job packages")?;

        workspace::write_params(&job.root, &spec.fields)?;
        for package in &packages {
            workspace::write_package(&job.root, package)?;
        }

        for file in workspace::select_input_files(&files) {
            if !workspace::is_contained(&file.name) {
                anyhow::bail!("Input file '{}' is outside of the job root", file.name);
            }
            self.transfer
                .download(log, file, &job.root)
                .await
                .with_context(|| format!("Failed to download '{}'", file.name))?;
        }
        log.info("Job inputs downloaded");

        self.api
            .set_status(STATUS_DOWNLOADED)
            .await
            .context("Failed to report the downloaded status")?;
        Ok(spec)
    }

    async fn upload(&self, job: &mut Job, log: &JobLog, heartbeat: &HeartbeatEmitter) -> Result<()> {
        let status = job.status.context("Job has no exit status")?;
        log.info("Uploading job output to server...");

        let paths = workspace::enumerate_output_files(
            &job.root,
            &self.context.settings().exclude_dirs,
            &job.log_file,
        )?;
        let mut files: Vec<FileDescriptor> = self
            .transfer
            .upload(log, job.id, &job.root, &paths)
            .await
            .context("Failed to upload job output")?;

        log.info("Uploading status info to server...");

        // Nothing may write to the log once it has been hashed.
        if job.log_file.is_file() {
            let log_files = self
                .transfer
                .upload(&self.trace, job.id, &job.root, &[job.log_file.clone()])
                .await
                .context("Failed to upload the job log")?;
            files.extend(log_files);
        }

        heartbeat.send_now().await;
        self.api
            .complete(status, &files)
            .await
            .context("Failed to submit job status")?;
        job.data_upload = true;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Error reporting
    // -----------------------------------------------------------------------

    /// Report `kind` with the configured bounded number of attempts.
    pub(crate) async fn escalate(&self, job: &Job, kind: JobErrorKind, message: &str) {
        let attempts = self.context.settings().error_report_attempts;
        self.report_error(job, kind, message, attempts).await;
    }

    /// Send an error report, retrying up to `attempts` times at the
    /// configured interval. Never fails; the last failure is only logged.
    ///
    /// Nothing is sent once `job.data_upload` is set, and a shutdown ends
    /// the waiting between attempts.
    async fn report_error(&self, job: &Job, kind: JobErrorKind, message: &str, attempts: u32) {
        let interval = self.context.settings().error_report_interval;
        let shutdown = self.context.shutdown_token();

        for attempt in 1..=attempts {
            if job.data_upload {
                return;
            }
            match self.api.report_error(kind.as_str(), message).await {
                Ok(()) => {
                    self.trace.info(&format!("Reported {kind} to server"));
                    return;
                }
                Err(e) => {
                    self.trace.warning(&format!(
                        "Can not transfer error information to server ({attempt}/{attempts}): {e}"
                    ));
                }
            }
            if attempt < attempts && !HostContext::delay(interval, &shutdown).await {
                break;
            }
        }
        self.trace
            .error(&format!("Giving up reporting {kind} for job {}", job.id));
    }
}
