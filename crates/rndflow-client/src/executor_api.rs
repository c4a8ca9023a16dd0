// ExecutorApi: typed calls of the job execution namespace for one job.
// Holds the transport rather than extending it.

use crate::error::ClientError;
use crate::models::{
    ErrorReport, FileDescriptor, HeartbeatRequest, JobCompletion, JobSpec, Package, StatusRequest,
};
use crate::transport::RetryingTransport;
use rndflow_common::constants::api;
use serde_json::Value;
use std::sync::Arc;

#[derive(Clone)]
pub struct ExecutorApi {
    transport: Arc<RetryingTransport>,
    job_id: u64,
}

impl ExecutorApi {
    pub fn new(transport: Arc<RetryingTransport>, job_id: u64) -> Self {
        Self { transport, job_id }
    }

    pub fn job_id(&self) -> u64 {
        self.job_id
    }

    pub fn transport(&self) -> &Arc<RetryingTransport> {
        &self.transport
    }

    pub async fn job(&self) -> Result<JobSpec, ClientError> {
        self.transport.get(&api::job(self.job_id)).await
    }

    pub async fn files(&self) -> Result<Vec<FileDescriptor>, ClientError> {
        self.transport.get(&api::job_files(self.job_id)).await
    }

    pub async fn packages(&self) -> Result<Vec<Package>, ClientError> {
        self.transport.get(&api::job_packages(self.job_id)).await
    }

    pub async fn heartbeat(&self, log_tail: &str) -> Result<(), ClientError> {
        let _: Value = self
            .transport
            .post(&api::job_heartbeat(self.job_id), &HeartbeatRequest { log_tail })
            .await?;
        Ok(())
    }

    pub async fn set_status(&self, status: &str) -> Result<(), ClientError> {
        let _: Value = self
            .transport
            .post(&api::job_status(self.job_id), &StatusRequest { status })
            .await?;
        Ok(())
    }

    pub async fn report_error(&self, error: &str, message: &str) -> Result<(), ClientError> {
        let _: Value = self
            .transport
            .post(&api::job_error(self.job_id), &ErrorReport { error, message })
            .await?;
        Ok(())
    }

    /// Submit the final status and manifest on the long-timeout profile.
    pub async fn complete(&self, status: i32, files: &[FileDescriptor]) -> Result<(), ClientError> {
        let body = JobCompletion {
            status: status.to_string(),
            files,
        };
        let _: Value = self.transport.spec_put(&api::job(self.job_id), &body).await?;
        Ok(())
    }
}
