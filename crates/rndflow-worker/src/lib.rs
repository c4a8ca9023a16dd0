// rndflow-worker: Executes a single RnDflow job.
// Depends on `rndflow-sdk`, `rndflow-common` and `rndflow-client`.
//
// Architecture:
//   main → JobRunner::run → download (ExecutorApi + ContentAddressableTransfer)
//     → ScriptHandler::run → upload → ExecutorApi::complete
//   HeartbeatEmitter runs beside all three phases.

pub mod heartbeat;
pub mod job;
pub mod job_runner;
pub mod script_handler;
pub mod workspace;

#[cfg(test)]
pub(crate) mod test_support;

pub use heartbeat::HeartbeatEmitter;
pub use job::{Job, JobErrorKind, JobState};
pub use job_runner::JobRunner;
pub use script_handler::ScriptHandler;
