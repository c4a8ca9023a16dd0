// rndflow-common: Shared services for the RnDflow job agent.
// Depends on `rndflow-sdk`; used by the client and worker crates.

pub mod constants;
pub mod host_context;
pub mod http_client_factory;
pub mod logging;
pub mod secret_masker;
pub mod settings;
pub mod tracing;

// ---------------------------------------------------------------------------
// Re-exports for convenient access
// ---------------------------------------------------------------------------

pub use host_context::HostContext;
pub use http_client_factory::HttpClientFactory;
pub use logging::{init_logging, JobLog, LogClock};
pub use secret_masker::SecretMasker;
pub use settings::{LogTimezone, RetrySettings, Settings, SettingsError};
pub use self::tracing::{TraceManager, Tracing};
