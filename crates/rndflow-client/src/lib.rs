// rndflow-client: Control plane client for the RnDflow job agent.
// Token-refreshing authenticated transport with retry budgets, content
// addressed file transfer and the typed job execution API.

pub mod auth;
pub mod error;
pub mod executor_api;
pub mod models;
pub mod retry;
pub mod transfer;
pub mod transport;

// Re-exports for convenient access
pub use auth::AuthSession;
pub use error::{ClientError, FailureCategory};
pub use executor_api::ExecutorApi;
pub use models::{FileDescriptor, JobSpec, Package, UploadLink};
pub use transfer::{ContentAddressableTransfer, ContentClassifier, DefaultContentClassifier};
pub use transport::{Profile, RetryingTransport};
