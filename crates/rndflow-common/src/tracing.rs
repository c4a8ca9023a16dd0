// Named trace sources. Every message is masked by the shared `SecretMasker`
// and then handed to the `tracing` crate under the source's name.

use crate::secret_masker::SecretMasker;
use rndflow_sdk::TraceWriter;
use std::sync::Arc;

/// A named, secret-masking trace source.
#[derive(Clone)]
pub struct Tracing {
    name: String,
    secret_masker: Arc<SecretMasker>,
}

impl Tracing {
    pub fn new(name: impl Into<String>, secret_masker: Arc<SecretMasker>) -> Self {
        Self {
            name: name.into(),
            secret_masker,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Log an error and each of its causes.
    pub fn error_chain(&self, err: &anyhow::Error) {
        self.error(&format!("{err:#}"));
    }

    fn mask(&self, message: &str) -> String {
        self.secret_masker.mask_secrets(message)
    }
}

impl TraceWriter for Tracing {
    fn info(&self, message: &str) {
        tracing::info!(source = %self.name, "{}", self.mask(message));
    }

    fn verbose(&self, message: &str) {
        tracing::debug!(source = %self.name, "{}", self.mask(message));
    }

    fn warning(&self, message: &str) {
        tracing::warn!(source = %self.name, "{}", self.mask(message));
    }

    fn error(&self, message: &str) {
        tracing::error!(source = %self.name, "{}", self.mask(message));
    }
}

/// Hands out trace sources that share one `SecretMasker`.
pub struct TraceManager {
    secret_masker: Arc<SecretMasker>,
}

impl TraceManager {
    pub fn new(secret_masker: Arc<SecretMasker>) -> Self {
        Self { secret_masker }
    }

    pub fn get(&self, name: &str) -> Tracing {
        Tracing::new(name, self.secret_masker.clone())
    }

    pub fn secret_masker(&self) -> &Arc<SecretMasker> {
        &self.secret_masker
    }
}
