// Secret masking for diagnostics. Access and refresh tokens are registered
// here and replaced with `***` before any message reaches `tracing`.

use parking_lot::RwLock;
use std::sync::Arc;

const MASK: &str = "***";

/// Shared, thread-safe set of secret values.
#[derive(Debug, Clone, Default)]
pub struct SecretMasker {
    // Kept sorted longest first so a secret containing another is masked whole.
    secrets: Arc<RwLock<Vec<String>>>,
}

impl SecretMasker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a secret. Blank values are ignored.
    pub fn add_value(&self, secret: &str) {
        let secret = secret.trim();
        if secret.is_empty() {
            return;
        }

        let mut secrets = self.secrets.write();
        if secrets.iter().any(|s| s == secret) {
            return;
        }
        secrets.push(secret.to_string());
        secrets.sort_by_key(|s| std::cmp::Reverse(s.len()));
    }

    /// Replace every registered secret in `input`.
    pub fn mask_secrets(&self, input: &str) -> String {
        let secrets = self.secrets.read();
        secrets.iter().fold(input.to_string(), |acc, secret| {
            if acc.contains(secret.as_str()) {
                acc.replace(secret.as_str(), MASK)
            } else {
                acc
            }
        })
    }

    pub fn secret_count(&self) -> usize {
        self.secrets.read().len()
    }
}
