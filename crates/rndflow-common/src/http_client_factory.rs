// HttpClientFactory: builds reqwest clients for a retry profile.
// Timeouts and the redirect limit come from the profile; certificate
// verification follows `RNDFLOW_SSL_VERIFY`.

use crate::settings::RetrySettings;
use anyhow::{Context, Result};
use reqwest::{redirect, Client};
use rndflow_sdk::AgentPackage;

pub struct HttpClientFactory;

impl HttpClientFactory {
    /// Create a client for `profile`.
    ///
    /// Redirects are followed up to the profile's redirect budget. Retries
    /// are not done here; the transport counts them against its budgets.
    pub fn create_client(profile: &RetrySettings, ssl_verify: bool) -> Result<Client> {
        let mut builder = Client::builder()
            .connect_timeout(profile.connect_timeout)
            .read_timeout(profile.read_timeout)
            .redirect(redirect::Policy::limited(profile.redirect as usize))
            .user_agent(AgentPackage::user_agent());

        if !ssl_verify {
            tracing::warn!("TLS certificate verification is disabled");
            builder = builder.danger_accept_invalid_certs(true);
        }

        builder.build().context("Failed to build HTTP client")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_both_profiles() {
        assert!(HttpClientFactory::create_client(&RetrySettings::common(), true).is_ok());
        assert!(HttpClientFactory::create_client(&RetrySettings::spec(), false).is_ok());
    }
}
