// AuthSession: the access/refresh token pair and its refresh protocol.
//
// Refresh tokens are single use, so refreshing is serialized: a caller that
// saw a 401 passes the generation of the token it used, and if another
// caller has refreshed in the meantime the newer token is reused instead of
// spending the refresh token a second time.

use crate::error::ClientError;
use crate::models::TokenPair;
use crate::retry::send_with_retry;
use parking_lot::RwLock;
use reqwest::{header, Client, Method};
use rndflow_common::constants::api;
use rndflow_common::{HostContext, RetrySettings, SecretMasker, Tracing};
use rndflow_sdk::TraceWriter;
use std::sync::Arc;

/// A snapshot of the access credential used for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessSnapshot {
    /// Incremented by every successful refresh.
    pub generation: u64,
    pub header: Option<String>,
}

#[derive(Debug)]
struct Tokens {
    access_token: Option<String>,
    refresh_token: String,
    generation: u64,
}

pub struct AuthSession {
    client: Client,
    policy: RetrySettings,
    refresh_url: String,
    tokens: RwLock<Tokens>,
    refresh_lock: tokio::sync::Mutex<()>,
    secret_masker: Arc<SecretMasker>,
    trace: Tracing,
}

impl AuthSession {
    /// Create a session for the API at `base_url`.
    ///
    /// A configured access token is used as is (delegated mode); without one
    /// the first request refreshes before it is sent.
    pub fn new(context: &HostContext, client: Client, base_url: &str) -> Self {
        let settings = context.settings();
        Self {
            client,
            policy: settings.common.clone(),
            refresh_url: format!("{base_url}{}", api::AUTH_REFRESH),
            tokens: RwLock::new(Tokens {
                access_token: settings.access_token.clone(),
                refresh_token: settings.refresh_token.clone(),
                generation: 0,
            }),
            refresh_lock: tokio::sync::Mutex::new(()),
            secret_masker: context.secret_masker.clone(),
            trace: context.get_trace("AuthSession"),
        }
    }

    /// `Bearer <access token>`, if a token is held.
    pub fn current_access_header(&self) -> Option<String> {
        self.snapshot().header
    }

    pub fn snapshot(&self) -> AccessSnapshot {
        let tokens = self.tokens.read();
        AccessSnapshot {
            generation: tokens.generation,
            header: tokens
                .access_token
                .as_ref()
                .map(|t| format!("Bearer {t}")),
        }
    }

    pub fn has_refresh_token(&self) -> bool {
        !self.tokens.read().refresh_token.is_empty()
    }

    /// A snapshot with an access token, refreshing first if none is held.
    pub async fn authorized_snapshot(&self) -> Result<AccessSnapshot, ClientError> {
        let snapshot = self.snapshot();
        if snapshot.header.is_some() {
            return Ok(snapshot);
        }
        self.refresh_after(snapshot.generation).await?;
        Ok(self.snapshot())
    }

    /// Refresh unless someone already replaced the tokens of `seen_generation`.
    pub async fn refresh_after(&self, seen_generation: u64) -> Result<(), ClientError> {
        let _guard = self.refresh_lock.lock().await;
        if self.tokens.read().generation != seen_generation {
            self.trace
                .verbose("Access token was refreshed concurrently, reusing it");
            return Ok(());
        }
        self.refresh_locked().await
    }

    /// Exchange the refresh token for a new token pair.
    pub async fn refresh(&self) -> Result<(), ClientError> {
        let _guard = self.refresh_lock.lock().await;
        self.refresh_locked().await
    }

    async fn refresh_locked(&self) -> Result<(), ClientError> {
        let refresh_header = format!("Bearer {}", self.tokens.read().refresh_token);
        let method = Method::POST;

        let response = send_with_retry(&self.policy, &self.trace, &method, &self.refresh_url, || {
            self.client
                .post(&self.refresh_url)
                .header(header::AUTHORIZATION, &refresh_header)
        })
        .await
        .map_err(|e| ClientError::AuthRefresh(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ClientError::AuthRefresh(e.to_string()))?;
        if !status.is_success() {
            self.trace
                .error(&format!("{} {}", self.refresh_url, body));
            return Err(ClientError::AuthRefresh(format!(
                "{} returned HTTP {}",
                self.refresh_url,
                status.as_u16()
            )));
        }

        let pair: TokenPair = serde_json::from_str(&body)
            .map_err(|e| ClientError::AuthRefresh(format!("malformed token response: {e}")))?;

        self.secret_masker.add_value(&pair.access_token);
        self.secret_masker.add_value(&pair.refresh_token);

        let mut tokens = self.tokens.write();
        tokens.access_token = Some(pair.access_token);
        tokens.refresh_token = pair.refresh_token;
        tokens.generation += 1;
        self.trace.verbose("Access token refreshed");
        Ok(())
    }
}
