// RetryingTransport: JSON requests against the control plane.
//
// Two profiles share one AuthSession: `common` for ordinary calls and
// `spec` for calls that may keep the server busy for a long time. A 401
// triggers one token refresh and one re-send; presigned object links go
// through the `raw_*` calls, which never carry the bearer token.

use crate::auth::AuthSession;
use crate::error::ClientError;
use crate::retry::send_with_retry;
use anyhow::Result;
use futures::TryStreamExt;
use reqwest::{header, Body, Client, Method, Response, StatusCode};
use rndflow_common::{HostContext, HttpClientFactory, RetrySettings, Tracing};
use rndflow_sdk::TraceWriter;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio_util::io::ReaderStream;

/// Which client and retry budgets a request uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Common,
    Spec,
}

pub struct RetryingTransport {
    base_url: String,
    common_client: Client,
    common_policy: RetrySettings,
    spec_client: Client,
    spec_policy: RetrySettings,
    auth: Arc<AuthSession>,
    trace: Tracing,
}

impl RetryingTransport {
    /// Create a transport for the API rooted at `base_url` (`{host}/api`).
    pub fn new(context: &HostContext, base_url: &str) -> Result<Self> {
        let settings = context.settings();
        let base_url = base_url.trim_end_matches('/').to_string();
        let common_client = HttpClientFactory::create_client(&settings.common, settings.ssl_verify)?;
        let spec_client = HttpClientFactory::create_client(&settings.spec, settings.ssl_verify)?;
        let auth = Arc::new(AuthSession::new(context, common_client.clone(), &base_url));

        Ok(Self {
            base_url,
            common_client,
            common_policy: settings.common.clone(),
            spec_client,
            spec_policy: settings.spec.clone(),
            auth,
            trace: context.get_trace("Transport"),
        })
    }

    pub fn auth(&self) -> &Arc<AuthSession> {
        &self.auth
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // -----------------------------------------------------------------------
    // JSON verbs
    // -----------------------------------------------------------------------

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.request(Profile::Common, Method::GET, path, None::<&()>).await
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(Profile::Common, Method::POST, path, Some(body)).await
    }

    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(Profile::Common, Method::PUT, path, Some(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.request(Profile::Common, Method::DELETE, path, None::<&()>).await
    }

    /// POST on the long-timeout profile.
    pub async fn spec_post<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(Profile::Spec, Method::POST, path, Some(body)).await
    }

    /// PUT on the long-timeout profile.
    pub async fn spec_put<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(Profile::Spec, Method::PUT, path, Some(body)).await
    }

    /// Send an authenticated JSON request and decode the response.
    /// An empty body decodes as `null`.
    pub async fn request<B, T>(
        &self,
        profile: Profile,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let payload = body
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|source| ClientError::Decode {
                url: url.clone(),
                source,
            })?;

        let snapshot = self.auth.authorized_snapshot().await?;
        let mut response = self
            .send(profile, &method, &url, snapshot.header.as_deref(), payload.as_deref())
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED && self.auth.has_refresh_token() {
            self.trace
                .warning(&format!("Got 401 for {method} {path}, refreshing access token"));
            self.auth.refresh_after(snapshot.generation).await?;
            let header = self.auth.current_access_header();
            response = self
                .send(profile, &method, &url, header.as_deref(), payload.as_deref())
                .await?;
            if response.status() == StatusCode::UNAUTHORIZED {
                return Err(ClientError::AuthRefresh(format!(
                    "{method} {path} is still unauthorized after token refresh"
                )));
            }
        }

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ClientError::request(&method, &url, e))?;

        if !status.is_success() {
            self.trace.error(&format!("{path} {text}"));
            return Err(ClientError::status(&method, &url, status.as_u16(), &text));
        }

        let text = if text.trim().is_empty() { "null" } else { text.as_str() };
        serde_json::from_str(text).map_err(|source| ClientError::Decode { url, source })
    }

    async fn send(
        &self,
        profile: Profile,
        method: &Method,
        url: &str,
        authorization: Option<&str>,
        payload: Option<&[u8]>,
    ) -> Result<Response, ClientError> {
        let (client, policy) = match profile {
            Profile::Common => (&self.common_client, &self.common_policy),
            Profile::Spec => (&self.spec_client, &self.spec_policy),
        };

        send_with_retry(policy, &self.trace, method, url, || {
            let mut request = client.request(method.clone(), url);
            if let Some(value) = authorization {
                request = request.header(header::AUTHORIZATION, value);
            }
            if let Some(bytes) = payload {
                request = request
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(bytes.to_vec());
            }
            request
        })
        .await
    }

    // -----------------------------------------------------------------------
    // Unauthenticated object storage calls
    // -----------------------------------------------------------------------

    /// GET a presigned link. The response body is left unread for streaming.
    pub async fn raw_get(&self, url: &str) -> Result<Response, ClientError> {
        let method = Method::GET;
        let response = send_with_retry(&self.common_policy, &self.trace, &method, url, || {
            self.common_client.get(url)
        })
        .await?;
        Self::check_raw(&method, url, response).await
    }

    /// PUT the `size` bytes of the file at `path` to a presigned link.
    ///
    /// The file is reopened and streamed on every attempt.
    pub async fn raw_put(
        &self,
        url: &str,
        path: &Path,
        size: u64,
        content_type: &str,
    ) -> Result<(), ClientError> {
        let method = Method::PUT;
        let response = send_with_retry(&self.common_policy, &self.trace, &method, url, || {
            self.common_client
                .put(url)
                .header(header::CONTENT_TYPE, content_type)
                .header(header::CONTENT_LENGTH, size)
                .body(file_body(path))
        })
        .await?;
        Self::check_raw(&method, url, response).await.map(|_| ())
    }

    async fn check_raw(method: &Method, url: &str, response: Response) -> Result<Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ClientError::status(method, url, status.as_u16(), &body))
    }
}

/// A request body that opens `path` when it is first polled.
fn file_body(path: &Path) -> Body {
    let stream = futures::stream::once(tokio::fs::File::open(path.to_path_buf()))
        .map_ok(ReaderStream::new)
        .try_flatten();
    Body::wrap_stream(stream)
}
