// Retry budgets for one request.
//
// Each failed attempt is charged against the total budget and against the
// budget of its category (connect, read, redirect, status, other). Once any
// budget drops below zero the last failure is surfaced. Before retry `n`
// the request waits `backoff_factor * 2^(n-1)` seconds.

use crate::error::{ClientError, FailureCategory};
use rndflow_common::constants::RETRYABLE_STATUS_CODES;
use rndflow_common::RetrySettings;
use rndflow_sdk::TraceWriter;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use std::time::Duration;

/// Upper bound of a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(120);

/// Remaining retries of one request.
#[derive(Debug, Clone)]
pub struct RetryBudget {
    total: i64,
    connect: i64,
    read: i64,
    redirect: i64,
    status: i64,
    other: i64,
    backoff_factor: f64,
    retries: u32,
}

impl RetryBudget {
    pub fn new(policy: &RetrySettings) -> Self {
        Self {
            total: policy.total as i64,
            connect: policy.connect as i64,
            read: policy.read as i64,
            redirect: policy.redirect as i64,
            status: policy.status as i64,
            other: policy.other as i64,
            backoff_factor: policy.backoff_factor,
            retries: 0,
        }
    }

    /// Charge a failure. Returns the wait before the next attempt, or `None`
    /// once a budget is exhausted.
    pub fn charge(&mut self, category: FailureCategory) -> Option<Duration> {
        self.total -= 1;
        let remaining = match category {
            FailureCategory::Connect => &mut self.connect,
            FailureCategory::Read => &mut self.read,
            FailureCategory::Redirect => &mut self.redirect,
            FailureCategory::Status => &mut self.status,
            FailureCategory::Other => &mut self.other,
        };
        *remaining -= 1;
        if self.total < 0 || *remaining < 0 {
            return None;
        }

        self.retries += 1;
        Some(self.backoff())
    }

    /// Retries granted so far.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    fn backoff(&self) -> Duration {
        let exp = self.retries.saturating_sub(1).min(30) as i32;
        let millis = (self.backoff_factor * 2f64.powi(exp) * 1000.0).round();
        Duration::from_millis(millis as u64).min(MAX_BACKOFF)
    }
}

/// Whether the status counts against the status budget.
pub fn is_retryable_status(status: StatusCode) -> bool {
    RETRYABLE_STATUS_CODES.contains(&status.as_u16())
}

/// Whether a request may be re-sent after the server may have seen it.
pub fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::PUT | Method::DELETE | Method::OPTIONS | Method::TRACE
    )
}

/// Send the request produced by `build` until it succeeds or a budget runs out.
///
/// Responses with a retryable status are returned as they are once the
/// status budget is spent, so the caller can report their body. Requests
/// with a non-idempotent method are only retried when the connection could
/// not be established.
pub async fn send_with_retry<F>(
    policy: &RetrySettings,
    trace: &dyn TraceWriter,
    method: &Method,
    url: &str,
    build: F,
) -> Result<Response, ClientError>
where
    F: Fn() -> RequestBuilder,
{
    let mut budget = RetryBudget::new(policy);
    let idempotent = is_idempotent(method);
    loop {
        let (category, reason, delay) = match build().send().await {
            Ok(response) if !idempotent => return Ok(response),
            Ok(response) if is_retryable_status(response.status()) => {
                let reason = format!("HTTP {}", response.status());
                match budget.charge(FailureCategory::Status) {
                    Some(delay) => (FailureCategory::Status, reason, delay),
                    None => return Ok(response),
                }
            }
            Ok(response) => return Ok(response),
            Err(e) => {
                let category = FailureCategory::of(&e);
                if !idempotent && category != FailureCategory::Connect {
                    return Err(ClientError::request(method, url, e));
                }
                match budget.charge(category) {
                    Some(delay) => (category, e.to_string(), delay),
                    None => return Err(ClientError::request(method, url, e)),
                }
            }
        };

        trace.warning(&format!(
            "{method} {url}: {category} failure ({reason}), retry {} in {:.1}s",
            budget.retries(),
            delay.as_secs_f64()
        ));
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rndflow_sdk::trace::NullTraceWriter;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast(mut policy: RetrySettings) -> RetrySettings {
        policy.backoff_factor = 0.0;
        policy
    }

    #[test]
    fn backoff_doubles_per_retry() {
        let mut budget = RetryBudget::new(&RetrySettings::common());
        let delays: Vec<Duration> = (0..3)
            .map(|_| budget.charge(FailureCategory::Connect).unwrap())
            .collect();
        assert_eq!(delays[0], Duration::from_millis(300));
        assert_eq!(delays[1], Duration::from_millis(600));
        assert_eq!(delays[2], Duration::from_millis(1200));
        assert!(budget.charge(FailureCategory::Connect).is_none());
    }

    #[test]
    fn total_budget_caps_mixed_failures() {
        let mut budget = RetryBudget::new(&RetrySettings::common());
        assert!(budget.charge(FailureCategory::Connect).is_some());
        assert!(budget.charge(FailureCategory::Read).is_some());
        assert!(budget.charge(FailureCategory::Status).is_some());
        assert!(budget.charge(FailureCategory::Redirect).is_none());
    }

    #[test]
    fn other_failures_are_not_retried_by_default() {
        let mut budget = RetryBudget::new(&RetrySettings::common());
        assert!(budget.charge(FailureCategory::Other).is_none());
    }

    #[test]
    fn backoff_is_capped() {
        let mut policy = RetrySettings::common();
        policy.total = 50;
        policy.read = 50;
        policy.backoff_factor = 10.0;
        let mut budget = RetryBudget::new(&policy);
        let last = (0..20)
            .map(|_| budget.charge(FailureCategory::Read).unwrap())
            .last()
            .unwrap();
        assert_eq!(last, MAX_BACKOFF);
    }

    #[tokio::test]
    async fn retries_bad_gateway_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/x"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(2)
            .with_priority(1)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/x"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/x", server.uri());
        let response = send_with_retry(
            &fast(RetrySettings::common()),
            &NullTraceWriter,
            &Method::GET,
            &url,
            || client.get(&url),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn exhausted_status_budget_returns_last_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(504).set_body_string("gateway timeout"))
            .expect(4)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/slow", server.uri());
        let response = send_with_retry(
            &fast(RetrySettings::common()),
            &NullTraceWriter,
            &Method::GET,
            &url,
            || client.get(&url),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), 504);
    }

    #[tokio::test]
    async fn other_server_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/boom", server.uri());
        let response = send_with_retry(
            &fast(RetrySettings::common()),
            &NullTraceWriter,
            &Method::GET,
            &url,
            || client.get(&url),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), 500);
    }

    #[test]
    fn post_is_not_idempotent() {
        assert!(is_idempotent(&Method::GET));
        assert!(is_idempotent(&Method::PUT));
        assert!(is_idempotent(&Method::DELETE));
        assert!(!is_idempotent(&Method::POST));
        assert!(!is_idempotent(&Method::PATCH));
    }

    #[tokio::test]
    async fn post_with_bad_gateway_is_sent_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/jobs/1/error"))
            .respond_with(ResponseTemplate::new(502))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/jobs/1/error", server.uri());
        let response = send_with_retry(
            &fast(RetrySettings::common()),
            &NullTraceWriter,
            &Method::POST,
            &url,
            || client.post(&url).body("{}"),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), 502);
    }

    #[tokio::test]
    async fn put_with_bad_gateway_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/jobs/1"))
            .respond_with(ResponseTemplate::new(502))
            .expect(4)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/jobs/1", server.uri());
        let response = send_with_retry(
            &fast(RetrySettings::common()),
            &NullTraceWriter,
            &Method::PUT,
            &url,
            || client.put(&url).body("{}"),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), 502);
    }

    #[tokio::test]
    async fn post_retries_refused_connections() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = reqwest::Client::new();
        let url = format!("http://127.0.0.1:{port}/x");
        let trace = rndflow_sdk::trace::CollectingTraceWriter::default();
        let err = send_with_retry(
            &fast(RetrySettings::common()),
            &trace,
            &Method::POST,
            &url,
            || client.post(&url),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Request {
                category: FailureCategory::Connect,
                ..
            }
        ));
        let retries = trace
            .messages()
            .iter()
            .filter(|(level, _)| *level == rndflow_sdk::trace::TraceLevel::Warning)
            .count();
        assert_eq!(retries, 3);
    }

    #[tokio::test]
    async fn connection_refused_surfaces_connect_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = reqwest::Client::new();
        let url = format!("http://127.0.0.1:{port}/x");
        let err = send_with_retry(
            &fast(RetrySettings::common()),
            &NullTraceWriter,
            &Method::GET,
            &url,
            || client.get(&url),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Request {
                category: FailureCategory::Connect,
                ..
            }
        ));
    }
}
