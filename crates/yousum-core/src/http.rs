//! POST with bounded retry for the completion API.
//!
//! Only 503 responses and transport failures are retried, with a linear
//! backoff of `base_delay * attempt`. Every other status goes back to the
//! caller untouched.

use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based). Saturates
    /// instead of overflowing for huge base delays.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

#[derive(Clone)]
pub struct RequestClient {
    client: Client,
    policy: RetryPolicy,
}

impl RequestClient {
    pub fn new(policy: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| Error::Internal(format!("build reqwest client: {e}")))?;
        Ok(Self::with_client(client, policy))
    }

    pub fn with_client(client: Client, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub async fn send<B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
        headers: &HeaderMap,
    ) -> Result<Response> {
        self.send_with_attempts(endpoint, body, headers, self.policy.max_attempts)
            .await
    }

    /// POST `body` as JSON, making at most `max_attempts` attempts
    /// (at least one).
    pub async fn send_with_attempts<B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
        headers: &HeaderMap,
        max_attempts: u32,
    ) -> Result<Response> {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let result = self
                .client
                .post(endpoint)
                .headers(headers.clone())
                .json(body)
                .send()
                .await;

            let last = attempt >= max_attempts;
            match result {
                Ok(resp) if resp.status() == StatusCode::SERVICE_UNAVAILABLE && !last => {
                    let delay = self.policy.delay_after(attempt);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "service unavailable, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Ok(resp) => {
                    debug!(attempt, status = %resp.status(), "request completed");
                    return Ok(resp);
                }
                Err(e) if !last => {
                    let delay = self.policy.delay_after(attempt);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "request failed, giving up");
                    return Err(Error::TransientNetwork(e));
                }
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_client(max_attempts: u32) -> RequestClient {
        RequestClient::new(RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(10),
        })
        .unwrap()
    }

    #[test]
    fn backoff_is_linear() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(3));
    }

    #[test]
    fn backoff_saturates_for_huge_base_delay() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(u64::MAX),
        };
        assert_eq!(policy.delay_after(2), Duration::MAX);
    }

    #[tokio::test]
    async fn retries_503_until_success() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&mock)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&mock)
            .await;

        let resp = fast_client(3)
            .send(
                &format!("{}/v1/chat", mock.uri()),
                &json!({}),
                &HeaderMap::new(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn persistent_503_returns_last_response() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .expect(4)
            .mount(&mock)
            .await;

        let resp = fast_client(3)
            .send_with_attempts(&mock.uri(), &json!({}), &HeaderMap::new(), 4)
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(resp.text().await.unwrap(), "overloaded");
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("quota exceeded"))
            .expect(1)
            .mount(&mock)
            .await;

        let resp = fast_client(3)
            .send(&mock.uri(), &json!({}), &HeaderMap::new())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn zero_attempts_still_sends_once() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&mock)
            .await;

        let resp = fast_client(3)
            .send_with_attempts(&mock.uri(), &json!({}), &HeaderMap::new(), 0)
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn forwards_headers_and_body() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-test", "1"))
            .and(wiremock::matchers::body_json(json!({"hello": "world"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock)
            .await;

        let mut headers = HeaderMap::new();
        headers.insert("x-test", "1".parse().unwrap());
        let resp = fast_client(1)
            .send(&mock.uri(), &json!({"hello": "world"}), &headers)
            .await
            .unwrap();
        assert!(resp.status().is_success());
    }

    #[tokio::test]
    async fn transport_failure_is_retried_until_success() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            // First connection is closed without a response.
            let (first, _) = listener.accept().await.unwrap();
            drop(first);

            let (mut second, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.ends_with(b"{}") {
                let n = second.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            second
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok")
                .await
                .unwrap();
            second.shutdown().await.unwrap();
        });

        let resp = fast_client(3)
            .send(&format!("http://{addr}/"), &json!({}), &HeaderMap::new())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.text().await.unwrap(), "ok");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn transport_failure_surfaces_after_last_attempt() {
        // Bind then drop a listener so the port is closed.
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };

        let err = fast_client(3)
            .send(&format!("http://{addr}/"), &json!({}), &HeaderMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TransientNetwork(_)));
    }
}
