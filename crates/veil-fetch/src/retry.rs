//! Single-request fetch with linear backoff.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::FetchError;
use crate::transport::{HttpRequest, HttpResponse, Transport};

/// Statuses that fail immediately without retrying.
pub const NON_RETRYABLE_STATUS: [u16; 6] = [400, 401, 403, 404, 405, 422];

/// Default attempt count.
pub const DEFAULT_RETRIES: u32 = 10;

/// Default backoff unit.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(200);

/// Serde support for `Duration` as integer milliseconds.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// How often and how patiently to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub retries: u32,
    /// Backoff unit; the wait before attempt `k + 1` is `k * base_delay`.
    #[serde(with = "duration_ms", rename = "delayMs")]
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Wait after failed attempt `attempt` (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

/// Returns `true` if `status` must not be retried.
#[must_use]
pub fn is_non_retryable(status: u16) -> bool {
    NON_RETRYABLE_STATUS.contains(&status)
}

/// Fetch `request`, retrying transient failures with linear backoff.
///
/// A 2xx response is returned as-is. A status in
/// [`NON_RETRYABLE_STATUS`] fails at once. Transport errors and other
/// statuses are retried, waiting `base_delay`, `2 * base_delay`, ...
/// between attempts, until `retries` attempts have been made.
///
/// # Errors
///
/// Returns [`FetchError::NonRetryable`] for client errors,
/// [`FetchError::RetriesExhausted`] once every attempt failed, and any
/// other non-retryable transport error unchanged.
pub async fn fetch_with_linear_backoff(
    transport: &dyn Transport,
    request: &HttpRequest,
    policy: &RetryPolicy,
) -> Result<HttpResponse, FetchError> {
    let attempts = policy.retries.max(1);
    let mut attempt = 1;

    loop {
        let error = match transport.send(request).await {
            Ok(response) if response.is_success() => return Ok(response),
            Ok(response) if is_non_retryable(response.status) => {
                tracing::debug!(url = %request.url, status = response.status, "not retrying");
                return Err(FetchError::NonRetryable {
                    status: response.status,
                });
            }
            Ok(response) => FetchError::Status {
                status: response.status,
            },
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => e,
        };

        if attempt >= attempts {
            tracing::warn!(url = %request.url, attempts, "giving up: {error}");
            return Err(FetchError::RetriesExhausted {
                attempts,
                last: error.to_string(),
            });
        }

        let delay = policy.delay_after(attempt);
        tracing::debug!(url = %request.url, attempt, ?delay, "retrying: {error}");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::time::Instant;

    use super::*;

    /// Replays scripted outcomes and records when each attempt happened.
    pub(crate) struct ScriptedTransport {
        outcomes: Mutex<VecDeque<Result<HttpResponse, FetchError>>>,
        fallback: Result<HttpResponse, FetchError>,
        pub calls: Mutex<Vec<Instant>>,
    }

    impl ScriptedTransport {
        pub(crate) fn new(
            outcomes: Vec<Result<HttpResponse, FetchError>>,
            fallback: Result<HttpResponse, FetchError>,
        ) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                fallback,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, _request: &HttpRequest) -> Result<HttpResponse, FetchError> {
            self.calls.lock().unwrap().push(Instant::now());
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone())
        }
    }

    pub(crate) fn status(status: u16) -> Result<HttpResponse, FetchError> {
        Ok(HttpResponse {
            status,
            body: Vec::new(),
        })
    }

    fn policy(retries: u32) -> RetryPolicy {
        RetryPolicy {
            retries,
            base_delay: Duration::from_millis(100),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn success_returns_first_response() {
        let transport = ScriptedTransport::new(vec![], status(200));
        let response = fetch_with_linear_backoff(&transport, &HttpRequest::get("u"), &policy(3))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_fails_after_one_attempt() {
        let transport = ScriptedTransport::new(vec![], status(404));
        let err = fetch_with_linear_backoff(&transport, &HttpRequest::get("u"), &policy(5))
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::NonRetryable { status: 404 });
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn every_listed_status_is_terminal() {
        for code in NON_RETRYABLE_STATUS {
            let transport = ScriptedTransport::new(vec![], status(code));
            let err = fetch_with_linear_backoff(&transport, &HttpRequest::get("u"), &policy(5))
                .await
                .unwrap_err();
            assert!(!err.is_retryable(), "{code}");
            assert_eq!(transport.call_count(), 1, "{code}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn network_error_backs_off_linearly() {
        let transport = ScriptedTransport::new(vec![], Err(FetchError::Transport("down".into())));
        let err = fetch_with_linear_backoff(&transport, &HttpRequest::get("u"), &policy(4))
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::RetriesExhausted { attempts: 4, .. }));
        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls.len(), 4);
        let gaps: Vec<Duration> = calls.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(300),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn server_error_then_success_recovers() {
        let transport = ScriptedTransport::new(vec![status(503), status(500)], status(200));
        let response = fetch_with_linear_backoff(&transport, &HttpRequest::get("u"), &policy(5))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_url_is_not_retried() {
        let transport = ScriptedTransport::new(vec![], Err(FetchError::InvalidUrl("x".into())));
        let err = fetch_with_linear_backoff(&transport, &HttpRequest::get("u"), &policy(5))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl(_)));
        assert_eq!(transport.call_count(), 1);
    }

    #[test]
    fn policy_defaults_and_wire_shape() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.retries, 10);
        assert_eq!(policy.delay_after(3), Duration::from_millis(600));

        let json = serde_json::to_string(&policy).unwrap();
        assert_eq!(json, r#"{"retries":10,"delayMs":200}"#);
    }
}
