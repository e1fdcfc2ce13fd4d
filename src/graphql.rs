use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::{AppError, AppResult};
use crate::rate_limit::RateLimiter;

// Backoff schedule: base * 2^n, capped, each wait stretched by a random
// factor in [1, 2).
const RETRY_BASE_DELAY_MS: u64 = 1000;
const RETRY_MAX_DELAY_MS: u64 = 60000;

// Defaults applied when only one rate-limit parameter is configured.
const DEFAULT_RATE_LIMIT_INTERVAL_MS: u64 = 1000;
const DEFAULT_RATE_LIMIT_REQUESTS_PER_INTERVAL: u32 = 1;

/// Execution seam: performs one GraphQL request attempt. Production uses
/// `HttpExecutor`; tests inject recording fakes.
#[async_trait]
pub trait GraphqlExecutor: Send + Sync {
    async fn execute(&self, endpoint: &str, document: &str, variables: Value) -> AppResult<Value>;
}

/// reqwest-backed executor. A GraphQL response carrying a non-empty
/// `errors` array is a `Remote` failure even when HTTP succeeded.
pub struct HttpExecutor {
    client: reqwest::Client,
}

impl HttpExecutor {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GraphqlExecutor for HttpExecutor {
    async fn execute(&self, endpoint: &str, document: &str, variables: Value) -> AppResult<Value> {
        let response = self
            .client
            .post(endpoint)
            .json(&serde_json::json!({
                "query": document,
                "variables": variables,
            }))
            .send()
            .await?
            .error_for_status()?;

        let body: Value = response.json().await?;
        if let Some(errors) = body.get("errors").and_then(Value::as_array) {
            if !errors.is_empty() {
                return Err(AppError::remote(
                    serde_json::to_string(errors).unwrap_or_else(|_| "GraphQL errors".to_string()),
                ));
            }
        }
        Ok(body.get("data").cloned().unwrap_or(Value::Null))
    }
}

/// Partial client configuration. Fields left `None` keep their current
/// values; supplying either rate-limit parameter rebuilds the bucket, with
/// the missing side filled from defaults.
#[derive(Clone, Debug, Default)]
pub struct GraphqlClientConfig {
    pub endpoint: Option<String>,
    pub rate_limit_interval_ms: Option<u64>,
    pub rate_limit_requests_per_interval: Option<u32>,
    pub retries: Option<u32>,
}

struct Inner {
    endpoint: Option<String>,
    retries: u32,
    rate_limit: Option<(u64, u32)>,
    limiter: Option<Arc<RateLimiter>>,
}

/// Rate-limited, retrying GraphQL mutation sender.
pub struct GraphqlClient {
    executor: Arc<dyn GraphqlExecutor>,
    inner: RwLock<Inner>,
}

impl GraphqlClient {
    pub fn new(executor: Arc<dyn GraphqlExecutor>) -> Self {
        Self {
            executor,
            inner: RwLock::new(Inner {
                endpoint: None,
                retries: 0,
                rate_limit: None,
                limiter: None,
            }),
        }
    }

    /// Applies a partial configuration. Idempotent: re-applying the same
    /// config changes nothing, and the limiter is only rebuilt when its
    /// parameters actually change (in-flight `acquire` calls on the old
    /// bucket are unaffected).
    pub async fn configure(&self, config: GraphqlClientConfig) {
        let mut inner = self.inner.write().await;

        if let Some(endpoint) = config.endpoint {
            inner.endpoint = Some(endpoint);
        }
        if let Some(retries) = config.retries {
            inner.retries = retries;
        }

        // An absent pair leaves the limiter untouched, so a retries-only
        // update rebuilds nothing.
        if config.rate_limit_interval_ms.is_some()
            || config.rate_limit_requests_per_interval.is_some()
        {
            let desired = (
                config
                    .rate_limit_interval_ms
                    .unwrap_or(DEFAULT_RATE_LIMIT_INTERVAL_MS),
                config
                    .rate_limit_requests_per_interval
                    .unwrap_or(DEFAULT_RATE_LIMIT_REQUESTS_PER_INTERVAL),
            );
            if inner.rate_limit != Some(desired) {
                inner.limiter = Some(Arc::new(RateLimiter::new(desired.0, desired.1)));
                inner.rate_limit = Some(desired);
            }
        }
    }

    /// Sends one GraphQL document, retrying failed attempts with capped
    /// exponential backoff. `retries == 0` means a single attempt. Every
    /// attempt (including retries) passes through the rate limiter.
    pub async fn send(&self, document: &str, variables: Value) -> AppResult<Value> {
        let (endpoint, retries, limiter) = {
            let inner = self.inner.read().await;
            let endpoint = inner
                .endpoint
                .clone()
                .ok_or_else(|| AppError::not_configured("no GraphQL endpoint set"))?;
            (endpoint, inner.retries, inner.limiter.clone())
        };

        let mut delay_ms = RETRY_BASE_DELAY_MS;
        let mut attempt: u32 = 1;
        loop {
            if let Some(limiter) = &limiter {
                limiter.acquire().await;
            }

            match self
                .executor
                .execute(&endpoint, document, variables.clone())
                .await
            {
                Ok(data) => return Ok(data),
                Err(err) => {
                    let will_retry = attempt <= retries;
                    tracing::warn!(
                        error = %err,
                        attempt = attempt,
                        will_retry = will_retry,
                        "GraphQL request failed"
                    );
                    if !will_retry {
                        return Err(err);
                    }
                }
            }

            let jitter: f64 = rand::thread_rng().gen_range(1.0..2.0);
            let wait = Duration::from_millis((delay_ms as f64 * jitter) as u64);
            tokio::time::sleep(wait).await;
            delay_ms = (delay_ms * 2).min(RETRY_MAX_DELAY_MS);
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    struct FlakyExecutor {
        calls: AtomicU32,
        succeed_on: u32,
    }

    #[async_trait]
    impl GraphqlExecutor for FlakyExecutor {
        async fn execute(&self, _: &str, _: &str, _: Value) -> AppResult<Value> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= self.succeed_on {
                Ok(serde_json::json!({"processEvent": {"id": "evt"}}))
            } else {
                Err(AppError::transport("connection refused"))
            }
        }
    }

    async fn client_with(succeed_on: u32, retries: u32) -> (Arc<FlakyExecutor>, GraphqlClient) {
        let executor = Arc::new(FlakyExecutor {
            calls: AtomicU32::new(0),
            succeed_on,
        });
        let client = GraphqlClient::new(executor.clone());
        client
            .configure(GraphqlClientConfig {
                endpoint: Some("http://target/graphql".to_string()),
                retries: Some(retries),
                ..Default::default()
            })
            .await;
        (executor, client)
    }

    #[tokio::test]
    async fn test_unconfigured_client_errors_without_attempting() {
        let executor = Arc::new(FlakyExecutor {
            calls: AtomicU32::new(0),
            succeed_on: 1,
        });
        let client = GraphqlClient::new(executor.clone());
        let err = client.send("query { x }", Value::Null).await.unwrap_err();
        assert!(matches!(err, AppError::NotConfigured(_)));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_zero_retries_means_single_attempt() {
        let (executor, client) = client_with(2, 0).await;
        let err = client.send("query { x }", Value::Null).await.unwrap_err();
        assert!(matches!(err, AppError::Transport(_)));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let (executor, client) = client_with(3, 5).await;
        let data = client.send("query { x }", Value::Null).await.unwrap();
        assert_eq!(executor.calls.load(Ordering::SeqCst), 3);
        assert_eq!(data["processEvent"]["id"], "evt");
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_surface_last_error() {
        let (executor, client) = client_with(u32::MAX, 2).await;
        let err = client.send("query { x }", Value::Null).await.unwrap_err();
        assert!(matches!(err, AppError::Transport(_)));
        // retries + 1 total attempts
        assert_eq!(executor.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_is_bounded_by_schedule() {
        use tokio::time::Instant;

        let (_, client) = client_with(3, 5).await;
        let start = Instant::now();
        client.send("query { x }", Value::Null).await.unwrap();
        // Two waits: 1000ms and 2000ms, each jittered by [1, 2).
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(3000));
        assert!(elapsed < Duration::from_millis(6000));
    }

    #[tokio::test]
    async fn test_reconfigure_with_same_values_is_idempotent() {
        let (_, client) = client_with(1, 0).await;
        let config = GraphqlClientConfig {
            rate_limit_interval_ms: Some(500),
            rate_limit_requests_per_interval: Some(2),
            ..Default::default()
        };
        client.configure(config.clone()).await;
        let first = {
            let inner = client.inner.read().await;
            inner.limiter.clone().map(|l| Arc::as_ptr(&l) as usize)
        };
        client.configure(config).await;
        let second = {
            let inner = client.inner.read().await;
            inner.limiter.clone().map(|l| Arc::as_ptr(&l) as usize)
        };
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_partial_rate_limit_config_uses_defaults() {
        let (_, client) = client_with(1, 0).await;
        client
            .configure(GraphqlClientConfig {
                rate_limit_interval_ms: Some(2000),
                ..Default::default()
            })
            .await;
        let inner = client.inner.read().await;
        assert_eq!(inner.rate_limit, Some((2000, 1)));
        assert!(inner.limiter.is_some());
    }

    #[tokio::test]
    async fn test_retries_only_update_keeps_limiter() {
        let (_, client) = client_with(1, 0).await;
        client
            .configure(GraphqlClientConfig {
                rate_limit_interval_ms: Some(1000),
                rate_limit_requests_per_interval: Some(1),
                ..Default::default()
            })
            .await;
        let before = {
            let inner = client.inner.read().await;
            inner.limiter.clone().map(|l| Arc::as_ptr(&l) as usize)
        };
        assert!(before.is_some());

        client
            .configure(GraphqlClientConfig {
                retries: Some(3),
                ..Default::default()
            })
            .await;
        let inner = client.inner.read().await;
        assert_eq!(inner.retries, 3);
        assert_eq!(
            inner.limiter.clone().map(|l| Arc::as_ptr(&l) as usize),
            before
        );
        assert_eq!(inner.rate_limit, Some((1000, 1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_gates_consecutive_sends() {
        use tokio::time::Instant;

        let (_, client) = client_with(1, 0).await;
        client
            .configure(GraphqlClientConfig {
                rate_limit_interval_ms: Some(1000),
                rate_limit_requests_per_interval: Some(1),
                ..Default::default()
            })
            .await;

        let start = Instant::now();
        client.send("query { x }", Value::Null).await.unwrap();
        let after_first = start.elapsed();
        client.send("query { x }", Value::Null).await.unwrap();
        // The second send waits out the rest of the interval.
        assert!(after_first < Duration::from_millis(1000));
        assert!(start.elapsed() >= Duration::from_millis(1000));
    }
}
