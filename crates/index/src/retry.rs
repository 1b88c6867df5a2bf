use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// A service answered with a 4xx status other than 408 or 429. Only configuration changes fix these.
#[derive(Debug, thiserror::Error)]
#[error("{service} rejected the request ({status}): {body}")]
pub struct Rejected {
    pub service: &'static str,
    pub status: u16,
    pub body: String,
}

impl Rejected {
    /// Turns a rejecting response into a `Rejected` error; any other response passes through.
    pub async fn check(service: &'static str, response: reqwest::Response) -> Result<reqwest::Response, Rejected> {
        let status = response.status();
        let throttled = matches!(
            status,
            reqwest::StatusCode::REQUEST_TIMEOUT | reqwest::StatusCode::TOO_MANY_REQUESTS
        );
        if !status.is_client_error() || throttled {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(Rejected {
            service,
            status: status.as_u16(),
            body,
        })
    }
}

/// Everything except a [`Rejected`] is worth another attempt.
pub fn is_transient(err: &anyhow::Error) -> bool {
    err.downcast_ref::<Rejected>().is_none()
}

/// Exponential backoff for idempotent calls to external services.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: usize,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: usize, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::from_millis(initial_backoff_ms),
            max_backoff: Duration::from_millis(max_backoff_ms),
        }
    }

    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self::new(0, 0, 0)
    }

    /// Retry a future with exponential backoff
    pub async fn retry<F, Fut, T, E>(&self, operation_name: &str, f: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.retry_if(operation_name, |_| true, f).await
    }

    /// Like [`retry`](Self::retry), but errors failing `retryable` are returned at once.
    pub async fn retry_if<F, Fut, T, E, P>(&self, operation_name: &str, retryable: P, mut f: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 0;
        let mut backoff = self.initial_backoff;

        loop {
            match f().await {
                Ok(result) => {
                    if attempt > 0 {
                        info!(
                            operation = operation_name,
                            attempts = attempt + 1,
                            "Operation succeeded after retries"
                        );
                    }
                    return Ok(result);
                }
                Err(e) if !retryable(&e) => {
                    warn!(operation = operation_name, error = %e, "Operation failed, not retryable");
                    return Err(e);
                }
                Err(e) => {
                    attempt += 1;
                    if attempt > self.max_retries {
                        warn!(
                            operation = operation_name,
                            attempts = attempt,
                            error = %e,
                            "Operation failed after max retries"
                        );
                        return Err(e);
                    }

                    warn!(
                        operation = operation_name,
                        attempt = attempt,
                        max_retries = self.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Operation failed, retrying"
                    );

                    sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, self.max_backoff);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, 200, 2000)
    }
}
