use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use backoff::{backoff::Backoff, ExponentialBackoff};
use chrono::{DateTime, Utc};
use reqwest::{header::RETRY_AFTER, Method, Response, StatusCode};
use tracing::{debug, warn};
use zephyr_scale_config::RetrySettings;

/// Statuses that are retried before being surfaced to the caller.
pub const DEFAULT_RETRY_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Seconds. Wait before retry `n` is `backoff_factor * 2^(n-1)`.
pub const DEFAULT_BACKOFF_FACTOR: f64 = 1.0;

pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(120);

const IDEMPOTENT_METHODS: [Method; 6] = [
    Method::GET,
    Method::HEAD,
    Method::PUT,
    Method::DELETE,
    Method::OPTIONS,
    Method::TRACE,
];

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub backoff_factor: f64,
    pub retryable_status_codes: HashSet<u16>,
    /// Upper bound for any single wait, including `Retry-After` waits.
    pub max_backoff: Duration,
    /// Honour `Retry-After` on 429 and 503 responses.
    pub respect_retry_after: bool,
    /// Only retry methods that are safe to repeat.
    pub idempotent_only: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            retryable_status_codes: DEFAULT_RETRY_STATUS_CODES.into_iter().collect(),
            max_backoff: DEFAULT_MAX_BACKOFF,
            respect_retry_after: true,
            idempotent_only: false,
        }
    }
}

impl RetryPolicy {
    /// Overlays the values a profile sets on top of this policy.
    pub fn with_settings(mut self, settings: &RetrySettings) -> Self {
        if let Some(max_attempts) = settings.max_attempts {
            self.max_attempts = max_attempts;
        }
        if let Some(backoff_factor) = settings.backoff_factor {
            self.backoff_factor = backoff_factor;
        }
        if let Some(idempotent_only) = settings.idempotent_only {
            self.idempotent_only = idempotent_only;
        }
        self
    }

    pub fn backoff(&self) -> ExponentialBackoff {
        let initial = Duration::try_from_secs_f64(self.backoff_factor.max(0.0))
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff);

        ExponentialBackoff {
            current_interval: initial,
            initial_interval: initial,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: self.max_backoff,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    pub fn is_retryable_status(&self, status: StatusCode) -> bool {
        self.retryable_status_codes.contains(&status.as_u16())
    }

    pub fn allows_method(&self, method: &Method) -> bool {
        !self.idempotent_only || IDEMPOTENT_METHODS.contains(method)
    }

    fn retry_after(&self, response: &Response) -> Option<Duration> {
        if !self.respect_retry_after {
            return None;
        }
        if !matches!(
            response.status(),
            StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE
        ) {
            return None;
        }

        response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_retry_after(v, Utc::now()))
            .map(|wait| wait.min(self.max_backoff))
    }

    fn next_wait(&self, backoff: &mut ExponentialBackoff) -> Duration {
        backoff
            .next_backoff()
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Parses a `Retry-After` value given as delta-seconds or an HTTP-date.
/// Dates in the past yield a zero wait.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

/// A connection-level error that survived every permitted attempt.
#[derive(Debug)]
pub struct TransportFailure {
    pub source: reqwest::Error,
    pub attempts: u32,
}

fn is_transient(err: &reqwest::Error) -> bool {
    !(err.is_builder() || err.is_redirect())
}

/// Runs `operation` until it yields a response that should not be retried or
/// the attempt budget is spent. The final response is returned whatever its
/// status, together with the number of attempts made; status interpretation
/// is left to the caller.
pub async fn send_with_retry<F, Fut>(
    policy: &RetryPolicy,
    method: &Method,
    operation: F,
) -> std::result::Result<(Response, u32), TransportFailure>
where
    F: Fn() -> Fut,
    Fut: Future<Output = std::result::Result<Response, reqwest::Error>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let method_retryable = policy.allows_method(method);
    let mut backoff = policy.backoff();
    let mut attempts = 0;

    loop {
        attempts += 1;
        debug!(attempt = attempts, "Executing request");

        let wait = match operation().await {
            Ok(response) => {
                let status = response.status();
                let retryable = method_retryable && policy.is_retryable_status(status);

                if !retryable || attempts >= max_attempts {
                    if retryable {
                        warn!(attempts, status = status.as_u16(), "Max attempts exceeded");
                    } else if attempts > 1 {
                        debug!(attempts, status = status.as_u16(), "Request finished after retries");
                    }
                    return Ok((response, attempts));
                }

                let wait = policy
                    .retry_after(&response)
                    .unwrap_or_else(|| policy.next_wait(&mut backoff));
                warn!(
                    status = status.as_u16(),
                    attempt = attempts,
                    wait_ms = wait.as_millis() as u64,
                    "Retryable status, retrying"
                );
                wait
            }
            Err(source) => {
                if !(method_retryable && is_transient(&source)) || attempts >= max_attempts {
                    if attempts >= max_attempts {
                        warn!(attempts, error = %source, "Max attempts exceeded");
                    }
                    return Err(TransportFailure { source, attempts });
                }

                let wait = policy.next_wait(&mut backoff);
                warn!(
                    error = %source,
                    attempt = attempts,
                    wait_ms = wait.as_millis() as u64,
                    "Request failed, retrying"
                );
                wait
            }
        };

        tokio::time::sleep(wait).await;
    }
}
