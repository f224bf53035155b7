//! Retry policy for metadata requests.

use std::time::Duration;

use reqwest::StatusCode;

/// Retry/backoff configuration (defaults: 5 retries, exponential backoff from
/// 100ms capped at 30s, full jitter).
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl RetryConfig {
    /// A policy that makes exactly one attempt.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Whether the given status code should trigger a retry.
    pub fn should_retry_status(&self, status: StatusCode) -> bool {
        status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
    }

    /// Whether an error from sending the request should trigger a retry.
    ///
    /// Failures while reading a body are not retried.
    pub fn should_retry_error(&self, err: &reqwest::Error) -> bool {
        err.is_timeout() || err.is_connect() || err.is_request()
    }

    pub(crate) fn retryer(&self) -> Retryer {
        Retryer {
            attempts: 0,
            max_retries: self.max_retries,
            backoff: Backoff {
                cur: self.initial_backoff,
                max: self.max_backoff,
                multiplier: self.multiplier,
            },
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Exponential backoff with full jitter: each pause is drawn from `(0, cur]`.
#[derive(Debug)]
struct Backoff {
    cur: Duration,
    max: Duration,
    multiplier: f64,
}

impl Backoff {
    fn pause(&mut self) -> Duration {
        let nanos = u64::try_from(self.cur.as_nanos()).unwrap_or(u64::MAX).max(1);
        let delay = Duration::from_nanos(fastrand::u64(1..=nanos));
        self.cur = self.cur.mul_f64(self.multiplier).min(self.max);
        delay
    }
}

/// Per-request retry state. One is created for every logical fetch.
#[derive(Debug)]
pub(crate) struct Retryer {
    attempts: u32,
    max_retries: u32,
    backoff: Backoff,
}

impl Retryer {
    /// Record a retryable failure. Returns the pause before the next attempt,
    /// or `None` once the retry budget is spent.
    pub(crate) fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_retries {
            return None;
        }
        self.attempts += 1;
        Some(self.backoff.pause())
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        let retry = RetryConfig::default();
        assert!(retry.should_retry_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(retry.should_retry_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(retry.should_retry_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!retry.should_retry_status(StatusCode::NOT_FOUND));
        assert!(!retry.should_retry_status(StatusCode::FORBIDDEN));
        assert!(!retry.should_retry_status(StatusCode::OK));
    }

    #[test]
    fn test_retry_budget_is_bounded() {
        let retry = RetryConfig {
            max_retries: 3,
            ..Default::default()
        };
        let mut retryer = retry.retryer();
        assert!(retryer.next_delay().is_some());
        assert!(retryer.next_delay().is_some());
        assert!(retryer.next_delay().is_some());
        assert!(retryer.next_delay().is_none());
        assert_eq!(retryer.attempts(), 3);
    }

    #[test]
    fn test_disabled_never_retries() {
        let mut retryer = RetryConfig::disabled().retryer();
        assert!(retryer.next_delay().is_none());
    }

    #[test]
    fn test_backoff_respects_cap_and_jitter() {
        let retry = RetryConfig {
            max_retries: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(250),
            multiplier: 2.0,
        };
        let mut retryer = retry.retryer();
        let bounds = [100, 200, 250, 250, 250];
        for bound in bounds {
            let delay = retryer.next_delay().unwrap();
            assert!(delay > Duration::ZERO);
            assert!(delay <= Duration::from_millis(bound), "{delay:?} > {bound}ms");
        }
    }
}
