//! HTTP client for metadata server requests.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderValue, ETAG, USER_AGENT};
use reqwest::{Client, Response, StatusCode, Url};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cache::ValueCache;
use crate::error::MetadataError;
use crate::retry::RetryConfig;

/// Default timeout for metadata requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for establishing a connection to the metadata server.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Per-request timeout for `wait_for_change` requests, which the server holds
/// open until the value changes.
pub const LONG_POLL_TIMEOUT: Duration = Duration::from_secs(360);

/// Pause between failed polls of a subscription.
pub const SUBSCRIBE_COOLDOWN: Duration = Duration::from_secs(5);

/// Documented metadata server address.
pub const METADATA_IP: &str = "169.254.169.254";

/// Environment variable overriding the metadata server host.
pub const METADATA_HOST_ENV: &str = "GCE_METADATA_HOST";

/// Versioned path prefix every key is appended to.
pub const METADATA_PATH: &str = "/computeMetadata/v1/";

/// Required header for metadata requests.
pub const METADATA_FLAVOR_HEADER: &str = "Metadata-Flavor";

/// Required header value for metadata requests.
pub const METADATA_FLAVOR_VALUE: &str = "Google";

/// Client identifier sent as the User-Agent.
pub const USER_AGENT_VALUE: &str = concat!("gce-metadata-rs/", env!("CARGO_PKG_VERSION"));

/// HTTP client for metadata server requests.
///
/// Cloning is cheap; clones share the connection pool and the cache of
/// instance-lifetime values.
#[derive(Debug, Clone)]
pub struct MetadataClient {
    inner: Client,
    base_url: String,
    retry: RetryConfig,
    max_size: Option<usize>,
    subscribe_cooldown: Duration,
    pub(crate) cache: Arc<ValueCache>,
}

impl MetadataClient {
    /// Create a new metadata client with the specified timeout and base URL.
    pub fn new(timeout: Duration, base_url: &str) -> Result<Self, reqwest::Error> {
        let inner = Client::builder()
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .build()?;
        Ok(Self {
            inner,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry: RetryConfig::default(),
            max_size: None,
            subscribe_cooldown: SUBSCRIBE_COOLDOWN,
            cache: Arc::new(ValueCache::default()),
        })
    }

    /// Create a client for the host named by `GCE_METADATA_HOST`, falling back
    /// to the documented metadata IP.
    pub fn from_env() -> Result<Self, reqwest::Error> {
        Self::new(DEFAULT_TIMEOUT, &base_url_from_env())
    }

    /// Create a new metadata client with a custom base URL (for testing).
    pub fn with_base_url(base_url: &str) -> Result<Self, reqwest::Error> {
        Self::new(DEFAULT_TIMEOUT, base_url)
    }

    /// Replace the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the maximum size limit for response bodies.
    ///
    /// A successful response over the limit fails with `MetadataError::TooLarge`.
    /// Error responses keep their status; their body is cut at the limit.
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }

    /// Set the pause between failed polls of a subscription.
    pub fn with_subscribe_cooldown(mut self, cooldown: Duration) -> Self {
        self.subscribe_cooldown = cooldown;
        self
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn subscribe_cooldown(&self) -> Duration {
        self.subscribe_cooldown
    }

    /// Build the request URL for a key. The key may carry a query string.
    pub(crate) fn metadata_url(&self, key: &str) -> Result<Url, MetadataError> {
        let raw = format!(
            "{}{}{}",
            self.base_url,
            METADATA_PATH,
            key.trim_start_matches('/')
        );
        Url::parse(&raw).map_err(|e| MetadataError::InvalidUrl(format!("{raw}: {e}")))
    }

    /// Fetch a value and its ETag.
    ///
    /// The ETag is empty when the server does not send one.
    pub async fn fetch_with_etag(
        &self,
        cancel: &CancellationToken,
        key: &str,
    ) -> Result<(String, String), MetadataError> {
        let url = self.metadata_url(key)?;
        self.fetch_url(cancel, url, key, None).await
    }

    /// Issue a GET with retries and translate the response.
    ///
    /// `key` names the value in `NotDefined` errors; `timeout` overrides the
    /// client's request timeout.
    pub(crate) async fn fetch_url(
        &self,
        cancel: &CancellationToken,
        url: Url,
        key: &str,
        timeout: Option<Duration>,
    ) -> Result<(String, String), MetadataError> {
        let mut retryer = self.retry.retryer();

        let response = loop {
            let mut request = self
                .inner
                .get(url.clone())
                .header(METADATA_FLAVOR_HEADER, METADATA_FLAVOR_VALUE)
                .header(USER_AGENT, USER_AGENT_VALUE);
            if let Some(timeout) = timeout {
                request = request.timeout(timeout);
            }

            let sent = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(MetadataError::Cancelled),
                sent = request.send() => sent,
            };

            let retryable = match &sent {
                Ok(response) => self.retry.should_retry_status(response.status()),
                Err(err) => self.retry.should_retry_error(err),
            };
            if retryable {
                if let Some(delay) = retryer.next_delay() {
                    match &sent {
                        Ok(response) => debug!(
                            %url, status = response.status().as_u16(), attempt = retryer.attempts(), ?delay,
                            "retrying metadata request"
                        ),
                        Err(err) => debug!(
                            %url, error = %err, attempt = retryer.attempts(), ?delay,
                            "retrying metadata request"
                        ),
                    }
                    drop(sent);
                    if sleep_or_cancel(cancel, delay).await {
                        return Err(MetadataError::Cancelled);
                    }
                    continue;
                }
            }
            break sent?;
        };

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(MetadataError::NotDefined(key.to_string()));
        }

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v: &HeaderValue| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if !status.is_success() {
            let body = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(MetadataError::Cancelled),
                body = read_body(response, self.max_size, Overflow::Truncate) => body.unwrap_or_default(),
            };
            return Err(MetadataError::Http {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let body = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(MetadataError::Cancelled),
            body = read_body(response, self.max_size, Overflow::Reject) => body?,
        };
        let body = String::from_utf8(body).map_err(|_| MetadataError::Utf8)?;

        Ok((body, etag))
    }
}

/// Base URL for the metadata server, honoring `GCE_METADATA_HOST`.
pub fn base_url_from_env() -> String {
    match std::env::var(METADATA_HOST_ENV) {
        Ok(host) if !host.is_empty() => base_url_from_host(&host),
        _ => base_url_from_host(METADATA_IP),
    }
}

fn base_url_from_host(host: &str) -> String {
    if host.contains("://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

/// Sleep for `dur`, returning `true` early if the token is cancelled.
pub(crate) async fn sleep_or_cancel(cancel: &CancellationToken, dur: Duration) -> bool {
    tokio::select! {
        () = cancel.cancelled() => true,
        () = tokio::time::sleep(dur) => false,
    }
}

/// What to do with a body that outgrows the client's size limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Overflow {
    /// Fail with `TooLarge`. Used for values.
    Reject,
    /// Keep the first `max_size` bytes. Used for error bodies, which only
    /// annotate the status.
    Truncate,
}

/// Read a response body, honoring an optional size limit.
///
/// With `Overflow::Reject` an oversized `Content-Length` fails before any of
/// the body is read.
pub(crate) async fn read_body(
    mut response: Response,
    max_size: Option<usize>,
    overflow: Overflow,
) -> Result<Vec<u8>, MetadataError> {
    let Some(max_size) = max_size else {
        return Ok(response.bytes().await?.to_vec());
    };

    let declared = response.content_length().map(|cl| cl as usize);
    if overflow == Overflow::Reject {
        if let Some(len) = declared.filter(|&len| len > max_size) {
            return Err(MetadataError::TooLarge(len, max_size));
        }
    }

    let mut body = Vec::with_capacity(declared.unwrap_or(8192).min(max_size));
    while let Some(chunk) = response.chunk().await? {
        let total = body.len().saturating_add(chunk.len());
        if total > max_size {
            match overflow {
                Overflow::Reject => return Err(MetadataError::TooLarge(total, max_size)),
                Overflow::Truncate => {
                    body.extend_from_slice(&chunk[..max_size - body.len()]);
                    break;
                }
            }
        }
        body.extend_from_slice(&chunk);
    }

    Ok(body)
}

impl Default for MetadataClient {
    fn default() -> Self {
        Self::from_env().expect("failed to create HTTP client")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeouts() {
        assert_eq!(DEFAULT_TIMEOUT, Duration::from_secs(5));
        assert_eq!(CONNECT_TIMEOUT, Duration::from_secs(2));
        assert_eq!(SUBSCRIBE_COOLDOWN, Duration::from_secs(5));
    }

    #[test]
    fn test_base_url_from_host() {
        assert_eq!(base_url_from_host(METADATA_IP), "http://169.254.169.254");
        assert_eq!(base_url_from_host("localhost:8080"), "http://localhost:8080");
        assert_eq!(
            base_url_from_host("http://metadata.local"),
            "http://metadata.local"
        );
    }

    #[test]
    fn test_client_strips_trailing_slash() {
        let client = MetadataClient::with_base_url("http://localhost:8080/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_metadata_url() {
        let client = MetadataClient::with_base_url("http://localhost:8080").unwrap();
        assert_eq!(
            client.metadata_url("instance/id").unwrap().as_str(),
            "http://localhost:8080/computeMetadata/v1/instance/id"
        );
        assert_eq!(
            client.metadata_url("/project/attributes/").unwrap().as_str(),
            "http://localhost:8080/computeMetadata/v1/project/attributes/"
        );
        assert_eq!(
            client
                .metadata_url("instance/attributes/?recursive=true")
                .unwrap()
                .as_str(),
            "http://localhost:8080/computeMetadata/v1/instance/attributes/?recursive=true"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let client = MetadataClient::with_base_url("not a url").unwrap();
        assert!(matches!(
            client.metadata_url("instance/id"),
            Err(MetadataError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_clones_share_cache() {
        let client = MetadataClient::with_base_url("http://localhost:8080").unwrap();
        let cloned = client.clone();
        assert!(Arc::ptr_eq(&client.cache, &cloned.cache));
    }

    #[tokio::test]
    async fn test_sleep_or_cancel() {
        let cancel = CancellationToken::new();
        assert!(!sleep_or_cancel(&cancel, Duration::from_millis(1)).await);
        cancel.cancel();
        assert!(sleep_or_cancel(&cancel, Duration::from_secs(60)).await);
    }
}
