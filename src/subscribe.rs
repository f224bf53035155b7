//! Change notifications for a single metadata key.
//!
//! A subscription reads the key once to establish a baseline, then issues
//! `wait_for_change` requests carrying the last seen ETag. The server holds
//! each request open until the value changes or its own timeout elapses.

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::{sleep_or_cancel, MetadataClient, LONG_POLL_TIMEOUT};
use crate::error::MetadataError;

#[derive(Debug)]
enum State {
    /// Nothing observed yet.
    Baseline,
    /// Waiting for the value to move away from `value`/`etag`.
    Polling { value: String, etag: String },
    Done(Result<(), MetadataError>),
}

impl MetadataClient {
    /// Subscribe to changes of a metadata value.
    ///
    /// `on_change` is called with the current value and `true`, then again
    /// each time the value changes. If the key is deleted it is called once
    /// with `("", false)` and the subscription ends, returning whatever that
    /// last call returned. An error returned from any other call ends the
    /// subscription with that error.
    ///
    /// A polled value counts as changed when its ETag differs from the last
    /// one. If the server sends no ETag on either response, the value text
    /// is compared instead.
    ///
    /// Failed polls are retried after the client's subscribe cooldown.
    /// `key` may already contain query parameters.
    pub async fn subscribe<F>(
        &self,
        cancel: &CancellationToken,
        key: &str,
        mut on_change: F,
    ) -> Result<(), MetadataError>
    where
        F: FnMut(&CancellationToken, &str, bool) -> Result<(), MetadataError>,
    {
        let mut state = State::Baseline;
        loop {
            state = match state {
                State::Baseline => self.establish(cancel, key, &mut on_change).await,
                State::Polling { value, etag } => {
                    self.poll(cancel, key, value, etag, &mut on_change).await
                }
                State::Done(result) => {
                    debug!(key, ok = result.is_ok(), "subscription finished");
                    return result;
                }
            };
        }
    }

    async fn establish<F>(&self, cancel: &CancellationToken, key: &str, on_change: &mut F) -> State
    where
        F: FnMut(&CancellationToken, &str, bool) -> Result<(), MetadataError>,
    {
        let (value, etag) = match self.fetch_with_etag(cancel, key).await {
            Ok(fetched) => fetched,
            Err(err) => return State::Done(Err(err)),
        };
        debug!(key, %etag, "subscription baseline");
        if let Err(err) = on_change(cancel, &value, true) {
            return State::Done(Err(err));
        }
        State::Polling { value, etag }
    }

    async fn poll<F>(
        &self,
        cancel: &CancellationToken,
        key: &str,
        last_value: String,
        last_etag: String,
        on_change: &mut F,
    ) -> State
    where
        F: FnMut(&CancellationToken, &str, bool) -> Result<(), MetadataError>,
    {
        let mut url = match self.metadata_url(key) {
            Ok(url) => url,
            Err(err) => return State::Done(Err(err)),
        };
        url.query_pairs_mut()
            .append_pair("wait_for_change", "true")
            .append_pair("last_etag", &last_etag);

        match self.fetch_url(cancel, url, key, Some(LONG_POLL_TIMEOUT)).await {
            Ok((value, etag)) => {
                if !has_changed(&last_value, &last_etag, &value, &etag) {
                    return State::Polling {
                        value: last_value,
                        etag: last_etag,
                    };
                }
                debug!(key, %etag, "metadata value changed");
                if let Err(err) = on_change(cancel, &value, true) {
                    return State::Done(Err(err));
                }
                State::Polling { value, etag }
            }
            Err(MetadataError::NotDefined(_)) => {
                debug!(key, "metadata value deleted");
                State::Done(on_change(cancel, "", false))
            }
            Err(MetadataError::Cancelled) => State::Done(Err(MetadataError::Cancelled)),
            Err(err) => {
                let cooldown = self.subscribe_cooldown();
                warn!(key, error = %err, ?cooldown, "metadata poll failed");
                if sleep_or_cancel(cancel, cooldown).await {
                    return State::Done(Err(MetadataError::Cancelled));
                }
                State::Polling {
                    value: last_value,
                    etag: last_etag,
                }
            }
        }
    }
}

/// Values are compared by ETag; when neither side has one, by content.
fn has_changed(last_value: &str, last_etag: &str, value: &str, etag: &str) -> bool {
    if last_etag.is_empty() && etag.is_empty() {
        last_value != value
    } else {
        last_etag != etag
    }
}
