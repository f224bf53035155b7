//! Error types for metadata server operations.

use thiserror::Error;

/// Errors that can occur when talking to the metadata server.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// The requested key is not defined on this instance.
    ///
    /// Not returned when the value is defined to be the empty string.
    #[error("metadata {0:?} not defined")]
    NotDefined(String),

    /// The server answered with a non-success status other than 404.
    #[error("metadata server returned {status}: {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body text.
        body: String,
    },

    /// HTTP request error.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// JSON deserialization error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// The cancellation token fired before the operation finished.
    #[error("operation cancelled")]
    Cancelled,

    /// The request URL could not be built from the host and key.
    #[error("invalid metadata url: {0}")]
    InvalidUrl(String),

    /// Response exceeds maximum allowed size.
    #[error("response too large: {0} bytes exceeds limit of {1} bytes")]
    TooLarge(usize, usize),

    /// Response was not valid UTF-8.
    #[error("invalid utf-8")]
    Utf8,

    /// Error returned by a subscription callback.
    #[error("subscriber: {0}")]
    Callback(Box<dyn std::error::Error + Send + Sync>),
}

impl MetadataError {
    /// Wrap an arbitrary error returned from a subscription callback.
    pub fn callback<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        MetadataError::Callback(err.into())
    }

    /// Whether this error means the key does not exist.
    pub fn is_not_defined(&self) -> bool {
        matches!(self, MetadataError::NotDefined(_))
    }

    /// The HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            MetadataError::NotDefined(_) => Some(404),
            MetadataError::Http { status, .. } => Some(*status),
            MetadataError::Request(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            MetadataError::NotDefined("instance/id".into()).to_string(),
            "metadata \"instance/id\" not defined"
        );
        assert_eq!(
            MetadataError::Http {
                status: 503,
                body: "unavailable".into()
            }
            .to_string(),
            "metadata server returned 503: unavailable"
        );
        assert_eq!(MetadataError::Cancelled.to_string(), "operation cancelled");
        assert_eq!(MetadataError::Utf8.to_string(), "invalid utf-8");
        assert_eq!(
            MetadataError::TooLarge(10, 5).to_string(),
            "response too large: 10 bytes exceeds limit of 5 bytes"
        );
    }

    #[test]
    fn test_not_defined_is_distinct() {
        assert!(MetadataError::NotDefined("x".into()).is_not_defined());
        assert!(!MetadataError::Cancelled.is_not_defined());
        assert!(!MetadataError::Http {
            status: 500,
            body: String::new()
        }
        .is_not_defined());
    }

    #[test]
    fn test_status() {
        assert_eq!(MetadataError::NotDefined("x".into()).status(), Some(404));
        assert_eq!(
            MetadataError::Http {
                status: 429,
                body: String::new()
            }
            .status(),
            Some(429)
        );
        assert_eq!(MetadataError::Utf8.status(), None);
    }

    #[test]
    fn test_callback_wraps_message() {
        let err = MetadataError::callback("stop watching");
        assert_eq!(err.to_string(), "subscriber: stop watching");
    }
}
