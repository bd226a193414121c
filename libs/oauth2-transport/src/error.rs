use thiserror::Error;

/// Errors returned by [`Connection`](crate::Connection) operations.
///
/// Every network-layer fault (refused or reset connections, malformed
/// responses, TLS handshake failures, decompression failures, timeouts) is
/// reported as [`TransportError::ConnectionFailed`]; the original cause is kept
/// as the error source so callers can downcast it when they need detail.
///
/// Nothing in this crate retries. Hitting the redirect budget is not an error
/// either: the unfollowed redirect response is returned instead.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TransportError {
    /// Invalid option shape at construction, or unusable TLS material
    #[error("Invalid connection configuration: {reason}")]
    Configuration {
        /// Diagnostic message (unstable format, for logging only)
        reason: String,
    },

    /// Scheme outside `http` / `https`
    #[error("The scheme '{scheme}' is not supported. Only http and https are supported")]
    UnsupportedScheme {
        /// The rejected scheme
        scheme: String,
    },

    /// Request method outside GET, POST, PUT, DELETE
    #[error("Unsupported HTTP method '{method}'")]
    UnsupportedMethod {
        /// The rejected method, as supplied by the caller
        method: String,
    },

    /// Response status outside 200..=599 that is not a followed redirect code
    #[error("Unhandled status code value of {status}")]
    UnexpectedStatus {
        /// The raw status code received
        status: u16,
    },

    /// Transport-level failure (network, protocol, TLS, decompression, timeout)
    #[error("Connection failed: {0}")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Request target could not be turned into a valid URI
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUri {
        /// The URL that failed to parse
        url: String,
        /// Diagnostic message (unstable format, for logging only)
        reason: String,
    },

    /// Invalid header name
    #[error("Invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    /// Invalid header value
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// Form URL encoding of request params failed
    #[error("Form encoding failed: {0}")]
    FormEncode(#[from] serde_urlencoded::ser::Error),

    /// Response body exceeded the configured size limit
    #[error("Response body too large: limit {limit} bytes, got {actual} bytes")]
    BodyTooLarge { limit: usize, actual: usize },
}

impl TransportError {
    pub(crate) fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub(crate) fn connection_failed(
        err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::ConnectionFailed(err.into())
    }

    /// Returns `true` if this error is a transport-level [`ConnectionFailed`](Self::ConnectionFailed).
    #[must_use]
    pub fn is_connection_failed(&self) -> bool {
        matches!(self, Self::ConnectionFailed(_))
    }
}

impl From<hyper::Error> for TransportError {
    fn from(err: hyper::Error) -> Self {
        TransportError::ConnectionFailed(Box::new(err))
    }
}

impl From<hyper_util::client::legacy::Error> for TransportError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        TransportError::ConnectionFailed(Box::new(err))
    }
}
