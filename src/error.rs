//! Error types for client calls.
//!
//! Every failure a caller can observe is an [`Error`]. Retry enrollment works on
//! the coarser [`ErrorKind`] tag returned by [`Error::kind`], which always names
//! the root cause, even when the error travelled through a shared cache load.

use http::{HeaderMap, StatusCode};
use std::sync::Arc;

/// Tag identifying the root cause of an [`Error`].
///
/// Requests enroll kinds with
/// [`RequestBuilder::add_retry_error_kind`](crate::RequestBuilder::add_retry_error_kind);
/// matching is exact membership, there is no hierarchy between kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorKind {
    /// The connection could not be established.
    Connect,
    /// The transport gave up waiting (connect, request or read timeout).
    Timeout,
    /// Building or sending the request failed.
    Request,
    /// Reading or writing a body failed.
    Body,
    /// The response body could not be decoded by the transport.
    Decode,
    /// The redirect policy was violated.
    Redirect,
    /// A handler rejected a non-success status.
    Status,
    /// A handler could not deserialize the body.
    Deserialization,
    /// The request body could not be serialized.
    Serialization,
    /// A handler asked the transport to abort the attempt.
    Aborted,
    /// The caller cancelled the future.
    Cancelled,
    /// The client was closed.
    Closed,
    /// Invalid configuration or request construction.
    Configuration,
    /// A blocking wait ran out of time; the call itself may still complete.
    WaitTimeout,
    /// The task driving the call died unexpectedly.
    Internal,
}

/// The main error type for client calls.
///
/// # Examples
///
/// ```
/// use callgate::{Error, ErrorKind};
/// use http::StatusCode;
///
/// let err = Error::HttpError {
///     status: StatusCode::SERVICE_UNAVAILABLE,
///     raw_response: "try later".to_string(),
///     headers: http::HeaderMap::new(),
/// };
///
/// assert_eq!(err.kind(), ErrorKind::Status);
/// assert_eq!(err.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A network-level error reported by `reqwest`.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The request timed out.
    #[error("Request timed out")]
    Timeout,

    /// A failure reported by a custom [`Transport`](crate::Transport).
    #[error("Transport error ({kind:?}): {message}")]
    Transport {
        /// Root cause tag used for retry matching
        kind: ErrorKind,
        /// Human readable description
        message: String,
    },

    /// A handler received a status it does not accept.
    #[error("HTTP error {status}: {raw_response}")]
    HttpError {
        /// The HTTP status code
        status: StatusCode,
        /// The raw response body
        raw_response: String,
        /// The response headers
        headers: HeaderMap,
    },

    /// Failed to deserialize the response body into the expected type.
    #[error("Failed to deserialize response (status {status}): {serde_error}")]
    DeserializationFailed {
        /// The raw response body that failed to deserialize
        raw_response: String,
        /// The serde error message
        serde_error: String,
        /// The HTTP status code
        status: StatusCode,
    },

    /// Failed to serialize the request body.
    #[error("Failed to serialize request: {0}")]
    SerializationFailed(String),

    /// The shared cache load failed.
    ///
    /// Every caller that joined the same in-flight load receives a clone of
    /// this error pointing at the same underlying failure.
    #[error("Cache load failed: {0}")]
    CacheLoad(Arc<Error>),

    /// The future was cancelled before it completed.
    #[error("Request was cancelled")]
    Cancelled,

    /// A handler returned [`HandlerState::Abort`](crate::HandlerState::Abort).
    #[error("Request aborted by handler")]
    Aborted,

    /// The client (or its transport) has been closed.
    #[error("Client is closed")]
    ClientClosed,

    /// Invalid configuration was provided.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// An invalid URL was provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// A blocking wait elapsed before the call completed.
    #[error("Timed out waiting for the response")]
    WaitTimeout,

    /// The task driving the call stopped without producing a result.
    #[error("Task failed: {0}")]
    TaskFailed(String),

    /// The result was already taken out of the future.
    #[error("Response already taken")]
    ResultTaken,
}

impl Error {
    /// Returns the root cause tag of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Network(e) => classify_reqwest(e),
            Error::Timeout => ErrorKind::Timeout,
            Error::Transport { kind, .. } => *kind,
            Error::HttpError { .. } => ErrorKind::Status,
            Error::DeserializationFailed { .. } => ErrorKind::Deserialization,
            Error::SerializationFailed(_) => ErrorKind::Serialization,
            Error::CacheLoad(inner) => inner.kind(),
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Aborted => ErrorKind::Aborted,
            Error::ClientClosed => ErrorKind::Closed,
            Error::ConfigurationError(_) | Error::InvalidUrl(_) => ErrorKind::Configuration,
            Error::WaitTimeout => ErrorKind::WaitTimeout,
            Error::TaskFailed(_) | Error::ResultTaken => ErrorKind::Internal,
        }
    }

    /// Returns the innermost error, looking through shared cache loads.
    pub fn root(&self) -> &Error {
        match self {
            Error::CacheLoad(inner) => inner.root(),
            other => other,
        }
    }

    /// Returns the HTTP status code if this error has one.
    pub fn status(&self) -> Option<StatusCode> {
        match self.root() {
            Error::HttpError { status, .. } => Some(*status),
            Error::DeserializationFailed { status, .. } => Some(*status),
            Error::Network(e) => e.status(),
            _ => None,
        }
    }

    /// Returns the raw response body if this error has one.
    pub fn raw_response(&self) -> Option<&str> {
        match self.root() {
            Error::HttpError { raw_response, .. } => Some(raw_response),
            Error::DeserializationFailed { raw_response, .. } => Some(raw_response),
            _ => None,
        }
    }

    /// Returns `true` if the caller cancelled the call.
    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }
}

fn classify_reqwest(error: &reqwest::Error) -> ErrorKind {
    if error.is_timeout() {
        ErrorKind::Timeout
    } else if error.is_connect() {
        ErrorKind::Connect
    } else if error.is_redirect() {
        ErrorKind::Redirect
    } else if error.is_body() {
        ErrorKind::Body
    } else if error.is_decode() {
        ErrorKind::Decode
    } else if error.is_builder() {
        ErrorKind::Configuration
    } else {
        ErrorKind::Request
    }
}

/// Failure while formatting or emitting a profiling record.
///
/// Never reaches a caller; the instrumentation layer logs and drops it.
#[derive(thiserror::Error, Debug)]
pub enum InstrumentationError {
    /// The phase timings could not be serialized.
    #[error("Failed to format profiling record: {0}")]
    Format(#[from] serde_json::Error),

    /// The sink refused the record.
    #[error("Profiling sink failed: {0}")]
    Sink(String),
}

/// A specialized `Result` type for client calls.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_load_reports_root_kind() {
        let inner = Error::Transport {
            kind: ErrorKind::Connect,
            message: "refused".to_string(),
        };
        let shared = Error::CacheLoad(Arc::new(inner));

        assert_eq!(shared.kind(), ErrorKind::Connect);
        assert!(matches!(shared.root(), Error::Transport { .. }));
    }

    #[test]
    fn test_status_looks_through_cache_load() {
        let inner = Error::HttpError {
            status: StatusCode::NOT_FOUND,
            raw_response: "missing".to_string(),
            headers: HeaderMap::new(),
        };
        let shared = Error::CacheLoad(Arc::new(inner));

        assert_eq!(shared.status(), Some(StatusCode::NOT_FOUND));
        assert_eq!(shared.raw_response(), Some("missing"));
    }

    #[test]
    fn test_local_kinds() {
        assert_eq!(Error::Timeout.kind(), ErrorKind::Timeout);
        assert_eq!(Error::Aborted.kind(), ErrorKind::Aborted);
        assert!(Error::Cancelled.is_cancelled());
        assert_eq!(Error::ClientClosed.kind(), ErrorKind::Closed);
    }
}
