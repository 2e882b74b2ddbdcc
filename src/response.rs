//! The raw HTTP response produced by a transport attempt.
//!
//! A [`Response`] is an immutable value: status, headers and the fully read
//! body. It is cheap enough to clone that the cache hands a copy to every
//! caller that shares a load.

use crate::{Error, Result};
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use std::borrow::Cow;

/// A complete HTTP response.
///
/// # Examples
///
/// ```
/// use callgate::Response;
/// use http::{HeaderMap, HeaderValue, StatusCode};
///
/// let mut headers = HeaderMap::new();
/// headers.insert("content-type", HeaderValue::from_static("application/json"));
///
/// let response = Response::new(StatusCode::OK, headers, br#"{"id":7}"#.to_vec());
///
/// assert!(response.is_success());
/// assert_eq!(response.header("content-type"), Some("application/json"));
/// let value: serde_json::Value = response.json().unwrap();
/// assert_eq!(value["id"], 7);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// The HTTP status code of the response.
    pub status: StatusCode,

    /// The response headers.
    pub headers: HeaderMap,

    /// The response body as received.
    pub body: Vec<u8>,
}

impl Response {
    /// Creates a new `Response`.
    pub fn new(status: StatusCode, headers: HeaderMap, body: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// The numeric status code.
    pub fn status_code(&self) -> u16 {
        self.status.as_u16()
    }

    /// Returns `true` for 2xx statuses.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Returns a header value by name, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    /// The `Content-Length` header, as reported by the server.
    pub fn content_length(&self) -> Option<&str> {
        self.header(http::header::CONTENT_LENGTH.as_str())
    }

    /// The body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Deserializes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeserializationFailed`] with the raw body preserved.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| Error::DeserializationFailed {
            raw_response: self.text().into_owned(),
            serde_error: e.to_string(),
            status: self.status,
        })
    }
}
