//! The immutable request value and its builder.
//!
//! A [`Request`] is compared and hashed by value. Two requests built from the
//! same method, URL, headers, body and retry settings are the same cache key,
//! which is what lets concurrent identical GETs share one transport call.

use crate::{Error, ErrorKind, Result};
use http::{HeaderName, HeaderValue, Method};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use url::Url;

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_URL: &str = "http://localhost";

/// A single logical HTTP request plus its retry policy.
///
/// Header names are stored lowercased, so `Accept` and `accept` are the same
/// header for equality. Values keep the order they were added in.
///
/// # Examples
///
/// ```
/// use callgate::{ErrorKind, Request};
/// use http::Method;
///
/// # fn example() -> Result<(), callgate::Error> {
/// let request = Request::builder()
///     .method(Method::GET)
///     .url("https://api.example.com/users/42")
///     .add_header("Accept", "application/json")?
///     .add_retry_status_code(503)
///     .add_retry_error_kind(ErrorKind::Timeout)
///     .max_retries(2)
///     .build()?;
///
/// assert!(request.has_retry_policy());
/// assert!(request.is_cache_eligible());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Request {
    method: Method,
    url: Url,
    headers: BTreeMap<String, Vec<String>>,
    body: Option<Vec<u8>>,
    timeout: Option<Duration>,
    max_retries: u32,
    retry_status_codes: BTreeSet<u16>,
    retry_error_kinds: BTreeSet<ErrorKind>,
    critical_get: bool,
}

impl Request {
    /// Creates a new `RequestBuilder` with default settings.
    pub fn builder() -> RequestBuilder {
        RequestBuilder::new()
    }

    /// Shorthand for a plain GET without retry policy.
    pub fn get(url: impl Into<String>) -> Result<Self> {
        Self::builder().url(url).build()
    }

    /// The HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The full URL including query parameters.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// All headers, keyed by lowercased name.
    pub fn headers(&self) -> &BTreeMap<String, Vec<String>> {
        &self.headers
    }

    /// The first value of a header, if present.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// The `Host` header as sent, used by the profiling record.
    pub fn host_header(&self) -> Option<&str> {
        self.header(http::header::HOST.as_str())
    }

    /// The request body, if any.
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Per-request timeout overriding the transport default.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Maximum number of retries after the first attempt.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Status codes that trigger another attempt.
    pub fn retry_status_codes(&self) -> &BTreeSet<u16> {
        &self.retry_status_codes
    }

    /// Error kinds that trigger another attempt.
    pub fn retry_error_kinds(&self) -> &BTreeSet<ErrorKind> {
        &self.retry_error_kinds
    }

    /// Whether this GET must bypass the response cache.
    pub fn is_critical_get(&self) -> bool {
        self.critical_get
    }

    /// Returns `true` if any retry condition is enrolled.
    pub fn has_retry_policy(&self) -> bool {
        !self.retry_status_codes.is_empty() || !self.retry_error_kinds.is_empty()
    }

    /// Returns `true` if the response may be served from the cache.
    pub fn is_cache_eligible(&self) -> bool {
        !self.critical_get && self.method == Method::GET
    }
}

/// Builder for [`Request`].
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    method: Method,
    url: Option<String>,
    headers: BTreeMap<String, Vec<String>>,
    query_params: Vec<(String, String)>,
    body: Option<Vec<u8>>,
    timeout: Option<Duration>,
    max_retries: u32,
    retry_status_codes: BTreeSet<u16>,
    retry_error_kinds: BTreeSet<ErrorKind>,
    critical_get: bool,
}

impl RequestBuilder {
    /// Creates a builder for `GET http://localhost` with three retries allowed.
    pub fn new() -> Self {
        Self {
            method: Method::GET,
            url: None,
            headers: BTreeMap::new(),
            query_params: Vec::new(),
            body: None,
            timeout: None,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_status_codes: BTreeSet::new(),
            retry_error_kinds: BTreeSet::new(),
            critical_get: false,
        }
    }

    /// Sets the HTTP method.
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Sets the request URL. It is parsed by [`build`](Self::build).
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Appends a header value, keeping earlier values for the same name.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn add_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let (name, value) = validate_header(name.as_ref(), value.as_ref())?;
        self.headers.entry(name).or_default().push(value);
        Ok(self)
    }

    /// Replaces all values of a header.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn set_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let (name, value) = validate_header(name.as_ref(), value.as_ref())?;
        self.headers.insert(name, vec![value]);
        Ok(self)
    }

    /// Adds a query parameter to the URL.
    pub fn query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.push((key.into(), value.into()));
        self
    }

    /// Sets a raw body.
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serializes `body` as JSON and sets `Content-Type: application/json`.
    ///
    /// # Errors
    ///
    /// Returns an error if the body cannot be serialized.
    pub fn json_body<T: Serialize>(self, body: &T) -> Result<Self> {
        let bytes = serde_json::to_vec(body).map_err(|e| Error::SerializationFailed(e.to_string()))?;
        self.set_header("content-type", "application/json")
            .map(|builder| builder.body(bytes))
    }

    /// Sets a per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the maximum number of retries after the first attempt.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Enrolls a status code for retry.
    ///
    /// Success codes (2xx) are ignored: a successful response is never retried.
    pub fn add_retry_status_code(mut self, status: u16) -> Self {
        if !(200..300).contains(&status) {
            self.retry_status_codes.insert(status);
        }
        self
    }

    /// Removes a previously enrolled status code.
    pub fn remove_retry_status_code(mut self, status: u16) -> Self {
        self.retry_status_codes.remove(&status);
        self
    }

    /// Enrolls an error kind for retry.
    pub fn add_retry_error_kind(mut self, kind: ErrorKind) -> Self {
        self.retry_error_kinds.insert(kind);
        self
    }

    /// Removes a previously enrolled error kind.
    pub fn remove_retry_error_kind(mut self, kind: ErrorKind) -> Self {
        self.retry_error_kinds.remove(&kind);
        self
    }

    /// Marks a GET as critical so it always bypasses the cache.
    pub fn critical_get(mut self, critical: bool) -> Self {
        self.critical_get = critical;
        self
    }

    /// Builds the immutable [`Request`].
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn build(self) -> Result<Request> {
        let mut url = Url::parse(self.url.as_deref().unwrap_or(DEFAULT_URL))?;
        if !self.query_params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.query_params {
                pairs.append_pair(key, value);
            }
        }

        Ok(Request {
            method: self.method,
            url,
            headers: self.headers,
            body: self.body,
            timeout: self.timeout,
            max_retries: self.max_retries,
            retry_status_codes: self.retry_status_codes,
            retry_error_kinds: self.retry_error_kinds,
            critical_get: self.critical_get,
        })
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_header(name: &str, value: &str) -> Result<(String, String)> {
    let name = HeaderName::try_from(name)
        .map_err(|e| Error::ConfigurationError(format!("Invalid header name: {}", e)))?;
    HeaderValue::try_from(value)
        .map_err(|e| Error::ConfigurationError(format!("Invalid header value: {}", e)))?;
    Ok((name.as_str().to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn hash_of(request: &Request) -> u64 {
        let mut hasher = DefaultHasher::new();
        request.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_structural_equality() {
        let a = Request::builder()
            .url("http://example.com/a")
            .add_header("Accept", "text/plain")
            .unwrap()
            .add_header("X-Trace", "1")
            .unwrap()
            .build()
            .unwrap();
        let b = Request::builder()
            .url("http://example.com/a")
            .add_header("x-trace", "1")
            .unwrap()
            .add_header("accept", "text/plain")
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_body_changes_identity() {
        let a = Request::builder().body("one").build().unwrap();
        let b = Request::builder().body("two").build().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_success_codes_never_enrolled() {
        let request = Request::builder()
            .add_retry_status_code(200)
            .add_retry_status_code(204)
            .add_retry_status_code(500)
            .add_retry_status_code(500)
            .build()
            .unwrap();

        assert_eq!(request.retry_status_codes().len(), 1);
        assert!(request.retry_status_codes().contains(&500));
    }

    #[test]
    fn test_remove_retry_conditions() {
        let request = Request::builder()
            .add_retry_status_code(503)
            .add_retry_error_kind(ErrorKind::Timeout)
            .remove_retry_status_code(503)
            .remove_retry_error_kind(ErrorKind::Timeout)
            .build()
            .unwrap();

        assert!(!request.has_retry_policy());
    }

    #[test]
    fn test_defaults() {
        let request = Request::builder().build().unwrap();
        assert_eq!(request.method(), Method::GET);
        assert_eq!(request.url().as_str(), "http://localhost/");
        assert_eq!(request.max_retries(), 3);
        assert!(request.is_cache_eligible());
    }

    #[test]
    fn test_cache_eligibility() {
        let critical = Request::builder().critical_get(true).build().unwrap();
        let post = Request::builder().method(Method::POST).build().unwrap();
        assert!(!critical.is_cache_eligible());
        assert!(!post.is_cache_eligible());
    }

    #[test]
    fn test_query_params_and_host_header() {
        let request = Request::builder()
            .url("http://example.com/search")
            .query_param("q", "rust")
            .set_header("Host", "api.internal")
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(request.url().query(), Some("q=rust"));
        assert_eq!(request.host_header(), Some("api.internal"));
    }

    #[test]
    fn test_invalid_url_rejected() {
        let result = Request::builder().url("not a url").build();
        assert!(matches!(result, Err(Error::InvalidUrl(_))));
    }

    #[test]
    fn test_invalid_header_rejected() {
        let result = Request::builder().add_header("bad header", "x");
        assert!(matches!(result, Err(Error::ConfigurationError(_))));
    }

    #[test]
    fn test_json_body_sets_content_type() {
        let request = Request::builder()
            .method(Method::POST)
            .json_body(&serde_json::json!({ "name": "a" }))
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(request.header("Content-Type"), Some("application/json"));
        assert_eq!(request.body(), Some(br#"{"name":"a"}"#.as_slice()));
    }
}
