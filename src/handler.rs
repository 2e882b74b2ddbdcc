//! Result handlers and the lifecycle events a transport reports to them.
//!
//! A handler turns the raw [`Response`] of one attempt into the caller's
//! output type. Optional capabilities (observing connection events, reacting
//! to failures, exposing a status for retry decisions) are default trait
//! methods, so a handler only implements what it cares about.

use crate::{Error, Response, Result};
use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use std::fmt;
use std::marker::PhantomData;

/// One step in the life of a transport attempt.
///
/// Transports report the non-terminal events in temporal order. `Completed`
/// and `Failed` are derived from the attempt's result by the instrumentation
/// layer and are never sent by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// The attempt begins; all phase timings are measured from here.
    Started,
    /// The host name was resolved.
    DnsResolved,
    /// A connection to the server is open.
    ConnectionOpened,
    /// Request headers have been written.
    HeadersWritten,
    /// The request body has been written.
    BodyWritten,
    /// Response headers have arrived.
    HeadersReceived,
    /// The response was fully received.
    Completed,
    /// The attempt failed.
    Failed,
}

impl LifecycleEvent {
    /// Returns `true` for `Completed` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleEvent::Completed | LifecycleEvent::Failed)
    }
}

/// Whether the transport should keep going after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandlerState {
    /// Continue the attempt.
    #[default]
    Continue,
    /// Stop the attempt; the transport fails it with [`Error::Aborted`].
    Abort,
}

/// Converts the outcome of a transport attempt into a caller-visible value.
///
/// # Examples
///
/// ```
/// use callgate::{AsyncHandler, Response, Result};
///
/// struct BodyLength;
///
/// impl AsyncHandler for BodyLength {
///     type Output = usize;
///
///     fn on_completed(&mut self, response: Response) -> Result<usize> {
///         Ok(response.body.len())
///     }
/// }
/// ```
pub trait AsyncHandler: Send + 'static {
    /// The value produced for the caller.
    type Output: Send + 'static;

    /// Observes a lifecycle event. The returned state is handed back to the
    /// transport unchanged.
    fn on_event(&mut self, _event: LifecycleEvent) -> HandlerState {
        HandlerState::Continue
    }

    /// Produces the output for a completed attempt.
    fn on_completed(&mut self, response: Response) -> Result<Self::Output>;

    /// Observes a failed attempt.
    fn on_failed(&mut self, _error: &Error) {}

    /// The HTTP status carried by an output, if the output type has one.
    ///
    /// Only outputs that expose a status can be retried by status code;
    /// everything else is retried through error kinds alone.
    fn status_of(&self, _output: &Self::Output) -> Option<u16> {
        None
    }
}

/// Returns the raw [`Response`] unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseHandler;

impl AsyncHandler for ResponseHandler {
    type Output = Response;

    fn on_completed(&mut self, response: Response) -> Result<Response> {
        Ok(response)
    }

    fn status_of(&self, output: &Response) -> Option<u16> {
        Some(output.status_code())
    }
}

/// Deserializes JSON bodies whose status is expected, rejecting the rest.
///
/// Expects `200` unless configured otherwise. A rejected status surfaces as
/// [`Error::HttpError`], which can be retried by enrolling
/// [`ErrorKind::Status`](crate::ErrorKind::Status).
///
/// # Examples
///
/// ```
/// use callgate::{AsyncHandler, JsonHandler, Response};
/// use http::{HeaderMap, StatusCode};
///
/// let mut handler = JsonHandler::<serde_json::Value>::new().expect_status(201);
/// let created = Response::new(StatusCode::CREATED, HeaderMap::new(), b"{}".to_vec());
/// assert!(handler.on_completed(created).is_ok());
///
/// let ok = Response::new(StatusCode::OK, HeaderMap::new(), b"{}".to_vec());
/// assert!(handler.on_completed(ok).is_err());
/// ```
pub struct JsonHandler<T> {
    expected: BTreeSet<u16>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonHandler<T> {
    /// Creates a handler that accepts `200` only.
    pub fn new() -> Self {
        Self {
            expected: BTreeSet::new(),
            _marker: PhantomData,
        }
    }

    /// Adds an accepted status. The first call replaces the `200` default.
    pub fn expect_status(mut self, status: u16) -> Self {
        self.expected.insert(status);
        self
    }

    fn accepts(&self, status: u16) -> bool {
        if self.expected.is_empty() {
            status == 200
        } else {
            self.expected.contains(&status)
        }
    }
}

impl<T> Default for JsonHandler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonHandler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonHandler")
            .field("expected", &self.expected)
            .finish()
    }
}

impl<T> AsyncHandler for JsonHandler<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Output = T;

    fn on_completed(&mut self, response: Response) -> Result<T> {
        if !self.accepts(response.status_code()) {
            let raw_response = response.text().into_owned();
            tracing::debug!(
                status = response.status_code(),
                "Unexpected status for JSON handler"
            );
            return Err(Error::HttpError {
                status: response.status,
                raw_response,
                headers: response.headers,
            });
        }
        response.json()
    }
}
