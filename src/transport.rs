//! The transport seam: one HTTP attempt, reported as lifecycle events.
//!
//! The client never talks to the network itself. It hands each attempt to a
//! [`Transport`] together with a [`LifecycleListener`] that receives the
//! attempt's events in temporal order. [`ReqwestTransport`] is the bundled
//! implementation.

use crate::config::TransportConfig;
use crate::resolver::{NameResolver, ResolverAdapter};
use crate::{Error, HandlerState, LifecycleEvent, Request, Response, Result};
use reqwest::redirect::Policy;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Future of a single transport attempt.
pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = Result<Response>> + Send + 'a>>;

/// Receives the events of one attempt.
pub trait LifecycleListener {
    /// Observes an event. [`HandlerState::Abort`] stops the attempt.
    fn on_event(&mut self, event: LifecycleEvent) -> HandlerState;
}

/// Performs HTTP attempts.
///
/// Implementations report `Started` first and then whichever of the
/// non-terminal events they can observe, in order. They never report
/// `Completed` or `Failed`; the outcome of the returned future is the
/// terminal event. Dropping the future cancels the attempt.
pub trait Transport: Send + Sync + 'static {
    /// Executes one attempt of `request`.
    fn execute<'a>(
        &'a self,
        request: &'a Request,
        listener: &'a mut (dyn LifecycleListener + Send),
    ) -> TransportFuture<'a>;

    /// Stops accepting new attempts. Attempts in flight are left alone.
    fn close(&self) {}

    /// Returns `true` once [`close`](Self::close) was called.
    fn is_closed(&self) -> bool {
        false
    }
}

/// Reports `event` and turns an abort request into [`Error::Aborted`].
pub fn notify(listener: &mut (dyn LifecycleListener + Send), event: LifecycleEvent) -> Result<()> {
    match listener.on_event(event) {
        HandlerState::Continue => Ok(()),
        HandlerState::Abort => {
            tracing::debug!(?event, "Attempt aborted by handler");
            Err(Error::Aborted)
        }
    }
}

/// [`Transport`] backed by a `reqwest` client.
///
/// reqwest does not expose per-request DNS, connect or write callbacks. This
/// transport reports `Started` before sending. Once the response head has
/// arrived it reports `HeadersWritten`, then `BodyWritten` (when the request
/// has a body), then `HeadersReceived`. An attempt that fails before a
/// response reports only `Started`. Phases it cannot see inherit the value
/// of the previous phase in the profiling record.
///
/// # Examples
///
/// ```no_run
/// use callgate::{ReqwestTransport, TransportConfig};
///
/// # fn example() -> Result<(), callgate::Error> {
/// let transport = ReqwestTransport::from_config(&TransportConfig::default())?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    closed: AtomicBool,
}

impl ReqwestTransport {
    /// Builds a transport with the configured timeouts, pool and resolver.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying client cannot be built.
    pub fn from_config(config: &TransportConfig) -> Result<Self> {
        Self::with_resolver(config, config.resolver.build())
    }

    /// Builds a transport that resolves host names through `resolver`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying client cannot be built.
    pub fn with_resolver(config: &TransportConfig, resolver: Arc<dyn NameResolver>) -> Result<Self> {
        let redirect = if config.follow_redirects {
            Policy::limited(config.max_redirects)
        } else {
            Policy::none()
        };

        let mut builder = reqwest::Client::builder()
            .redirect(redirect)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(config.pool_idle_timeout_ms.map(Duration::from_millis))
            .dns_resolver(Arc::new(ResolverAdapter::new(resolver)));

        if let Some(ms) = config.connect_timeout_ms {
            builder = builder.connect_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = config.request_timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.as_str());
        }

        let client = builder.build().map_err(|e| {
            Error::ConfigurationError(format!("Failed to build HTTP client: {}", e))
        })?;
        Ok(Self::from_client(client))
    }

    /// Wraps an already configured client.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self {
            client,
            closed: AtomicBool::new(false),
        }
    }

    fn prepare(&self, request: &Request) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(request.method().clone(), request.url().clone());
        for (name, values) in request.headers() {
            for value in values {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        if let Some(timeout) = request.timeout() {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = request.body() {
            builder = builder.body(body.to_vec());
        }
        builder
    }
}

impl Transport for ReqwestTransport {
    fn execute<'a>(
        &'a self,
        request: &'a Request,
        listener: &'a mut (dyn LifecycleListener + Send),
    ) -> TransportFuture<'a> {
        Box::pin(async move {
            if self.is_closed() {
                return Err(Error::ClientClosed);
            }
            notify(listener, LifecycleEvent::Started)?;

            tracing::debug!(
                method = %request.method(),
                url = %request.url(),
                "Executing HTTP request"
            );
            let response = self.prepare(request).send().await?;

            // reqwest resolves `send` once response headers arrived, which is
            // the first point the writes are known to have happened.
            notify(listener, LifecycleEvent::HeadersWritten)?;
            if request.body().is_some() {
                notify(listener, LifecycleEvent::BodyWritten)?;
            }
            notify(listener, LifecycleEvent::HeadersReceived)?;

            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await?;
            Ok(Response::new(status, headers, body.to_vec()))
        })
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!("Transport closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AbortOn(LifecycleEvent, Vec<LifecycleEvent>);

    impl LifecycleListener for AbortOn {
        fn on_event(&mut self, event: LifecycleEvent) -> HandlerState {
            self.1.push(event);
            if event == self.0 {
                HandlerState::Abort
            } else {
                HandlerState::Continue
            }
        }
    }

    #[test]
    fn test_notify_maps_abort() {
        let mut listener = AbortOn(LifecycleEvent::HeadersWritten, Vec::new());
        assert!(notify(&mut listener, LifecycleEvent::Started).is_ok());
        assert!(matches!(
            notify(&mut listener, LifecycleEvent::HeadersWritten),
            Err(Error::Aborted)
        ));
        assert_eq!(listener.1.len(), 2);
    }

    #[tokio::test]
    async fn test_abort_on_start_sends_nothing() {
        let transport = ReqwestTransport::from_config(&TransportConfig::default()).unwrap();
        let request = Request::get("http://127.0.0.1:9/unreachable").unwrap();
        let mut listener = AbortOn(LifecycleEvent::Started, Vec::new());

        let result = transport.execute(&request, &mut listener).await;

        assert!(matches!(result, Err(Error::Aborted)));
        assert_eq!(listener.1, vec![LifecycleEvent::Started]);
    }

    #[tokio::test]
    async fn test_closed_transport_rejects_attempts() {
        let transport = ReqwestTransport::from_config(&TransportConfig::default()).unwrap();
        transport.close();
        assert!(transport.is_closed());

        let request = Request::get("http://127.0.0.1:9/").unwrap();
        let mut listener = AbortOn(LifecycleEvent::Completed, Vec::new());
        let result = transport.execute(&request, &mut listener).await;

        assert!(matches!(result, Err(Error::ClientClosed)));
        assert!(listener.1.is_empty());
    }

    #[tokio::test]
    async fn test_refused_connection_reports_only_start() {
        let transport = ReqwestTransport::from_config(&TransportConfig::default()).unwrap();
        let request = Request::builder()
            .method(http::Method::POST)
            .url("http://127.0.0.1:1/x")
            .body("payload")
            .build()
            .unwrap();
        let mut listener = AbortOn(LifecycleEvent::Completed, Vec::new());

        let result = transport.execute(&request, &mut listener).await;

        assert_eq!(result.unwrap_err().kind(), crate::ErrorKind::Connect);
        assert_eq!(listener.1, vec![LifecycleEvent::Started]);
    }
}
