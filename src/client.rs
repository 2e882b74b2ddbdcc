//! The client facade.
//!
//! The [`Client`] type is the main entry point for making HTTP requests.
//! It routes cache-eligible GETs through the [`ResponseCache`], sends
//! everything else straight to the transport, and runs requests with a
//! retry policy through a bounded pool of retry slots.
//! Use [`ClientBuilder`] to configure and create clients.

use crate::cache::{CacheLoader, CacheStats, ResponseCache};
use crate::config::{CacheConfig, ClientConfig};
use crate::instrument::execute_attempt;
use crate::profiling::{AttemptContext, ProfilingSink, TracingProfilingSink};
use crate::retry::{RetryDelayer, RetryExecutor, RetryStrategy};
use crate::transport::{ReqwestTransport, Transport};
use crate::{AsyncHandler, Error, Request, Response, ResponseFuture, ResponseHandler, Result};
use futures::FutureExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;

/// An HTTP client with retry orchestration, response caching and
/// per-attempt profiling.
///
/// The client is designed to be reused across many requests and cloned
/// freely; clones share the transport, cache and retry pool.
///
/// # Examples
///
/// ```no_run
/// use callgate::{Client, ErrorKind, Request};
///
/// # async fn example() -> Result<(), callgate::Error> {
/// let client = Client::builder().build()?;
///
/// let request = Request::builder()
///     .url("https://api.example.com/users/42")
///     .add_retry_status_code(503)
///     .add_retry_error_kind(ErrorKind::Timeout)
///     .max_retries(2)
///     .build()?;
///
/// // GETs are served through the cache; identical concurrent calls share one attempt.
/// let response = client.execute(request).await?;
/// println!("Status: {}", response.status);
///
/// client.close();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    dispatcher: Arc<Dispatcher>,
    cache: ResponseCache,
}

/// Everything needed to run attempts, shared with the cache loader.
struct Dispatcher {
    transport: Arc<dyn Transport>,
    delayer: Arc<dyn RetryDelayer>,
    sink: Arc<dyn ProfilingSink>,
    retry_slots: Semaphore,
    handle: Handle,
    closed: AtomicBool,
}

impl Dispatcher {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn dispatch<H: AsyncHandler>(self: Arc<Self>, request: Request, mut handler: H) -> Result<H::Output> {
        if self.is_closed() {
            return Err(Error::ClientClosed);
        }

        if !request.has_retry_policy() {
            let (result, _) = execute_attempt(
                self.transport.as_ref(),
                &request,
                &mut handler,
                AttemptContext::first(),
                self.sink.as_ref(),
            )
            .await;
            return result;
        }

        // Waits for a free slot when the pool is exhausted; callers of
        // non-retried requests are never held up here.
        let _slot = self
            .retry_slots
            .acquire()
            .await
            .map_err(|_| Error::ClientClosed)?;
        let executor = RetryExecutor::new(
            self.transport.as_ref(),
            self.delayer.as_ref(),
            self.sink.as_ref(),
        );
        let (result, state) = executor.run(&request, &mut handler).await;
        tracing::debug!(
            attempts = state.attempts(),
            method = %request.method(),
            url = %request.url(),
            "Retried request finished"
        );
        result
    }
}

impl Client {
    /// Creates a new `ClientBuilder` for configuring a client.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use callgate::{Client, ClientConfig};
    ///
    /// # async fn example() -> Result<(), callgate::Error> {
    /// let client = Client::builder()
    ///     .config(ClientConfig::default())
    ///     .build()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Builds a client from configuration alone, on the current runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the transport cannot
    /// be built or there is no current Tokio runtime.
    pub fn new(config: ClientConfig) -> Result<Self> {
        ClientBuilder::new().config(config).build()
    }

    /// Executes a request, serving cache-eligible GETs from the cache.
    ///
    /// Identical non-critical GETs issued while one is in flight, or after
    /// it finished and before its entry expires, share its outcome. Any other
    /// request goes to [`critical_execute`](Self::critical_execute).
    pub fn execute(&self, request: Request) -> ResponseFuture<Response> {
        if self.is_closed() {
            return ResponseFuture::failed(Error::ClientClosed);
        }
        if !request.is_cache_eligible() {
            return self.critical_execute(request);
        }
        tracing::debug!(url = %request.url(), "Executing through cache");
        let lookup = self.inner.cache.get(&request);
        ResponseFuture::spawn(&self.inner.dispatcher.handle, lookup)
    }

    /// Executes every request, in order. See [`execute`](Self::execute).
    pub fn execute_all<I>(&self, requests: I) -> Vec<ResponseFuture<Response>>
    where
        I: IntoIterator<Item = Request>,
    {
        requests.into_iter().map(|r| self.execute(r)).collect()
    }

    /// Executes a request without consulting the cache.
    pub fn critical_execute(&self, request: Request) -> ResponseFuture<Response> {
        self.critical_execute_with(request, ResponseHandler)
    }

    /// Executes every request without consulting the cache.
    pub fn critical_execute_all<I>(&self, requests: I) -> Vec<ResponseFuture<Response>>
    where
        I: IntoIterator<Item = Request>,
    {
        requests
            .into_iter()
            .map(|r| self.critical_execute(r))
            .collect()
    }

    /// Executes a request without the cache, turning the response into the
    /// handler's output.
    ///
    /// A request without enrolled retry conditions makes exactly one attempt.
    /// Otherwise the attempts run in a retry slot; when every slot is busy
    /// the call waits for one.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use callgate::{Client, JsonHandler, Request};
    /// use serde::Deserialize;
    ///
    /// #[derive(Deserialize)]
    /// struct User { name: String }
    ///
    /// # async fn example() -> Result<(), callgate::Error> {
    /// let client = Client::builder().build()?;
    /// let request = Request::get("https://api.example.com/users/42")?;
    ///
    /// let user: User = client
    ///     .critical_execute_with(request, JsonHandler::new())
    ///     .await?;
    /// println!("User: {}", user.name);
    /// # Ok(())
    /// # }
    /// ```
    pub fn critical_execute_with<H: AsyncHandler>(
        &self,
        request: Request,
        handler: H,
    ) -> ResponseFuture<H::Output> {
        if self.is_closed() {
            return ResponseFuture::failed(Error::ClientClosed);
        }
        let dispatcher = self.inner.dispatcher.clone();
        let handle = dispatcher.handle.clone();
        ResponseFuture::spawn(&handle, dispatcher.dispatch(request, handler))
    }

    /// Current cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    /// The response cache, for invalidation.
    pub fn cache(&self) -> &ResponseCache {
        &self.inner.cache
    }

    /// Shuts the client down.
    ///
    /// Closes the transport, stops the cache cleanup task and rejects new
    /// calls with [`Error::ClientClosed`]. Retried calls still waiting for a
    /// retry slot fail with the same error. Calls already running finish or
    /// fail on their own.
    pub fn close(&self) {
        if self.inner.dispatcher.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.dispatcher.retry_slots.close();
        self.inner.dispatcher.transport.close();
        self.inner.cache.shutdown();
        tracing::info!("Client closed");
    }

    /// Returns `true` once [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.inner.dispatcher.is_closed()
    }
}

/// Builder for configuring and creating a [`Client`].
///
/// # Examples
///
/// ```no_run
/// use callgate::{Client, RetryStrategy};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), callgate::Error> {
/// let client = Client::builder()
///     .retry_strategy(RetryStrategy::ExponentialBackoff {
///         initial_delay: Duration::from_millis(100),
///         max_delay: Duration::from_secs(5),
///         jitter: true,
///     })
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    delayer: Option<Arc<dyn RetryDelayer>>,
    sink: Option<Arc<dyn ProfilingSink>>,
    handle: Option<Handle>,
}

impl ClientBuilder {
    /// Creates a new `ClientBuilder` with default settings.
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            transport: None,
            delayer: None,
            sink: None,
            handle: None,
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the cache configuration.
    pub fn cache_config(mut self, cache: CacheConfig) -> Self {
        self.config.cache = cache;
        self
    }

    /// Sets the number of retried requests that may run at once.
    pub fn retry_pool_size(mut self, size: usize) -> Self {
        self.config.retry_pool_size = size;
        self
    }

    /// Uses a custom transport instead of one built from the configuration.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets the delay strategy between retry attempts.
    ///
    /// Overrides `retry_interval_ms` from the configuration.
    pub fn retry_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.delayer = Some(Arc::new(strategy));
        self
    }

    /// Uses a custom retry delayer.
    pub fn retry_delayer(mut self, delayer: Arc<dyn RetryDelayer>) -> Self {
        self.delayer = Some(delayer);
        self
    }

    /// Sets where profiling records go. Defaults to
    /// [`TracingProfilingSink`].
    pub fn profiling_sink(mut self, sink: Arc<dyn ProfilingSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Runs the client's tasks on `handle` instead of the current runtime.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Builds the `Client`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The configuration is invalid
    /// - The transport cannot be built
    /// - No runtime was given and there is no current Tokio runtime
    pub fn build(self) -> Result<Client> {
        let config = self.config;
        config.validate()?;

        let handle = match self.handle {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|e| {
                Error::ConfigurationError(format!("No Tokio runtime available: {}", e))
            })?,
        };
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::from_config(&config.transport)?),
        };
        let delayer = self
            .delayer
            .unwrap_or_else(|| Arc::new(RetryStrategy::from_interval(config.retry_interval())));
        let sink = self.sink.unwrap_or_else(|| Arc::new(TracingProfilingSink));

        let dispatcher = Arc::new(Dispatcher {
            transport,
            delayer,
            sink,
            retry_slots: Semaphore::new(config.retry_pool_size),
            handle: handle.clone(),
            closed: AtomicBool::new(false),
        });

        let loader_dispatcher = dispatcher.clone();
        let loader: CacheLoader = Arc::new(move |request: Request| {
            loader_dispatcher
                .clone()
                .dispatch(request, ResponseHandler)
                .boxed()
        });
        let cache = ResponseCache::new(config.cache.clone(), handle, loader)?;

        tracing::debug!(
            retry_pool_size = config.retry_pool_size,
            cache_max_size = config.cache.maximum_size,
            cache_ttl_ms = config.cache.expire_after_write_ms,
            "Client built"
        );

        Ok(Client {
            inner: Arc::new(ClientInner { dispatcher, cache }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
