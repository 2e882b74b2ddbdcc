//! # Callgate - an HTTP client facade with retries, coalescing cache and profiling
//!
//! Callgate sits on top of an asynchronous HTTP transport (by default
//! `reqwest`) and adds the orchestration a service client needs:
//! per-request retry policies, a response cache that collapses identical
//! concurrent GETs into one call, and a profiling record for every attempt.
//!
//! ## Quick Start
//!
//! ```no_run
//! use callgate::{Client, ClientConfig, ErrorKind, Request};
//! use http::Method;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), callgate::Error> {
//!     let client = Client::new(ClientConfig::default())?;
//!
//!     // Cached: identical GETs in flight at the same time share one attempt.
//!     let user = client
//!         .execute(Request::get("https://api.example.com/users/123")?)
//!         .await?;
//!     println!("User: {}", user.text());
//!
//!     // Never cached, retried up to twice on 503 or timeout.
//!     let order = Request::builder()
//!         .method(Method::POST)
//!         .url("https://api.example.com/orders")
//!         .json_body(&serde_json::json!({ "sku": "A-1" }))?
//!         .add_retry_status_code(503)
//!         .add_retry_error_kind(ErrorKind::Timeout)
//!         .max_retries(2)
//!         .build()?;
//!     let created = client.execute(order).await?;
//!     println!("Created: {}", created.status);
//!
//!     client.close();
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Retry policies per request** - Enroll exact status codes and error kinds, bounded by `max_retries`
//! - **Coalescing cache** - One in-flight load per distinct GET, TTL expiry, refresh-ahead, size bound, stats
//! - **Attempt profiling** - Phase timings and status for every attempt, logged on `callgate::profiling`
//! - **Pluggable transport** - Implement [`Transport`] to run on anything; [`ReqwestTransport`] is bundled
//! - **Typed handlers** - Turn responses into your own types with [`AsyncHandler`] or [`JsonHandler`]
//! - **Cancellable futures** - [`ResponseFuture`] can be awaited, waited on from plain threads, or cancelled
//!
//! ## Error Handling
//!
//! Retries are invisible to callers: they get the final response, or the
//! error of the last attempt.
//!
//! ```no_run
//! use callgate::{Client, Error, JsonHandler, Request};
//!
//! # async fn example() -> Result<(), Error> {
//! # let client = Client::builder().build()?;
//! let request = Request::get("https://api.example.com/endpoint")?;
//! match client.critical_execute_with(request, JsonHandler::<serde_json::Value>::new()).await {
//!     Ok(value) => println!("Success: {}", value),
//!     Err(Error::DeserializationFailed { raw_response, serde_error, status }) => {
//!         eprintln!("Failed to deserialize (status {}):", status);
//!         eprintln!("  Raw response: {}", raw_response);
//!         eprintln!("  Error: {}", serde_error);
//!     }
//!     Err(Error::HttpError { status, raw_response, .. }) => {
//!         eprintln!("HTTP error {}: {}", status, raw_response);
//!     }
//!     Err(e) => eprintln!("Other error ({:?}): {}", e.kind(), e),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Profiling
//!
//! Every attempt produces one line on the `callgate::profiling` target at
//! TRACE level. Enable it with any `tracing` subscriber, for example
//! `RUST_LOG=callgate::profiling=trace`.

pub mod cache;
mod client;
pub mod config;
mod error;
mod factory;
mod future;
mod handler;
mod instrument;
pub mod profiling;
mod progress;
mod request;
pub mod resolver;
mod response;
pub mod retry;
pub mod transport;

#[cfg(test)]
mod testing;

pub use cache::{CacheStats, ResponseCache};
pub use client::{Client, ClientBuilder};
pub use config::{CacheConfig, ClientConfig, TransportConfig};
pub use error::{Error, ErrorKind, InstrumentationError, Result};
pub use factory::ClientFactory;
pub use future::{Canceller, ResponseFuture};
pub use handler::{AsyncHandler, HandlerState, JsonHandler, LifecycleEvent, ResponseHandler};
pub use instrument::InstrumentedHandler;
pub use profiling::{ProfilingRecord, ProfilingSink, TracingProfilingSink};
pub use progress::{Progress, ProgressTimer};
pub use request::{Request, RequestBuilder};
pub use resolver::{NameResolver, RandomNameResolver, StandardNameResolver};
pub use response::Response;
pub use retry::{RetryDelayer, RetryExecutor, RetryStrategy};
pub use transport::{LifecycleListener, ReqwestTransport, Transport};
