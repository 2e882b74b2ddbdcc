//! Host name resolution for the bundled transport.
//!
//! A [`NameResolver`] is handed to the transport explicitly; there is no
//! process-wide resolver. [`ResolverAdapter`] plugs any resolver into
//! reqwest's DNS hook.

use rand::Rng;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;

/// Future returned by [`NameResolver::resolve`].
pub type ResolveFuture = Pin<Box<dyn Future<Output = io::Result<Vec<IpAddr>>> + Send>>;

/// Resolves a host name to the addresses a connection should try.
pub trait NameResolver: Send + Sync {
    /// Resolves `host`. An empty list is treated as a lookup failure.
    fn resolve(&self, host: String) -> ResolveFuture;
}

/// Uses the first address returned by the system resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardNameResolver;

impl NameResolver for StandardNameResolver {
    fn resolve(&self, host: String) -> ResolveFuture {
        Box::pin(async move {
            let addresses = lookup(&host).await?;
            Ok(addresses.into_iter().take(1).collect())
        })
    }
}

/// Picks one address at random among everything the system resolver returns,
/// spreading connections across all hosts behind a name.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomNameResolver;

impl NameResolver for RandomNameResolver {
    fn resolve(&self, host: String) -> ResolveFuture {
        Box::pin(async move {
            let addresses = lookup(&host).await?;
            let index = rand::thread_rng().gen_range(0..addresses.len());
            Ok(vec![addresses[index]])
        })
    }
}

async fn lookup(host: &str) -> io::Result<Vec<IpAddr>> {
    let addresses: Vec<IpAddr> = tokio::net::lookup_host((host, 0))
        .await?
        .map(|addr| addr.ip())
        .collect();
    if addresses.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no addresses found for {}", host),
        ));
    }
    tracing::debug!(host, count = addresses.len(), "Resolved host");
    Ok(addresses)
}

/// Selects one of the bundled resolvers from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolverKind {
    /// [`StandardNameResolver`].
    #[default]
    Standard,
    /// [`RandomNameResolver`].
    Random,
}

impl ResolverKind {
    /// Instantiates the selected resolver.
    pub fn build(self) -> Arc<dyn NameResolver> {
        match self {
            ResolverKind::Standard => Arc::new(StandardNameResolver),
            ResolverKind::Random => Arc::new(RandomNameResolver),
        }
    }
}

/// Exposes a [`NameResolver`] through reqwest's resolver interface.
pub struct ResolverAdapter {
    resolver: Arc<dyn NameResolver>,
}

impl ResolverAdapter {
    /// Wraps `resolver`.
    pub fn new(resolver: Arc<dyn NameResolver>) -> Self {
        Self { resolver }
    }
}

impl Resolve for ResolverAdapter {
    fn resolve(&self, name: Name) -> Resolving {
        let pending = self.resolver.resolve(name.as_str().to_string());
        Box::pin(async move {
            let addresses = pending.await?;
            // reqwest replaces port 0 with the port of the request URL.
            let addrs: Addrs = Box::new(
                addresses
                    .into_iter()
                    .map(|ip| SocketAddr::new(ip, 0))
                    .collect::<Vec<_>>()
                    .into_iter(),
            );
            Ok(addrs)
        })
    }
}
