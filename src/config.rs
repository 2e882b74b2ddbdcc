//! Client configuration.
//!
//! All types deserialize with `#[serde(default)]`, so a partial document
//! only overrides what it names. [`ClientConfig`] compares and hashes by
//! value, which is what [`ClientFactory`](crate::ClientFactory) keys on.

use crate::resolver::ResolverKind;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Everything needed to build a [`Client`](crate::Client).
///
/// # Examples
///
/// ```
/// use callgate::ClientConfig;
///
/// let config: ClientConfig = serde_json::from_str(r#"{
///     "cache": { "expire_after_write_ms": 500, "record_stats": true },
///     "retry_interval_ms": 50
/// }"#).unwrap();
///
/// assert_eq!(config.cache.maximum_size, 10_000);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Response cache settings.
    pub cache: CacheConfig,
    /// Bundled transport settings.
    pub transport: TransportConfig,
    /// Fixed delay between retry attempts. No delay when unset.
    pub retry_interval_ms: Option<u64>,
    /// Maximum number of retried requests running at once.
    pub retry_pool_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            transport: TransportConfig::default(),
            retry_interval_ms: None,
            retry_pool_size: 64,
        }
    }
}

impl ClientConfig {
    /// Checks values that would make the client unusable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.retry_pool_size == 0 {
            return Err(Error::ConfigurationError(
                "retry_pool_size must be greater than zero".to_string(),
            ));
        }
        if self.retry_pool_size > Semaphore::MAX_PERMITS {
            return Err(Error::ConfigurationError(format!(
                "retry_pool_size must not exceed {}",
                Semaphore::MAX_PERMITS
            )));
        }
        self.cache.validate()
    }

    /// Delay between retry attempts.
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms.unwrap_or(0))
    }
}

/// Response cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries expire this long after their value was written.
    pub expire_after_write_ms: u64,
    /// Entries older than this are reloaded in the background on access.
    pub refresh_after_write_ms: Option<u64>,
    /// Maximum number of entries; the least recently used is evicted first.
    pub maximum_size: usize,
    /// Whether hit, miss and load counters are maintained.
    pub record_stats: bool,
    /// How often expired entries are purged in the background.
    pub cleanup_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            expire_after_write_ms: 2_000,
            refresh_after_write_ms: None,
            maximum_size: 10_000,
            record_stats: false,
            cleanup_interval_ms: 60_000,
        }
    }
}

impl CacheConfig {
    /// Checks values that would stop the cache from working.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.cleanup_interval_ms == 0 {
            return Err(Error::ConfigurationError(
                "cache.cleanup_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Time to live after write.
    pub fn expire_after_write(&self) -> Duration {
        Duration::from_millis(self.expire_after_write_ms)
    }

    /// Refresh-ahead threshold, if enabled.
    pub fn refresh_after_write(&self) -> Option<Duration> {
        self.refresh_after_write_ms.map(Duration::from_millis)
    }

    /// Background purge period.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }
}

/// Settings for [`ReqwestTransport`](crate::ReqwestTransport).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Connection establishment timeout.
    pub connect_timeout_ms: Option<u64>,
    /// Whole-request timeout, overridable per request.
    pub request_timeout_ms: Option<u64>,
    /// How long idle pooled connections are kept.
    pub pool_idle_timeout_ms: Option<u64>,
    /// Maximum idle connections kept per host.
    pub pool_max_idle_per_host: usize,
    /// `User-Agent` sent with every request.
    pub user_agent: Option<String>,
    /// Whether redirects are followed.
    pub follow_redirects: bool,
    /// Redirect limit when following is enabled.
    pub max_redirects: usize,
    /// Host name resolution strategy.
    pub resolver: ResolverKind,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: Some(5_000),
            request_timeout_ms: Some(60_000),
            pool_idle_timeout_ms: Some(60_000),
            pool_max_idle_per_host: usize::MAX,
            user_agent: Some(concat!("callgate/", env!("CARGO_PKG_VERSION")).to_string()),
            follow_redirects: false,
            max_redirects: 5,
            resolver: ResolverKind::Standard,
        }
    }
}
