//! Coalescing response cache.
//!
//! Each distinct [`Request`] maps to one shared load. The first caller for a
//! key starts the load; everyone else who asks while it runs (or after it
//! finished, until the entry expires) joins the same shared future and sees
//! the same response or the same error. Failed loads are not cached.
//!
//! Entries expire a fixed time after their value was written. With
//! refresh-ahead enabled, an entry older than the refresh threshold is
//! reloaded in the background on access while the current value keeps
//! being served. A background task purges expired entries on its own
//! schedule.

use crate::config::CacheConfig;
use crate::{Error, Request, Response, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::broadcast;

/// Produces the response for a cache miss.
pub type CacheLoader = Arc<dyn Fn(Request) -> BoxFuture<'static, Result<Response>> + Send + Sync>;

type SharedLoad = Shared<BoxFuture<'static, std::result::Result<Response, Arc<Error>>>>;

struct CacheEntry {
    load: SharedLoad,
    generation: u64,
    /// `None` while the entry has no written value yet.
    written_at: Option<Instant>,
    accessed_at: Instant,
    /// Background reload started by refresh-ahead.
    refresh: Option<SharedLoad>,
}

impl CacheEntry {
    fn loading(load: SharedLoad, generation: u64, now: Instant) -> Self {
        Self {
            load,
            generation,
            written_at: None,
            accessed_at: now,
            refresh: None,
        }
    }

    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        self.written_at
            .is_some_and(|written| now.saturating_duration_since(written) >= ttl)
    }

    fn needs_refresh(&self, now: Instant, threshold: Option<Duration>) -> bool {
        match (threshold, self.written_at) {
            (Some(threshold), Some(written)) => {
                self.refresh.is_none() && now.saturating_duration_since(written) >= threshold
            }
            _ => false,
        }
    }

    /// Returns `true` while a load or refresh for this entry is running.
    fn is_loading(&self) -> bool {
        self.written_at.is_none() || self.refresh.is_some()
    }
}

/// Point-in-time cache counters.
///
/// All counters stay at zero unless
/// [`CacheConfig::record_stats`] is enabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that joined an existing entry.
    pub hit_count: u64,
    /// Lookups that started a new load.
    pub miss_count: u64,
    /// Entries removed by expiry or size bound.
    pub eviction_count: u64,
    /// Loads (including refreshes) that produced a response.
    pub load_success_count: u64,
    /// Loads (including refreshes) that failed.
    pub load_failure_count: u64,
    /// Time spent in all loads.
    pub total_load_time: Duration,
}

impl CacheStats {
    /// Total number of lookups.
    pub fn request_count(&self) -> u64 {
        self.hit_count.saturating_add(self.miss_count)
    }

    /// Total number of finished loads.
    pub fn load_count(&self) -> u64 {
        self.load_success_count.saturating_add(self.load_failure_count)
    }

    /// Fraction of lookups that were hits; `1.0` before any lookup.
    pub fn hit_rate(&self) -> f64 {
        match self.request_count() {
            0 => 1.0,
            total => self.hit_count as f64 / total as f64,
        }
    }

    /// Fraction of lookups that were misses; `0.0` before any lookup.
    pub fn miss_rate(&self) -> f64 {
        match self.request_count() {
            0 => 0.0,
            total => self.miss_count as f64 / total as f64,
        }
    }

    /// Mean time per finished load.
    pub fn average_load_penalty(&self) -> Duration {
        match u32::try_from(self.load_count()) {
            Ok(0) => Duration::ZERO,
            Ok(count) => self.total_load_time / count,
            Err(_) => Duration::from_nanos(
                u64::try_from(self.total_load_time.as_nanos() / u128::from(self.load_count()))
                    .unwrap_or(u64::MAX),
            ),
        }
    }
}

#[derive(Debug)]
struct StatsCounter {
    enabled: bool,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    load_successes: AtomicU64,
    load_failures: AtomicU64,
    load_nanos: AtomicU64,
}

impl StatsCounter {
    fn new(enabled: bool) -> Self {
        Self {
            enabled,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            load_successes: AtomicU64::new(0),
            load_failures: AtomicU64::new(0),
            load_nanos: AtomicU64::new(0),
        }
    }

    fn add(&self, counter: &AtomicU64, amount: u64) {
        if self.enabled {
            counter.fetch_add(amount, Ordering::Relaxed);
        }
    }

    fn record_hit(&self) {
        self.add(&self.hits, 1);
    }

    fn record_miss(&self) {
        self.add(&self.misses, 1);
    }

    fn record_evictions(&self, count: u64) {
        self.add(&self.evictions, count);
    }

    fn record_load(&self, succeeded: bool, elapsed: Duration) {
        let counter = if succeeded {
            &self.load_successes
        } else {
            &self.load_failures
        };
        self.add(counter, 1);
        self.add(
            &self.load_nanos,
            u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX),
        );
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hit_count: self.hits.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
            eviction_count: self.evictions.load(Ordering::Relaxed),
            load_success_count: self.load_successes.load(Ordering::Relaxed),
            load_failure_count: self.load_failures.load(Ordering::Relaxed),
            total_load_time: Duration::from_nanos(self.load_nanos.load(Ordering::Relaxed)),
        }
    }
}

/// Maps requests to shared in-flight or completed loads.
pub struct ResponseCache {
    store: Arc<DashMap<Request, CacheEntry>>,
    config: CacheConfig,
    loader: CacheLoader,
    stats: Arc<StatsCounter>,
    generation: AtomicU64,
    handle: Handle,
    shutdown: broadcast::Sender<()>,
    stopped: AtomicBool,
}

impl ResponseCache {
    /// Creates a cache and starts its cleanup task on `handle`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] if `config` is invalid.
    pub fn new(config: CacheConfig, handle: Handle, loader: CacheLoader) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(DashMap::new());
        let stats = Arc::new(StatsCounter::new(config.record_stats));
        let (shutdown, receiver) = broadcast::channel(1);

        handle.spawn(run_cleanup(
            store.clone(),
            stats.clone(),
            config.expire_after_write(),
            config.cleanup_interval(),
            receiver,
        ));

        Ok(Self {
            store,
            config,
            loader,
            stats,
            generation: AtomicU64::new(0),
            handle,
            shutdown,
            stopped: AtomicBool::new(false),
        })
    }

    /// Returns the response for `request`, loading it at most once.
    ///
    /// Every caller sharing a load receives the same outcome; a failed load
    /// surfaces as [`Error::CacheLoad`] around the original error.
    pub fn get(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send + 'static {
        let now = Instant::now();
        let ttl = self.config.expire_after_write();

        let load = match self.store.entry(request.clone()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.is_expired(now, ttl) {
                    self.stats.record_evictions(1);
                    self.stats.record_miss();
                    entry.accessed_at = now;
                    if let Some(refresh) = entry.refresh.clone() {
                        // The running refresh becomes the entry's load.
                        tracing::debug!(url = %request.url(), "Cache entry expired, joining refresh");
                        entry.load = refresh.clone();
                        entry.written_at = None;
                        refresh
                    } else {
                        tracing::debug!(url = %request.url(), "Cache entry expired, reloading");
                        let generation = self.next_generation();
                        let load = self.start_load(request.clone(), generation);
                        occupied.insert(CacheEntry::loading(load.clone(), generation, now));
                        load
                    }
                } else {
                    self.stats.record_hit();
                    entry.accessed_at = now;
                    if entry.needs_refresh(now, self.config.refresh_after_write()) {
                        tracing::debug!(url = %request.url(), "Refreshing cache entry");
                        entry.refresh = Some(self.start_load(request.clone(), entry.generation));
                    }
                    entry.load.clone()
                }
            }
            Entry::Vacant(vacant) => {
                self.stats.record_miss();
                let generation = self.next_generation();
                let load = self.start_load(request.clone(), generation);
                vacant.insert(CacheEntry::loading(load.clone(), generation, now));
                load
            }
        };

        self.enforce_capacity();
        async move { load.await.map_err(Error::CacheLoad) }
    }

    /// Drops the entry for `request`, if any. Callers already waiting on it
    /// still receive its outcome.
    pub fn invalidate(&self, request: &Request) {
        self.store.remove(request);
    }

    /// Drops every entry.
    pub fn invalidate_all(&self) {
        self.store.clear();
    }

    /// Number of entries, including loads in flight.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Returns `true` if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Removes expired entries now. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        purge_expired(&self.store, &self.stats, self.config.expire_after_write())
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    /// Stops the background cleanup task. Entries stay readable.
    pub fn shutdown(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            let _ = self.shutdown.send(());
        }
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed)
    }

    /// Spawns a load that writes its outcome into the entry of `generation`.
    ///
    /// On success the entry's value and write time are replaced. On failure
    /// an entry without a previous value is removed, while one that still
    /// holds a value keeps serving it.
    fn start_load(&self, request: Request, generation: u64) -> SharedLoad {
        let loader = self.loader.clone();
        let store = self.store.clone();
        let stats = self.stats.clone();

        let task = self.handle.spawn(async move {
            let started = Instant::now();
            let result = loader(request.clone()).await.map_err(Arc::new);
            stats.record_load(result.is_ok(), started.elapsed());

            match &result {
                Ok(response) => {
                    if let Some(mut entry) = store.get_mut(&request) {
                        if entry.generation == generation {
                            let written: BoxFuture<'static, std::result::Result<Response, Arc<Error>>> =
                                futures::future::ready(Ok(response.clone())).boxed();
                            entry.load = written.shared();
                            entry.written_at = Some(Instant::now());
                            entry.refresh = None;
                        }
                    }
                    tracing::debug!(url = %request.url(), "Cache load completed");
                }
                Err(e) => {
                    let keeps_value = store.get_mut(&request).map_or(true, |mut entry| {
                        if entry.generation != generation {
                            return true;
                        }
                        entry.refresh = None;
                        entry.written_at.is_some()
                    });
                    if !keeps_value {
                        store.remove_if(&request, |_, entry| {
                            entry.generation == generation && entry.written_at.is_none()
                        });
                    }
                    tracing::debug!(url = %request.url(), error = %e, keeps_value, "Cache load failed");
                }
            }
            result
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(Arc::new(Error::TaskFailed(e.to_string()))),
            }
        }
        .boxed()
        .shared()
    }

    /// Evicts least recently accessed entries until the size bound holds.
    /// Entries with a load in flight are never chosen, so the cache may stay
    /// over its bound until those loads finish.
    fn enforce_capacity(&self) {
        while self.store.len() > self.config.maximum_size {
            let oldest = self
                .store
                .iter()
                .filter(|entry| !entry.is_loading())
                .min_by_key(|entry| entry.accessed_at)
                .map(|entry| entry.key().clone());
            let Some(key) = oldest else {
                break;
            };
            if self.store.remove(&key).is_some() {
                self.stats.record_evictions(1);
                tracing::debug!(url = %key.url(), "Evicted least recently used cache entry");
            }
        }
    }
}

impl Drop for ResponseCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn purge_expired(store: &DashMap<Request, CacheEntry>, stats: &StatsCounter, ttl: Duration) -> usize {
    let now = Instant::now();
    let mut removed = 0;
    store.retain(|_, entry| {
        let expired = entry.is_expired(now, ttl) && entry.refresh.is_none();
        if expired {
            removed += 1;
        }
        !expired
    });
    stats.record_evictions(removed as u64);
    removed
}

async fn run_cleanup(
    store: Arc<DashMap<Request, CacheEntry>>,
    stats: Arc<StatsCounter>,
    ttl: Duration,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(period);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = purge_expired(&store, &stats, ttl);
                tracing::debug!(removed, remaining = store.len(), "Cache cleanup pass");
            }
            _ = shutdown.recv() => {
                tracing::debug!("Cache cleanup stopped");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, StatusCode};
    use std::sync::atomic::AtomicUsize;

    fn counting_loader(calls: Arc<AtomicUsize>, delay: Duration) -> CacheLoader {
        Arc::new(move |_request: Request| {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(delay).await;
                Ok(Response::new(
                    StatusCode::OK,
                    HeaderMap::new(),
                    n.to_string().into_bytes(),
                ))
            }
            .boxed()
        })
    }

    fn config() -> CacheConfig {
        CacheConfig {
            record_stats: true,
            ..CacheConfig::default()
        }
    }

    fn request(path: &str) -> Request {
        Request::get(format!("http://service.test/{}", path)).unwrap()
    }

    #[tokio::test]
    async fn test_concurrent_lookups_share_one_load() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = ResponseCache::new(
            config(),
            Handle::current(),
            counting_loader(calls.clone(), Duration::from_millis(20)),
        ).unwrap();
        let key = request("a");

        let (first, second) = tokio::join!(cache.get(&key), cache.get(&key.clone()));
        assert_eq!(first.unwrap(), second.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let third = cache.get(&key).await.unwrap();
        assert_eq!(third.body, b"1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stats_after_miss_then_hit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = ResponseCache::new(config(), Handle::current(), counting_loader(calls, Duration::ZERO)).unwrap();
        let key = request("stats");

        cache.get(&key).await.unwrap();
        cache.get(&key).await.unwrap();

        let stats = cache.stats();
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.miss_count, 1);
        assert_eq!(stats.request_count(), 2);
        assert_eq!(stats.load_success_count, 1);
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[tokio::test]
    async fn test_stats_disabled() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = ResponseCache::new(
            CacheConfig::default(),
            Handle::current(),
            counting_loader(calls, Duration::ZERO),
        ).unwrap();
        cache.get(&request("x")).await.unwrap();
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[tokio::test]
    async fn test_failed_load_reaches_all_callers_and_is_not_kept() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let loader: CacheLoader = Arc::new(move |_request: Request| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                Err(Error::Timeout)
            }
            .boxed()
        });
        let cache = ResponseCache::new(config(), Handle::current(), loader).unwrap();
        let key = request("fail");

        let (a, b) = tokio::join!(cache.get(&key), cache.get(&key));
        assert!(matches!(a, Err(Error::CacheLoad(_))));
        assert_eq!(b.unwrap_err().kind(), crate::ErrorKind::Timeout);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.is_empty());

        let _ = cache.get(&key).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().load_failure_count, 2);
    }

    #[tokio::test]
    async fn test_expired_entry_is_reloaded() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = ResponseCache::new(
            CacheConfig {
                expire_after_write_ms: 20,
                ..config()
            },
            Handle::current(),
            counting_loader(calls.clone(), Duration::ZERO),
        ).unwrap();
        let key = request("ttl");

        cache.get(&key).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        let reloaded = cache.get(&key).await.unwrap();

        assert_eq!(reloaded.body, b"2");
        assert_eq!(cache.stats().eviction_count, 1);
        assert_eq!(cache.stats().miss_count, 2);
    }

    #[tokio::test]
    async fn test_refresh_ahead_serves_current_value() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = ResponseCache::new(
            CacheConfig {
                refresh_after_write_ms: Some(10),
                ..config()
            },
            Handle::current(),
            counting_loader(calls.clone(), Duration::from_millis(20)),
        ).unwrap();
        let key = request("refresh");

        assert_eq!(cache.get(&key).await.unwrap().body, b"1");
        tokio::time::sleep(Duration::from_millis(15)).await;

        // Stale but served immediately while the reload runs.
        assert_eq!(cache.get(&key).await.unwrap().body, b"1");
        assert_eq!(cache.get(&key).await.unwrap().body, b"1");
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.get(&key).await.unwrap().body, b"2");
    }

    #[tokio::test]
    async fn test_size_bound_evicts_least_recently_used() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = ResponseCache::new(
            CacheConfig {
                maximum_size: 2,
                ..config()
            },
            Handle::current(),
            counting_loader(calls.clone(), Duration::ZERO),
        ).unwrap();

        cache.get(&request("a")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.get(&request("b")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.get(&request("a")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.get(&request("c")).await.unwrap();

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().eviction_count, 1);

        cache.get(&request("a")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_background_cleanup_purges_expired_entries() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = ResponseCache::new(
            CacheConfig {
                expire_after_write_ms: 5,
                cleanup_interval_ms: 10,
                ..config()
            },
            Handle::current(),
            counting_loader(calls, Duration::ZERO),
        ).unwrap();

        cache.get(&request("a")).await.unwrap();
        cache.get(&request("b")).await.unwrap();
        assert_eq!(cache.len(), 2);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(cache.is_empty());
        cache.shutdown();
    }

    #[tokio::test]
    async fn test_invalidate() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = ResponseCache::new(config(), Handle::current(), counting_loader(calls.clone(), Duration::ZERO)).unwrap();
        let key = request("inv");

        cache.get(&key).await.unwrap();
        cache.invalidate(&key);
        cache.get(&key).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        cache.invalidate_all();
        assert!(cache.is_empty());
    }

    /// Counts loader calls and the most that ever ran at once.
    #[derive(Default)]
    struct LoadGauge {
        calls: AtomicUsize,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    fn gauged_loader(gauge: Arc<LoadGauge>, delay: Duration) -> CacheLoader {
        Arc::new(move |_request: Request| {
            let gauge = gauge.clone();
            async move {
                let n = gauge.calls.fetch_add(1, Ordering::SeqCst) + 1;
                let running = gauge.running.fetch_add(1, Ordering::SeqCst) + 1;
                gauge.peak.fetch_max(running, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                gauge.running.fetch_sub(1, Ordering::SeqCst);
                Ok(Response::new(
                    StatusCode::OK,
                    HeaderMap::new(),
                    n.to_string().into_bytes(),
                ))
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_expiry_during_refresh_joins_the_refresh() {
        let gauge = Arc::new(LoadGauge::default());
        let cache = ResponseCache::new(
            CacheConfig {
                expire_after_write_ms: 30,
                refresh_after_write_ms: Some(10),
                ..config()
            },
            Handle::current(),
            gauged_loader(gauge.clone(), Duration::from_millis(100)),
        )
        .unwrap();
        let key = request("racing");

        assert_eq!(cache.get(&key).await.unwrap().body, b"1");
        tokio::time::sleep(Duration::from_millis(15)).await;
        // Starts the refresh, still served the current value.
        assert_eq!(cache.get(&key).await.unwrap().body, b"1");
        tokio::time::sleep(Duration::from_millis(25)).await;

        // Expired while the refresh runs: waits for the refresh.
        let joined = cache.get(&key).await.unwrap();

        assert_eq!(joined.body, b"2");
        assert_eq!(gauge.calls.load(Ordering::SeqCst), 2);
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get(&key).await.unwrap().body, b"2");
    }

    #[tokio::test]
    async fn test_failed_refresh_after_expiry_drops_entry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let loader: CacheLoader = Arc::new(move |_request: Request| {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(Duration::from_millis(50)).await;
                if n == 1 {
                    Ok(Response::new(StatusCode::OK, HeaderMap::new(), Vec::new()))
                } else {
                    Err(Error::Timeout)
                }
            }
            .boxed()
        });
        let cache = ResponseCache::new(
            CacheConfig {
                expire_after_write_ms: 30,
                refresh_after_write_ms: Some(10),
                ..config()
            },
            Handle::current(),
            loader,
        )
        .unwrap();
        let key = request("refresh-fails");

        cache.get(&key).await.unwrap();
        tokio::time::sleep(Duration::from_millis(15)).await;
        cache.get(&key).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let result = cache.get(&key).await;
        assert_eq!(result.unwrap_err().kind(), crate::ErrorKind::Timeout);
        assert!(cache.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_size_bound_never_evicts_loads_in_flight() {
        let gauge = Arc::new(LoadGauge::default());
        let cache = ResponseCache::new(
            CacheConfig {
                maximum_size: 1,
                ..config()
            },
            Handle::current(),
            gauged_loader(gauge.clone(), Duration::from_millis(50)),
        )
        .unwrap();

        let first_a = cache.get(&request("a"));
        let b = cache.get(&request("b"));
        let second_a = cache.get(&request("a"));
        assert_eq!(cache.len(), 2);

        let (first_a, b, second_a) = tokio::join!(first_a, b, second_a);
        assert_eq!(first_a.unwrap(), second_a.unwrap());
        b.unwrap();
        assert_eq!(gauge.calls.load(Ordering::SeqCst), 2);
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 2);

        // Both loads finished, so the next lookup restores the bound.
        cache.get(&request("a")).await.unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().eviction_count, 1);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let calls = Arc::new(AtomicUsize::new(0));
        let result = ResponseCache::new(
            CacheConfig {
                cleanup_interval_ms: 0,
                ..config()
            },
            Handle::current(),
            counting_loader(calls, Duration::ZERO),
        );
        assert!(matches!(result, Err(Error::ConfigurationError(_))));
    }
}
