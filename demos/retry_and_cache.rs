//! Example demonstrating retry policies and cache tuning.
//!
//! This example shows how to:
//! - Enroll status codes and error kinds for retry on a single request
//! - Pick a delay between attempts
//! - Tune the cache TTL, refresh-ahead and stats
//! - Cancel a call that is still in flight
//!
//! Run with: `cargo run --example retry_and_cache`

use callgate::{CacheConfig, Client, Error, ErrorKind, Request, RetryStrategy};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "callgate=debug,callgate::profiling=trace".into()),
        )
        .init();

    let client = Client::builder()
        .cache_config(CacheConfig {
            expire_after_write_ms: 5_000,
            refresh_after_write_ms: Some(2_000),
            record_stats: true,
            ..CacheConfig::default()
        })
        .retry_strategy(RetryStrategy::ExponentialBackoff {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            jitter: true,
        })
        .build()?;

    println!("=== Retry Example ===");
    // httpbin answers 503 every time, so all three attempts are made.
    let request = Request::builder()
        .url("https://httpbin.org/status/503")
        .add_retry_status_code(503)
        .add_retry_error_kind(ErrorKind::Timeout)
        .add_retry_error_kind(ErrorKind::Connect)
        .max_retries(2)
        .timeout(Duration::from_secs(5))
        .critical_get(true)
        .build()?;
    match client.execute(request).await {
        Ok(response) => println!("Final status after retries: {}", response.status),
        Err(e) => println!("Failed with {:?}: {}", e.kind(), e),
    }
    println!();

    println!("=== Cache Example ===");
    let request = Request::builder()
        .url("https://httpbin.org/get")
        .query_param("page", "1")
        .build()?;
    for _ in 0..3 {
        let response = client.execute(request.clone()).await?;
        println!("Status: {}", response.status);
    }
    let stats = client.cache_stats();
    println!(
        "Hits: {}, misses: {}, average load: {:?}",
        stats.hit_count,
        stats.miss_count,
        stats.average_load_penalty()
    );
    println!();

    println!("=== Cancellation Example ===");
    let slow = Request::get("https://httpbin.org/delay/5")?;
    let future = client.critical_execute(slow);
    tokio::time::sleep(Duration::from_millis(200)).await;
    println!("Cancelled: {}", future.cancel());
    match future.await {
        Err(Error::Cancelled) => println!("The call reports it was cancelled"),
        other => println!("Unexpected outcome: {:?}", other.map(|r| r.status)),
    }

    client.close();
    Ok(())
}
