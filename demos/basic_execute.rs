//! Basic example demonstrating cached GETs, typed handlers and POST requests.
//!
//! This example shows how to:
//! - Create a client with the default configuration
//! - Execute GET requests through the response cache
//! - Turn a response into your own type with `JsonHandler`
//! - Send a POST request that bypasses the cache
//!
//! Run with: `cargo run --example basic_execute`
//!
//! Profiling lines are printed with `RUST_LOG=callgate::profiling=trace`.

use callgate::{Client, ClientConfig, Error, JsonHandler, Request};
use http::Method;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct Post {
    #[serde(rename = "userId")]
    user_id: u32,
    id: u32,
    title: String,
    body: String,
}

#[derive(Debug, Serialize)]
struct NewPost {
    title: String,
    body: String,
    #[serde(rename = "userId")]
    user_id: u32,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "callgate=debug,basic_execute=info".into()),
        )
        .init();

    let client = Client::new(ClientConfig::default())?;

    println!("=== Cached GET Example ===");
    let request = Request::get("https://jsonplaceholder.typicode.com/posts/1")?;
    let first = client.execute(request.clone());
    let second = client.execute(request);

    // Both futures share the same attempt.
    let (first, second) = (first.await?, second.await?);
    println!("Status code: {}", first.status);
    println!("Same body: {}", first.body == second.body);
    println!("Content-Type: {:?}", first.header("content-type"));
    println!();

    println!("=== Typed GET Example ===");
    let request = Request::get("https://jsonplaceholder.typicode.com/posts/2")?;
    let post: Post = client
        .critical_execute_with(request, JsonHandler::new())
        .await?;
    println!("Post ID: {}", post.id);
    println!("Title: {}", post.title);
    println!();

    println!("=== POST Request Example ===");
    let new_post = NewPost {
        title: "My New Post".to_string(),
        body: "This is the content of my new post!".to_string(),
        user_id: 1,
    };
    let request = Request::builder()
        .method(Method::POST)
        .url("https://jsonplaceholder.typicode.com/posts")
        .json_body(&new_post)?
        .build()?;
    let created: Post = client
        .critical_execute_with(request, JsonHandler::new().expect_status(201))
        .await?;
    println!("Created post ID: {}", created.id);
    println!();

    let stats = client.cache_stats();
    println!("=== Cache Stats ===");
    println!("Requests: {}", stats.request_count());
    println!("Hit rate: {:.2}", stats.hit_rate());

    client.close();
    Ok(())
}
