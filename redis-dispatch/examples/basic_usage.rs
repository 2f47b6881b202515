//! Tour of the three execution modes against a local server
//!
//! Run with `RUST_LOG=redis_dispatch=debug cargo run --example basic_usage`.

use redis_dispatch::{Client, ConnectionConfig, RedisError};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    let config = ConnectionConfig::new(url).with_operation_timeout(Duration::from_secs(2));
    let client = Client::connect(config).await?;
    let cmds = client.commands();

    // One command, one round trip
    client.execute(&cmds.set("demo:greeting", "hello")).await?;
    let greeting = client.execute(&cmds.get("demo:greeting")).await?;
    println!("GET demo:greeting -> {:?}", greeting);

    // Several commands, one write
    let mut pipeline = client.pipeline();
    let set = pipeline.append_command(cmds.set("demo:counter", "1"));
    let incr = pipeline.append_command(cmds.incr("demo:counter"));
    let wrong = pipeline.append_command(cmds.lpop("demo:counter"));
    pipeline.flush().await?;
    println!("pipeline: {} / {}", set.get().await?, incr.get().await?);
    match wrong.get().await {
        Err(RedisError::Server(msg)) => println!("LPOP on a string fails alone: {msg}"),
        other => println!("unexpected LPOP outcome: {other:?}"),
    }

    // All or nothing
    let mut tx = client.transaction();
    tx.watch(["demo:counter"]).await?;
    let bumped = tx.append_command(cmds.incr_by("demo:counter", 10));
    tx.exec().await?;
    println!("transaction: counter is now {}", bumped.get().await?);

    // Every primary; a single node here
    let keys = client.broadcast(&cmds.dbsize()).await?;
    println!("DBSIZE across primaries: {keys}");

    client
        .execute(&cmds.del(["demo:greeting", "demo:counter"]))
        .await?;
    Ok(())
}
