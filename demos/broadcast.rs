//! Example: In-process Herald network
//!
//! Starts a server on a loopback port, connects three links and shows the
//! four ways a package can be addressed.
//!
//! Run with: `cargo run --example broadcast`

use herald::config::{ConfigOverrides, HeraldConfig, ServerConfig};
use herald::server::Server;
use herald::service::link::Link;
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Herald Routing Demo ===\n");

    let config = HeraldConfig::new("demo", "127.0.0.1", 0, false, "demo-secret", "/")?;
    let server = Server::new(config.clone(), ServerConfig::default());
    server
        .dispatcher()
        .register("time", |_| Ok(Some(json!({"type": "time", "uptime": "ok"}))))?;

    let listener = server.bind().await?;
    let config = config.copy(ConfigOverrides::default().port(listener.local_addr()?.port()))?;
    let serving = server.clone();
    tokio::spawn(async move { serving.serve(listener).await });

    let mut desktop = Link::connect(&config, Uuid::new_v4(), "desktop").await?;
    let mut phone = Link::connect(&config, Uuid::new_v4(), "mobile").await?;
    let mut tablet = Link::connect(&config, Uuid::new_v4(), "mobile").await?;
    println!("Connected {} links to {}\n", server.registry().len(), config.url());

    println!("1. BROADCAST (*)");
    desktop.send(json!("hello everyone"), "*").await?;
    for (name, link) in [("desktop", &mut desktop), ("phone", &mut phone), ("tablet", &mut tablet)] {
        let package = link.recv().await?;
        println!("   - {name} got {} from {}", package.data(), package.source());
    }

    println!("\n2. GROUP (mobile)");
    desktop.send(json!("sync please"), "mobile").await?;
    for (name, link) in [("phone", &mut phone), ("tablet", &mut tablet)] {
        let package = link.recv().await?;
        println!("   - {name} got {} as {}", package.data(), package.destination());
    }

    println!("\n3. DIRECT (nid)");
    phone.send(json!("just you"), desktop.nid()).await?;
    println!("   - desktop got {}", desktop.recv().await?.data());

    println!("\n4. SERVER (<server>)");
    tablet.send(json!({"type": "time"}), "<server>").await?;
    println!("   - tablet got {}", tablet.recv().await?.data());

    desktop.send(json!("anyone?"), "nonexistent-type").await?;
    let silence = phone.recv_timeout(Duration::from_millis(200)).await?;
    println!("\nUnknown destinations are dropped: phone received {:?}", silence.map(|p| p.data().clone()));

    server.shutdown();
    println!("\nMetrics: {:?}", server.metrics().snapshot());
    Ok(())
}
