use herald::config::{ConfigOverrides, HeraldConfig, ServerConfig};
use herald::server::Server;
use herald::service::link::Link;
use serde_json::json;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::task::JoinSet;
use uuid::Uuid;

async fn start() -> (Server, HeraldConfig) {
    let config = HeraldConfig::new("load", "127.0.0.1", 0, false, "s3cret", "/").unwrap();
    let server = Server::new(config.clone(), ServerConfig::default());
    let listener = server.bind().await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let serving = server.clone();
    tokio::spawn(async move { serving.serve(listener).await });
    (server, config.copy(ConfigOverrides::default().port(port)).unwrap())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_identification_heavy() {
    let (server, config) = start().await;
    let links = 64usize;

    let mut tasks = JoinSet::new();
    for i in 0..links {
        let config = config.clone();
        tasks.spawn(async move {
            let link_type = if i % 2 == 0 { "even" } else { "odd" };
            Link::connect(&config, Uuid::new_v4(), link_type).await.unwrap()
        });
    }

    let mut connected = Vec::new();
    while let Some(res) = tasks.join_next().await {
        connected.push(res.unwrap());
    }

    assert_eq!(server.registry().len(), links);
    let unique: BTreeSet<Uuid> = connected.iter().map(Link::nid).collect();
    assert_eq!(unique.len(), links);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_senders_to_one_group() {
    let (_server, config) = start().await;
    let receivers = 8usize;
    let senders = 8usize;
    let per_sender = 25usize;

    let mut inboxes = Vec::new();
    for _ in 0..receivers {
        inboxes.push(Link::connect(&config, Uuid::new_v4(), "sink").await.unwrap());
    }

    let mut tasks = JoinSet::new();
    for s in 0..senders {
        let config = config.clone();
        tasks.spawn(async move {
            let mut link = Link::connect(&config, Uuid::new_v4(), "source").await.unwrap();
            for n in 0..per_sender {
                link.send(json!({"s": s, "n": n}), "sink").await.unwrap();
            }
            link
        });
    }

    // keep senders connected until everything is delivered
    let mut idle_senders = Vec::new();
    while let Some(res) = tasks.join_next().await {
        idle_senders.push(res.unwrap());
    }

    let expected = senders * per_sender;
    for inbox in &mut inboxes {
        let mut seen = BTreeSet::new();
        while seen.len() < expected {
            let package = inbox
                .recv_timeout(Duration::from_secs(10))
                .await
                .unwrap()
                .expect("delivery stalled");
            let s = package.data()["s"].as_u64().unwrap();
            let n = package.data()["n"].as_u64().unwrap();
            assert!(seen.insert((s, n)), "duplicate delivery of {s}/{n}");
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn churn_leaves_registry_consistent() {
    let (server, config) = start().await;

    let mut tasks = JoinSet::new();
    for _ in 0..32 {
        let config = config.clone();
        tasks.spawn(async move {
            for _ in 0..5 {
                let link = Link::connect(&config, Uuid::new_v4(), "churn").await.unwrap();
                link.close().await.unwrap();
            }
        });
    }
    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !server.registry().is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "registry never drained");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.metrics().snapshot().links_identified, 160);
}
