// Demos are allowed to use expect/unwrap for simplicity
#![allow(clippy::expect_used, clippy::unwrap_used)]

//! Lossy Link Demo
//!
//! Starts two instances of an image on a fresh Docker network, degrades the
//! first one's link and keeps everything up until Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! # Image must keep running and ship `tc` (iproute2)
//! cargo run --example lossy-link -- --image my/service:dev --port 2000 --loss 10
//!
//! # Cap bandwidth and add delay instead
//! cargo run --example lossy-link -- --image my/service:dev --bandwidth 256kbit --delay 80
//! ```

use std::sync::Arc;

use flota::prelude::*;
use tokio::signal;
use tokio_util::sync::CancellationToken;

fn flag<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn print_usage() {
    println!("Usage: lossy-link --image IMAGE [--port N] [--loss PCT] [--bandwidth RATE] [--delay MS]");
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return;
    }
    let Some(image) = flag(&args, "--image") else {
        print_usage();
        std::process::exit(2);
    };
    let port: u16 = flag(&args, "--port").map_or(2000, |p| p.parse().expect("invalid --port"));

    let mut builder = NetworkCondition::builder();
    if let Some(loss) = flag(&args, "--loss") {
        builder = builder.loss(loss.parse().expect("invalid --loss"));
    }
    if let Some(rate) = flag(&args, "--bandwidth") {
        builder = builder.bandwidth(rate);
    }
    if let Some(delay) = flag(&args, "--delay") {
        builder = builder.delay_ms(delay.parse().expect("invalid --delay"));
    }
    let condition = builder.build().expect("invalid network condition");

    let adapter = DockerAdapter::connect_checked(&DockerConfig::default())
        .await
        .expect("docker daemon not reachable");
    let runtime: Arc<dyn RuntimeAdapter> = Arc::new(adapter);
    let networks = Arc::new(NetworkManager::new(Arc::clone(&runtime)));
    let allocator = SuiteAllocator::new();

    let config = ClusterConfig::new(image).with_network_name(allocator.network_name("demo"));
    let scope = CleanupScope::new(config.release_timeout);
    let cancel = CancellationToken::new();

    scope
        .run(|scope| async move {
            let cluster = Cluster::new(runtime, &networks, config, &scope, cancel.clone())
                .await
                .expect("cluster setup failed");

            let mut nodes = vec![
                allocator.descriptor("node", port),
                allocator.descriptor("node", port),
            ];
            cluster
                .run_instances(&mut nodes, true)
                .await
                .expect("launch failed");

            let iface = cluster.config().default_interface.clone();
            cluster
                .conditions()
                .apply(&nodes[0], &condition, &iface, &cancel)
                .await
                .expect("applying condition failed");

            for node in &nodes {
                let host_port = cluster.host_port(node).await.expect("no host port");
                let rules = cluster
                    .conditions()
                    .rules(node, &iface, &cancel)
                    .await
                    .unwrap_or_default();
                println!(
                    "{:<10} {:<16} 127.0.0.1:{host_port:<6} {}",
                    node.name(),
                    node.address().map(|a| a.to_string()).unwrap_or_default(),
                    rules.lines().next().unwrap_or("")
                );
            }

            println!("Press Ctrl+C to tear down");
            signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
        })
        .await;

    println!("Cluster removed");
}
