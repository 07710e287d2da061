//! Falsification Tests: Category F - Docker (F025)
//!
//! Needs a reachable daemon and an image in `FLOTA_TEST_IMAGE` that keeps
//! running and ships `tc`. Skips otherwise.

use flota_core::{ClusterConfig, InstanceStatus, NetworkCondition};
use flota_docker::DockerConfig;
use flota_test::{ClusterTestHarness, docker_available, init_tracing};

/// F025: The net-1 scenario holds on a real engine
///
/// # Falsification Attempt
/// Same as F022, on Docker: distinct addresses, host ports published, loss
/// visible only on A, nothing left behind.
#[tokio::test]
#[ignore = "requires a docker daemon and FLOTA_TEST_IMAGE"]
async fn f025_net1_scenario_on_docker() -> anyhow::Result<()> {
    init_tracing();

    let Ok(image) = std::env::var("FLOTA_TEST_IMAGE") else {
        eprintln!("skipping: FLOTA_TEST_IMAGE is not set");
        return Ok(());
    };
    let docker = DockerConfig::default();
    if !docker_available(&docker).await {
        eprintln!("skipping: docker daemon unreachable");
        return Ok(());
    }

    let harness = ClusterTestHarness::docker(&docker, ClusterConfig::new(image)).await?;
    let network = harness.allocator().network_name("net-1");
    let runtime = std::sync::Arc::clone(harness.runtime());

    let (ids, network) = harness
        .run(|env| async move {
            let cluster = env.cluster_on(&network).await?;
            let mut nodes = vec![
                env.descriptor("a", 2000),
                env.descriptor("b", 2000),
            ];
            cluster.run_instances(&mut nodes, true).await?;

            assert_ne!(nodes[0].address(), nodes[1].address());
            for node in &nodes {
                assert_eq!(cluster.status(node.id()).await, Some(InstanceStatus::Running));
                assert_ne!(cluster.host_port(node).await?, 0);
            }

            let injector = cluster.conditions();
            let lossy = NetworkCondition::builder().loss(10.0).build()?;
            injector
                .apply(&nodes[0], &lossy, "eth0", env.cancel_token())
                .await?;
            let a_rules = injector.rules(&nodes[0], "eth0", env.cancel_token()).await?;
            let b_rules = injector.rules(&nodes[1], "eth0", env.cancel_token()).await?;
            assert!(a_rules.contains("loss 10%"), "{a_rules}");
            assert!(!b_rules.contains("netem"), "{b_rules}");

            let ids: Vec<String> = nodes
                .iter()
                .filter_map(|n| n.container_id().map(str::to_string))
                .collect();
            anyhow::Ok((ids, network))
        })
        .await?;

    for id in ids {
        assert!(runtime.inspect_container(&id).await.unwrap_err().is_not_found());
    }
    assert!(runtime.list_networks(&network).await?.iter().all(|n| n.name != network));
    Ok(())
}
