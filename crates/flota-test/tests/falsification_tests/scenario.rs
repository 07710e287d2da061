//! Falsification Tests: Category E - Scenarios (F022-F024)

use std::collections::HashSet;
use std::sync::Arc;

use flota_core::{FlotaError, InstanceDescriptor, InstanceStatus, NetworkCondition};

use super::mock_harness;

// =============================================================================
// F022: Two nodes on net-1
// =============================================================================

/// F022: Two nodes on "net-1", one of them lossy, all gone afterwards
///
/// # Falsification Attempt
/// Run A and B on port 2000, degrade A by 10% loss. B carrying a rule, A
/// lacking one, or anything surviving the test falsifies the claim.
#[tokio::test]
async fn f022_net1_two_nodes_one_lossy() -> anyhow::Result<()> {
    let (harness, mock) = mock_harness("f022");
    let observer = Arc::clone(&mock);

    harness
        .run(|env| async move {
            let cluster = env.cluster_on("net-1").await?;
            let mut nodes = vec![
                InstanceDescriptor::new("A", 2000),
                InstanceDescriptor::new("B", 2000),
            ];
            cluster.run_instances(&mut nodes, true).await?;

            let mut addresses = HashSet::new();
            for node in &nodes {
                let status = cluster.status(node.id()).await.unwrap();
                assert_eq!(status, InstanceStatus::Running);
                assert_eq!(status.to_string(), "active");

                let details = env
                    .runtime()
                    .inspect_container(node.container_id().unwrap())
                    .await?;
                assert_eq!(details.address_on("net-1"), node.address());
                assert!(addresses.insert(node.address().unwrap()));
            }

            let iface = cluster.config().default_interface.clone();
            let lossy = NetworkCondition::builder().loss(10.0).build()?;
            cluster
                .conditions()
                .apply(&nodes[0], &lossy, &iface, env.cancel_token())
                .await?;

            let a_rules = observer.qdiscs(nodes[0].container_id().unwrap(), &iface);
            let b_rules = observer.qdiscs(nodes[1].container_id().unwrap(), &iface);
            assert!(a_rules.iter().any(|r| r.contains("netem loss 10%")));
            assert!(b_rules.is_empty());
            anyhow::Ok(())
        })
        .await?;

    assert_eq!(mock.container_count(), 0);
    assert_eq!(mock.networks_named("net-1"), 0);
    Ok(())
}

// =============================================================================
// F023-F024: Partial failure
// =============================================================================

/// F023: A failed launch in a batch does not orphan its siblings
///
/// # Falsification Attempt
/// Fail the start of instance 2 of 3. An error not naming it, an untracked
/// sibling, or any leftover container falsifies the claim.
#[tokio::test]
async fn f023_partial_launch_is_accounted() -> anyhow::Result<()> {
    let (harness, mock) = mock_harness("f023");
    mock.fail_start("p-2");
    let observer = Arc::clone(&mock);

    harness
        .run(|env| async move {
            let cluster = env.cluster().await?;
            let mut nodes = vec![
                InstanceDescriptor::new("p-1", 2000),
                InstanceDescriptor::new("p-2", 2000),
                InstanceDescriptor::new("p-3", 2000),
            ];
            let err = cluster.run_instances(&mut nodes, true).await.unwrap_err();
            assert!(matches!(err, FlotaError::RuntimeStartFailed { ref instance, .. } if instance == "p-2"));
            assert!(err.to_string().contains("p-2"));

            assert!(nodes[0].is_launched());
            assert!(!nodes[1].is_launched());
            assert!(nodes[2].is_launched());

            let records = cluster.instances().await;
            let statuses: Vec<_> = records.iter().map(|r| (r.name.as_str(), r.status)).collect();
            assert_eq!(
                statuses,
                vec![
                    ("p-1", InstanceStatus::Running),
                    ("p-2", InstanceStatus::Failed),
                    ("p-3", InstanceStatus::Running),
                ]
            );
            assert_eq!(observer.container_count(), 3);
            anyhow::Ok(())
        })
        .await?;

    assert_eq!(mock.container_count(), 0);
    assert_eq!(mock.network_count(), 0);
    Ok(())
}

/// F024: An instance that died on its own is still cleaned up
///
/// # Falsification Attempt
/// Crash a container behind the cluster's back; if the status stays active
/// or the container survives the test, the claim is falsified.
#[tokio::test]
async fn f024_crashed_instance_is_cleaned_up() -> anyhow::Result<()> {
    let (harness, mock) = mock_harness("f024");
    let observer = Arc::clone(&mock);

    harness
        .run(|env| async move {
            let cluster = env.cluster().await?;
            let mut node = env.descriptor("node", 2000);
            cluster.run_instance(&mut node).await?;

            observer.crash(node.container_id().unwrap());
            assert_eq!(cluster.refresh_status(&node).await?, InstanceStatus::Stopped);
            assert!(cluster.host_port(&node).await.is_err());
            anyhow::Ok(())
        })
        .await?;

    assert_eq!(mock.container_count(), 0);
    assert_eq!(mock.network_count(), 0);
    Ok(())
}
