//! Falsification Tests: Category B - Instance Lifecycle (F006-F010)

use std::collections::HashSet;
use std::sync::Arc;

use flota_core::{FlotaError, InstanceDescriptor, InstanceStatus};
use tokio_test::{assert_err, assert_ok};

use super::mock_harness;

// =============================================================================
// F006-F007: Address and port isolation
// =============================================================================

/// F006: Every launched instance gets its own non-empty address
///
/// # Falsification Attempt
/// Launch 8 instances concurrently; a missing or repeated address falsifies
/// the claim.
#[tokio::test]
async fn f006_launched_addresses_are_distinct() -> anyhow::Result<()> {
    let (harness, _mock) = mock_harness("f006");

    harness
        .run(|env| async move {
            let cluster = env.cluster().await?;
            let mut nodes: Vec<_> = (0..8).map(|_| env.descriptor("node", 2000)).collect();
            cluster.run_instances(&mut nodes, true).await?;

            let addresses: HashSet<_> = nodes.iter().filter_map(|n| n.address()).collect();
            assert_eq!(addresses.len(), nodes.len());
            assert!(addresses.iter().all(|a| !a.is_unspecified()));
            anyhow::Ok(())
        })
        .await
}

/// F007: Instances sharing an internal port get distinct host ports
///
/// # Falsification Attempt
/// Launch 5 instances all binding port 2000; a repeated host port falsifies
/// the claim.
#[tokio::test]
async fn f007_host_ports_are_distinct() -> anyhow::Result<()> {
    let (harness, mock) = mock_harness("f007");
    let observer = Arc::clone(&mock);

    harness
        .run(|env| async move {
            let cluster = env.cluster().await?;
            let mut nodes: Vec<_> = (0..5).map(|_| env.descriptor("node", 2000)).collect();
            cluster.run_instances(&mut nodes, true).await?;

            let mut ports = HashSet::new();
            for node in &nodes {
                let spec = observer
                    .container_spec(node.container_id().unwrap())
                    .unwrap();
                assert_eq!(spec.host_port, 0, "host port must be left to the runtime");
                assert!(ports.insert(cluster.host_port(node).await?));
            }
            anyhow::Ok(())
        })
        .await
}

// =============================================================================
// F008-F010: Launch contract
// =============================================================================

/// F008: Instances are told which address and port to listen on
///
/// # Falsification Attempt
/// Inspect the container environment; missing LISTEN_* variables falsify the
/// claim.
#[tokio::test]
async fn f008_listen_environment_is_injected() -> anyhow::Result<()> {
    let (harness, mock) = mock_harness("f008");
    let observer = Arc::clone(&mock);

    harness
        .run(|env| async move {
            let cluster = env.cluster().await?;
            let mut node = env.descriptor("node", 7400).with_env("ROLE", "leader");
            cluster.run_instance(&mut node).await?;

            let spec = observer.container_spec(node.container_id().unwrap()).unwrap();
            assert!(spec.env.contains(&"LISTEN_ADDRESS=0.0.0.0".to_string()));
            assert!(spec.env.contains(&"LISTEN_PORT=7400".to_string()));
            assert!(spec.env.contains(&"ROLE=leader".to_string()));
            assert_eq!(spec.exposed_port, 7400);
            anyhow::Ok(())
        })
        .await
}

/// F009: A sequential batch stops at the first failure
///
/// # Falsification Attempt
/// Fail the second of three sequential launches; if the third is created,
/// the claim is falsified.
#[tokio::test]
async fn f009_sequential_batch_short_circuits() -> anyhow::Result<()> {
    let (harness, mock) = mock_harness("f009");
    mock.fail_create("seq-b");
    let observer = Arc::clone(&mock);

    harness
        .run(|env| async move {
            let cluster = env.cluster().await?;
            let mut nodes = vec![
                InstanceDescriptor::new("seq-a", 2000),
                InstanceDescriptor::new("seq-b", 2000),
                InstanceDescriptor::new("seq-c", 2000),
            ];
            let err = assert_err!(cluster.run_instances(&mut nodes, false).await);
            assert!(matches!(err, FlotaError::RuntimeCreateFailed { ref instance, .. } if instance == "seq-b"));

            assert!(nodes[0].is_launched());
            assert!(!nodes[2].is_launched());
            assert_eq!(observer.calls_to("create_container"), 2);
            anyhow::Ok(())
        })
        .await?;

    assert_eq!(mock.container_count(), 0);
    Ok(())
}

/// F010: A descriptor cannot be launched twice
///
/// # Falsification Attempt
/// Launch the same descriptor again; success falsifies the claim.
#[tokio::test]
async fn f010_relaunch_is_rejected() -> anyhow::Result<()> {
    let (harness, mock) = mock_harness("f010");
    let observer = Arc::clone(&mock);

    harness
        .run(|env| async move {
            let cluster = env.cluster().await?;
            let mut node = env.descriptor("node", 2000);
            assert_ok!(cluster.run_instance(&mut node).await);
            let err = assert_err!(cluster.run_instance(&mut node).await);
            assert!(matches!(err, FlotaError::AlreadyAssigned { .. }));
            assert_eq!(observer.container_count(), 1);

            // A respawned copy is a new instance.
            let mut again = node.respawn();
            assert_ok!(cluster.run_instance(&mut again).await);
            assert_ne!(again.container_id(), node.container_id());
            assert_eq!(cluster.status(node.id()).await, Some(InstanceStatus::Running));
            anyhow::Ok(())
        })
        .await
}
