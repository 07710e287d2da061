//! Falsification Tests: Category A - Virtual Network (F001-F005)

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use flota_core::{MockRuntime, NetworkManager, SuiteAllocator};
use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

use super::mock_harness;

// =============================================================================
// F001-F003: Idempotency and ownership
// =============================================================================

/// F001: Ensuring the same network twice yields one network
///
/// # Falsification Attempt
/// Ensure "net-a" twice; if two networks exist or the IDs differ, the claim
/// is falsified.
#[tokio::test]
async fn f001_ensure_twice_yields_one_network() -> anyhow::Result<()> {
    let mock = Arc::new(MockRuntime::new());
    let manager = NetworkManager::new(mock.clone());
    let cancel = CancellationToken::new();
    let labels = HashMap::new();

    let first = manager.ensure("net-a", "bridge", &labels, &cancel).await?;
    let second = manager.ensure("net-a", "bridge", &labels, &cancel).await?;

    assert_eq!(first.id(), second.id());
    assert_eq!(mock.networks_named("net-a"), 1);
    assert_eq!(mock.calls_to("create_network"), 1);

    manager.release(first).await?;
    assert_eq!(mock.networks_named("net-a"), 1, "second lease still held");
    manager.release(second).await?;
    assert_eq!(mock.networks_named("net-a"), 0);
    Ok(())
}

/// F002: Concurrent clusters on one name share one network
///
/// # Falsification Attempt
/// Create two clusters on "shared" at the same time; if they see different
/// network IDs, the claim is falsified.
#[tokio::test]
async fn f002_concurrent_clusters_share_network() -> anyhow::Result<()> {
    let (harness, mock) = mock_harness("f002");
    let observer = Arc::clone(&mock);

    harness
        .run(|env| async move {
            let (a, b) = futures::join!(env.cluster_on("shared"), env.cluster_on("shared"));
            let (a, b) = (a?, b?);
            assert_eq!(a.network_id(), b.network_id());
            assert_eq!(observer.networks_named("shared"), 1);
            assert_eq!(env.networks().holders("shared").await, 2);
            anyhow::Ok(())
        })
        .await?;

    assert_eq!(mock.networks_named("shared"), 0);
    Ok(())
}

/// F003: A network we did not create is never removed
///
/// # Falsification Attempt
/// Seed "external" on the runtime, run a cluster on it, end the test; if the
/// network is gone, the claim is falsified.
#[tokio::test]
async fn f003_foreign_network_survives_cleanup() -> anyhow::Result<()> {
    let (harness, mock) = mock_harness("f003");
    let seeded = mock.seed_network("external");

    harness
        .run(|env| async move {
            let cluster = env.cluster_on("external").await?;
            assert_eq!(cluster.network_id(), seeded);
            let mut node = env.descriptor("node", 2000);
            cluster.run_instance(&mut node).await?;
            anyhow::Ok(())
        })
        .await?;

    assert_eq!(mock.networks_named("external"), 1);
    assert_eq!(mock.container_count(), 0);
    assert_eq!(mock.calls_to("remove_network"), 0);
    Ok(())
}

// =============================================================================
// F004-F005: Suite-unique names
// =============================================================================

/// F004: Independent suites never pick the same network name
///
/// # Falsification Attempt
/// Draw a network name from each of 100 fresh allocators; any duplicate
/// falsifies the claim.
#[test]
fn f004_suites_get_distinct_network_names() {
    let names: HashSet<String> = (0..100)
        .map(|_| SuiteAllocator::new().network_name("flota-net"))
        .collect();
    assert_eq!(names.len(), 100);
}

proptest! {
    /// F005: One allocator never repeats a name
    ///
    /// # Falsification Attempt
    /// Interleave network and instance draws; any repeat falsifies the claim.
    #[test]
    fn f005_allocator_never_repeats(prefix in "[a-z]{1,8}", draws in 1usize..64) {
        let allocator = SuiteAllocator::with_tag("p");
        let mut seen = HashSet::new();
        for _ in 0..draws {
            let network = allocator.network_name(&prefix);
            let instance = allocator.instance_name(&prefix);
            let expected = format!("{prefix}-p-");
            prop_assert!(network.starts_with(&expected));
            prop_assert!(seen.insert(network));
            prop_assert!(seen.insert(instance));
        }
    }
}
