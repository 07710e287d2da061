//! Falsification Tests: Category C - Cleanup Totality (F011-F015, F026-F027)
//!
//! Whatever a test acquires is released exactly once, whether the test
//! passes, fails an assertion, tears part of the cluster down itself or is
//! abandoned halfway through a launch.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use flota_core::{InstanceDescriptor, InstanceStatus};
use flota_test::TestError;
use futures::FutureExt;

use super::mock_harness;

fn position(calls: &[String], call: &str) -> usize {
    calls
        .iter()
        .position(|c| c == call)
        .unwrap_or_else(|| panic!("{call} was never made"))
}

// =============================================================================
// F011-F012: Every outcome tears down
// =============================================================================

/// F011: A failed assertion still removes instances and network
///
/// # Falsification Attempt
/// Panic inside the test body after launching two instances; any leftover
/// container or network falsifies the claim.
#[tokio::test]
async fn f011_cleanup_survives_failed_assertion() {
    let (harness, mock) = mock_harness("f011");
    let observer = Arc::clone(&mock);

    let outcome = AssertUnwindSafe(harness.run(|env| async move {
        let cluster = env.cluster().await.unwrap();
        let mut nodes = vec![env.descriptor("node", 2000), env.descriptor("node", 2000)];
        cluster.run_instances(&mut nodes, true).await.unwrap();
        assert_eq!(observer.running_count(), 2);
        assert_eq!(nodes.len(), 3, "deliberately failing assertion");
    }))
    .catch_unwind()
    .await;

    let payload = outcome.expect_err("the panic must reach the caller");
    let message = payload
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| payload.downcast_ref::<&str>().copied())
        .unwrap_or_default();
    assert!(message.contains("deliberately failing assertion"), "unexpected panic: {message}");
    assert_eq!(mock.container_count(), 0);
    assert_eq!(mock.network_count(), 0);
}

/// F012: Stopping an instance mid-test does not release it twice
///
/// # Falsification Attempt
/// Stop one of two instances explicitly, then end the test; more than one
/// removal per container falsifies the claim.
#[tokio::test]
async fn f012_explicit_stop_is_not_repeated() -> anyhow::Result<()> {
    let (harness, mock) = mock_harness("f012");
    let observer = Arc::clone(&mock);

    harness
        .run(|env| async move {
            let cluster = env.cluster().await?;
            let mut nodes = vec![env.descriptor("node", 2000), env.descriptor("node", 2000)];
            cluster.run_instances(&mut nodes, true).await?;

            cluster.stop_instance(&nodes[0]).await?;
            assert_eq!(cluster.status(nodes[0].id()).await, Some(InstanceStatus::Removed));
            assert_eq!(observer.container_count(), 1);
            anyhow::Ok(())
        })
        .await?;

    assert_eq!(mock.container_count(), 0);
    assert_eq!(mock.network_count(), 0);
    assert_eq!(mock.calls_to("stop_container"), 2);
    assert_eq!(mock.calls_to("remove_container"), 2);
    Ok(())
}

// =============================================================================
// F013-F015: Release ordering and isolation
// =============================================================================

/// F013: One failing release does not stop the others
///
/// # Falsification Attempt
/// Make removal of "stuck" fail; if "free" is left behind, the claim is
/// falsified.
#[tokio::test]
async fn f013_failed_release_does_not_block_others() -> anyhow::Result<()> {
    let (harness, mock) = mock_harness("f013");
    mock.fail_remove("stuck");

    harness
        .run(|env| async move {
            let cluster = env.cluster().await?;
            let mut nodes = vec![
                InstanceDescriptor::new("free", 2000),
                InstanceDescriptor::new("stuck", 2000),
            ];
            cluster.run_instances(&mut nodes, false).await?;
            anyhow::Ok(())
        })
        .await?;

    assert_eq!(mock.container_names().len(), 1);
    assert!(mock.container_names()[0].contains("-stuck-"));
    // The network still has an endpoint, so the runtime refuses to drop it.
    assert_eq!(mock.network_count(), 1);
    assert_eq!(mock.calls_to("remove_network"), 1);
    Ok(())
}

/// F014: Resources are released newest first
///
/// # Falsification Attempt
/// Launch "first" then "second"; if "first" is removed before "second", or
/// the network before either, the claim is falsified.
#[tokio::test]
async fn f014_release_order_is_reversed() -> anyhow::Result<()> {
    let (harness, mock) = mock_harness("f014");

    let (first_id, second_id, network_id) = harness
        .run(|env| async move {
            let cluster = env.cluster().await?;
            let mut nodes = vec![
                InstanceDescriptor::new("first", 2000),
                InstanceDescriptor::new("second", 2000),
            ];
            cluster.run_instances(&mut nodes, false).await?;
            anyhow::Ok((
                nodes[0].container_id().unwrap().to_string(),
                nodes[1].container_id().unwrap().to_string(),
                cluster.network_id().to_string(),
            ))
        })
        .await?;

    let calls = mock.calls();
    let second = position(&calls, &format!("remove_container {second_id}"));
    let first = position(&calls, &format!("remove_container {first_id}"));
    let network = position(&calls, &format!("remove_network {network_id}"));
    assert!(second < first);
    assert!(first < network);
    assert_eq!(mock.network_count(), 0);
    Ok(())
}

/// F015: A hanging release is cut off by the release timeout
///
/// # Falsification Attempt
/// Make stopping "hang" never return; if cleanup takes far longer than the
/// release timeout or skips "ok", the claim is falsified.
#[tokio::test]
async fn f015_hanging_release_is_bounded() -> anyhow::Result<()> {
    let (harness, mock) = mock_harness("f015");
    mock.stall_stop("hang");
    let started = Instant::now();

    harness
        .run(|env| async move {
            let cluster = env.cluster().await?;
            let mut nodes = vec![
                InstanceDescriptor::new("ok", 2000),
                InstanceDescriptor::new("hang", 2000),
            ];
            cluster.run_instances(&mut nodes, true).await?;
            anyhow::Ok(())
        })
        .await?;

    assert!(started.elapsed() < Duration::from_secs(5));
    let left = mock.container_names();
    assert_eq!(left.len(), 1);
    assert!(left[0].contains("-hang-"));
    Ok(())
}

// =============================================================================
// F026-F027: Abandoned launches
// =============================================================================

/// F026: A test timing out while a container starts leaves nothing behind
///
/// # Falsification Attempt
/// Hang the start of "slow" and let the harness time the body out; the
/// created container or the network surviving falsifies the claim.
#[tokio::test]
async fn f026_timeout_during_start_is_cleaned_up() {
    let (harness, mock) = mock_harness("f026");
    mock.stall_start("slow");

    let result = harness
        .run_with_timeout(Duration::from_millis(50), |env| async move {
            let cluster = env.cluster().await?;
            let mut node = env.descriptor("slow", 2000);
            cluster.run_instance(&mut node).await?;
            Ok::<_, TestError>(())
        })
        .await;

    assert!(matches!(result, Err(TestError::Timeout(_))));
    assert_eq!(mock.calls_to("start_container"), 1);
    assert!(mock.container_names().is_empty(), "container leaked: {:?}", mock.container_names());
    assert_eq!(mock.network_count(), 0);
}

/// F027: A create whose reply never arrives is still cleaned up by name
///
/// # Falsification Attempt
/// The runtime creates "lost" but never answers; without an ID the only
/// handle left is the container name. A surviving container or network
/// falsifies the claim.
#[tokio::test]
async fn f027_timeout_during_create_is_cleaned_up() {
    let (harness, mock) = mock_harness("f027");
    mock.stall_create("lost");

    let result = harness
        .run_with_timeout(Duration::from_millis(50), |env| async move {
            let cluster = env.cluster().await?;
            let mut node = env.descriptor("lost", 2000);
            cluster.run_instance(&mut node).await?;
            Ok::<_, TestError>(())
        })
        .await;

    assert!(matches!(result, Err(TestError::Timeout(_))));
    let removals: Vec<String> = mock
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("remove_container flota-lost-"))
        .collect();
    assert_eq!(removals.len(), 1, "calls: {:?}", mock.calls());
    assert!(mock.container_names().is_empty(), "container leaked: {:?}", mock.container_names());
    assert_eq!(mock.network_count(), 0);
}
