//! Falsification Tests: Category D - Network Conditions (F016-F021)

use std::sync::Arc;
use std::time::Duration;

use flota_core::{ClusterConfig, FlotaError, MockRuntime, NetworkCondition};
use flota_test::ClusterTestHarness;
use proptest::prelude::*;

use super::mock_harness;

// =============================================================================
// F016-F018: Replacement semantics
// =============================================================================

/// F016: A new condition replaces the old one instead of stacking on it
///
/// # Falsification Attempt
/// Apply 10% loss, then a 256kbit cap; if any loss rule survives, the claim
/// is falsified.
#[tokio::test]
async fn f016_condition_replaces_previous() -> anyhow::Result<()> {
    let (harness, mock) = mock_harness("f016");
    let observer = Arc::clone(&mock);

    harness
        .run(|env| async move {
            let cluster = env.cluster().await?;
            let mut node = env.descriptor("node", 2000);
            cluster.run_instance(&mut node).await?;
            let injector = cluster.conditions();
            let cid = node.container_id().unwrap().to_string();

            let lossy = NetworkCondition::builder().loss(10.0).build()?;
            injector.apply(&node, &lossy, "eth0", env.cancel_token()).await?;
            assert!(observer.qdiscs(&cid, "eth0").iter().any(|r| r.contains("loss 10%")));

            let capped = NetworkCondition::builder().bandwidth("256kbit").build()?;
            injector.apply(&node, &capped, "eth0", env.cancel_token()).await?;
            let rules = observer.qdiscs(&cid, "eth0");
            assert!(rules.iter().all(|r| !r.contains("loss")), "stale rules: {rules:?}");
            assert!(rules.iter().any(|r| r.contains("tbf rate 256kbit")));

            let shown = injector.rules(&node, "eth0", env.cancel_token()).await?;
            assert!(!shown.contains("loss"));
            assert!(shown.contains("256kbit"));
            anyhow::Ok(())
        })
        .await
}

/// F017: Clearing leaves the link with no rules
///
/// # Falsification Attempt
/// Apply delay with jitter, then clear; any remaining discipline falsifies
/// the claim.
#[tokio::test]
async fn f017_clear_restores_clean_link() -> anyhow::Result<()> {
    let (harness, mock) = mock_harness("f017");
    let observer = Arc::clone(&mock);

    harness
        .run(|env| async move {
            let cluster = env.cluster().await?;
            let mut node = env.descriptor("node", 2000);
            cluster.run_instance(&mut node).await?;
            let injector = cluster.conditions();

            let slow = NetworkCondition::builder().delay_ms(100).jitter_ms(20).build()?;
            injector.apply(&node, &slow, "eth0", env.cancel_token()).await?;
            injector.clear(&node, "eth0", env.cancel_token()).await?;
            // Clearing an already clean link is fine too.
            injector.clear(&node, "eth0", env.cancel_token()).await?;

            assert!(observer.qdiscs(node.container_id().unwrap(), "eth0").is_empty());
            let shown = injector.rules(&node, "eth0", env.cancel_token()).await?;
            assert!(shown.contains("noqueue"));
            anyhow::Ok(())
        })
        .await
}

/// F018: A condition touches only the interface it names
///
/// # Falsification Attempt
/// Degrade `lo`; any rule on `eth0` falsifies the claim.
#[tokio::test]
async fn f018_condition_is_scoped_to_interface() -> anyhow::Result<()> {
    let (harness, mock) = mock_harness("f018");
    let observer = Arc::clone(&mock);

    harness
        .run(|env| async move {
            let cluster = env.cluster().await?;
            let mut node = env.descriptor("node", 2000);
            cluster.run_instance(&mut node).await?;

            let dup = NetworkCondition::builder().duplicate(5.0).build()?;
            cluster
                .conditions()
                .apply(&node, &dup, "lo", env.cancel_token())
                .await?;

            let cid = node.container_id().unwrap();
            assert!(observer.qdiscs(cid, "eth0").is_empty());
            assert!(observer.qdiscs(cid, "lo").iter().any(|r| r.contains("duplicate 5%")));
            anyhow::Ok(())
        })
        .await
}

// =============================================================================
// F019-F020: Failure handling
// =============================================================================

/// F019: A half-installed condition is rolled back
///
/// # Falsification Attempt
/// Make the rate limiter step fail; if the netem rule stays behind, the
/// claim is falsified.
#[tokio::test]
async fn f019_failed_apply_leaves_link_clean() -> anyhow::Result<()> {
    let (harness, mock) = mock_harness("f019");
    mock.fail_exec_matching("tbf");
    let observer = Arc::clone(&mock);

    harness
        .run(|env| async move {
            let cluster = env.cluster().await?;
            let mut node = env.descriptor("node", 2000);
            cluster.run_instance(&mut node).await?;

            let both = NetworkCondition::builder()
                .loss(2.5)
                .bandwidth("1mbit")
                .build()?;
            let err = cluster
                .conditions()
                .apply(&node, &both, "eth0", env.cancel_token())
                .await
                .unwrap_err();
            assert!(matches!(err, FlotaError::NetworkConditionApplyFailed { .. }));
            assert!(observer.qdiscs(node.container_id().unwrap(), "eth0").is_empty());
            anyhow::Ok(())
        })
        .await
}

/// F020: Without NET_ADMIN conditions fail loudly
///
/// # Falsification Attempt
/// Launch without the capability and apply loss; success falsifies the
/// claim.
#[tokio::test]
async fn f020_missing_capability_is_reported() -> anyhow::Result<()> {
    let mock = Arc::new(MockRuntime::new());
    let mut config = ClusterConfig::new("svc:test");
    config.net_admin = false;
    let harness = ClusterTestHarness::builder()
        .with_runtime(mock.clone())
        .with_config(config)
        .with_release_timeout(Duration::from_millis(500))
        .build();

    harness
        .run(|env| async move {
            let cluster = env.cluster().await?;
            let mut node = env.descriptor("node", 2000);
            cluster.run_instance(&mut node).await?;

            let lossy = NetworkCondition::builder().loss(10.0).build()?;
            let err = cluster
                .conditions()
                .apply(&node, &lossy, "eth0", env.cancel_token())
                .await
                .unwrap_err();
            assert!(err.to_string().contains("Operation not permitted"), "{err}");
            anyhow::Ok(())
        })
        .await?;

    assert_eq!(mock.container_count(), 0);
    Ok(())
}

// =============================================================================
// F021: Validation
// =============================================================================

proptest! {
    /// F021: Percentages outside [0, 100] never reach a link
    ///
    /// # Falsification Attempt
    /// Build conditions from arbitrary loss values; an out-of-range value
    /// that builds, or an in-range value that is rejected, falsifies the
    /// claim.
    #[test]
    fn f021_loss_range_is_enforced(loss in -1000.0f64..1000.0) {
        let built = NetworkCondition::builder().loss(loss).build();
        if (0.0..=100.0).contains(&loss) {
            let condition = built.unwrap();
            let args = condition.netem_args("eth0");
            let expected = format!("{loss}%");
            prop_assert!(args.contains(&expected));
        } else {
            prop_assert!(matches!(built, Err(FlotaError::InvalidCondition(_))));
        }
    }
}
