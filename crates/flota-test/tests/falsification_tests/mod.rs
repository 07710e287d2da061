//! Popperian Falsification Tests for Flota
//!
//! Categories:
//! - A: Virtual network (F001-F005)
//! - B: Instance lifecycle (F006-F010)
//! - C: Cleanup totality (F011-F015, F026-F027)
//! - D: Network conditions (F016-F021)
//! - E: Scenarios (F022-F024)
//! - F: Docker (F025, ignored by default)

// Allow test-specific patterns that are denied in production code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]
#![allow(clippy::needless_borrows_for_generic_args)]

mod cleanup;
mod conditions;
mod docker;
mod lifecycle;
mod network;
mod scenario;

use std::sync::Arc;
use std::time::Duration;

use flota_core::MockRuntime;
use flota_test::{ClusterTestHarness, init_tracing};

/// Harness over a fresh in-memory runtime, plus a handle to that runtime
/// for fault injection and inspection.
fn mock_harness(tag: &str) -> (ClusterTestHarness, Arc<MockRuntime>) {
    init_tracing();
    let mock = Arc::new(MockRuntime::new());
    let harness = ClusterTestHarness::builder()
        .with_runtime(mock.clone())
        .with_suite_tag(tag)
        .with_release_timeout(Duration::from_millis(500))
        .build();
    (harness, mock)
}
