// Iron Lotus: Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # flota-test
//!
//! Testing infrastructure for Flota clusters.
//!
//! This crate provides:
//! - **Test harness**: one runtime, network manager and allocator per suite,
//!   and a fresh cleanup scope per test body
//! - **Logging**: an idempotent `tracing` subscriber for test binaries
//! - **Falsification tests**: refutation attempts against the cluster
//!   guarantees, run on the in-memory runtime and optionally on Docker
//!
//! ## Example
//!
//! ```rust,ignore
//! use flota_core::NetworkCondition;
//! use flota_test::{ClusterTestHarness, init_tracing};
//!
//! init_tracing();
//! let harness = ClusterTestHarness::new();
//!
//! harness.run(|env| async move {
//!     let cluster = env.cluster().await?;
//!     let mut nodes = vec![env.descriptor("node", 2000), env.descriptor("node", 2000)];
//!     cluster.run_instances(&mut nodes, true).await?;
//!
//!     let lossy = NetworkCondition::builder().loss(10.0).build()?;
//!     cluster.conditions().apply(&nodes[0], &lossy, "eth0", env.cancel_token()).await?;
//!     Ok::<_, flota_test::TestError>(())
//! }).await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod harness;
pub mod logging;

pub use error::{Result, TestError};
pub use harness::{ClusterTestHarness, ClusterTestHarnessBuilder, TestEnv, docker_available};
pub use logging::init_tracing;
