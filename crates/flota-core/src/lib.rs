// Iron Lotus: Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # flota-core
//!
//! Cluster orchestration and link fault injection for black-box protocol
//! tests.
//!
//! This crate provides the pieces a test needs to stand up a throwaway,
//! networked cluster of containerized service instances and tear it down
//! again no matter how the test ends:
//!
//! - [`RuntimeAdapter`] abstracts the container engine
//! - [`NetworkManager`] creates or reuses the virtual network
//! - [`InstanceLifecycle`] creates, starts, inspects, stops and removes containers
//! - [`Cluster`] launches batches of [`InstanceDescriptor`]s and tracks them
//! - [`NetemInjector`] degrades a single instance's link with `tc`
//! - [`CleanupScope`] releases everything exactly once, newest first
//!
//! ## Example
//!
//! ```rust,ignore
//! use flota_core::{CleanupScope, Cluster, ClusterConfig, InstanceDescriptor, NetworkCondition};
//!
//! let scope = CleanupScope::new(config.release_timeout);
//! scope.run(|scope| async move {
//!     let cluster = Cluster::new(runtime, &networks, config, &scope, cancel.clone()).await?;
//!     let mut nodes = vec![
//!         InstanceDescriptor::new("node-a", 2000),
//!         InstanceDescriptor::new("node-b", 2000),
//!     ];
//!     cluster.run_instances(&mut nodes, true).await?;
//!
//!     let lossy = NetworkCondition::builder().loss(10.0).build()?;
//!     cluster.conditions().apply(&nodes[1], &lossy, "eth0", &cancel).await?;
//!     Ok::<_, flota_core::FlotaError>(())
//! }).await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Allow significant_drop_tightening - overly aggressive for async code with locks
#![allow(clippy::significant_drop_tightening)]

pub mod allocator;
mod cancel;
pub mod cluster;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod lifecycle;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod netem;
pub mod network;
pub mod runtime;
pub mod scope;
pub mod types;

pub use allocator::SuiteAllocator;
pub use cluster::{Cluster, InstanceRecord};
pub use config::ClusterConfig;
pub use descriptor::{Assignment, EnvVar, InstanceDescriptor, LISTEN_ADDRESS_ENV, LISTEN_PORT_ENV};
pub use error::{FlotaError, Result};
pub use lifecycle::InstanceLifecycle;
#[cfg(any(test, feature = "mock"))]
pub use mock::MockRuntime;
pub use netem::{Bandwidth, NetemInjector, NetworkCondition, NetworkConditionBuilder, RateUnit};
pub use network::{NetworkLease, NetworkManager};
pub use runtime::{
    ContainerDetails, ContainerSpec, ExecOutput, NetworkEndpoint, NetworkSummary, RuntimeAdapter,
    RuntimeError, RuntimeResult,
};
pub use scope::{CleanupReport, CleanupScope};
pub use types::{InstanceId, InstanceStatus};
