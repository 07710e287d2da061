//! Flota: Ephemeral Container Clusters for Black-Box Protocol Tests
//!
//! Stands up a throwaway, networked cluster of service instances, degrades
//! individual links with `tc netem`, and tears everything down again.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use flota::prelude::*;
//!
//! // Re-exports from sub-crates for convenience
//! ```

pub use flota_core as core;
pub use flota_docker as docker;

/// Prelude module for common imports.
pub mod prelude {
    pub use flota_core::{
        CleanupReport, CleanupScope, Cluster, ClusterConfig, FlotaError, InstanceDescriptor,
        InstanceId, InstanceStatus, NetemInjector, NetworkCondition, NetworkManager,
        RuntimeAdapter, SuiteAllocator,
    };
    pub use flota_docker::{DockerAdapter, DockerConfig};
}
