//! Error types for flota-core.
//!
//! Every failure names the step that failed and the resource (network name,
//! instance name, container ID) it was operating on.

use crate::runtime::RuntimeError;

/// Result type alias for cluster operations.
pub type Result<T> = std::result::Result<T, FlotaError>;

/// Comprehensive error type for cluster orchestration.
#[derive(Debug, thiserror::Error)]
pub enum FlotaError {
    /// Configuration was rejected at load or construction time.
    #[error("configuration error: {0}")]
    Config(String),

    /// A network condition failed validation.
    #[error("invalid network condition: {0}")]
    InvalidCondition(String),

    /// Querying the runtime (image presence, container state) failed.
    #[error("runtime query failed for {resource}: {source}")]
    RuntimeQueryFailed {
        /// Image, container or instance the query was about.
        resource: String,
        /// Underlying runtime error.
        source: RuntimeError,
    },

    /// Container creation failed (launch step 1).
    #[error("create failed for instance {instance}: {source}")]
    RuntimeCreateFailed {
        /// Descriptor name.
        instance: String,
        /// Underlying runtime error.
        source: RuntimeError,
    },

    /// Container start failed (launch step 2).
    #[error("start failed for instance {instance} (container {container_id}): {source}")]
    RuntimeStartFailed {
        /// Descriptor name.
        instance: String,
        /// The created container, still present on the runtime.
        container_id: String,
        /// Underlying runtime error.
        source: RuntimeError,
    },

    /// Container inspection failed (launch step 3, or a status refresh).
    #[error("inspect failed for instance {instance} (container {container_id}): {reason}")]
    RuntimeInspectFailed {
        /// Descriptor name.
        instance: String,
        /// The inspected container.
        container_id: String,
        /// What went wrong.
        reason: String,
    },

    /// Graceful stop failed.
    #[error("stop failed for container {container_id}: {source}")]
    RuntimeStopFailed {
        /// Container being stopped.
        container_id: String,
        /// Underlying runtime error.
        source: RuntimeError,
    },

    /// Container removal failed.
    #[error("remove failed for container {container_id}: {source}")]
    RuntimeRemoveFailed {
        /// Container being removed.
        container_id: String,
        /// Underlying runtime error.
        source: RuntimeError,
    },

    /// Listing networks failed.
    #[error("network query failed for {network}: {source}")]
    NetworkQueryFailed {
        /// Network name.
        network: String,
        /// Underlying runtime error.
        source: RuntimeError,
    },

    /// Creating the virtual network failed.
    #[error("network create failed for {network}: {source}")]
    NetworkCreateFailed {
        /// Network name.
        network: String,
        /// Underlying runtime error.
        source: RuntimeError,
    },

    /// Removing the virtual network failed.
    #[error("network remove failed for {network} ({network_id}): {source}")]
    NetworkRemoveFailed {
        /// Network name.
        network: String,
        /// Runtime network ID.
        network_id: String,
        /// Underlying runtime error.
        source: RuntimeError,
    },

    /// Installing or clearing traffic-control rules failed.
    #[error("network condition apply failed on {interface} of container {container_id}: {reason}")]
    NetworkConditionApplyFailed {
        /// Container the rules target.
        container_id: String,
        /// Interface inside the container.
        interface: String,
        /// Command output or runtime error.
        reason: String,
    },

    /// The descriptor has not been launched yet.
    #[error("instance {name} has not been launched")]
    NotLaunched {
        /// Descriptor name.
        name: String,
    },

    /// The descriptor was already assigned an address and container.
    #[error("instance {name} was already launched")]
    AlreadyAssigned {
        /// Descriptor name.
        name: String,
    },

    /// The caller's cancellation token fired.
    #[error("operation cancelled: {operation}")]
    Cancelled {
        /// The operation that was interrupted.
        operation: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FlotaError {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a network condition validation error.
    #[must_use]
    pub fn invalid_condition(msg: impl Into<String>) -> Self {
        Self::InvalidCondition(msg.into())
    }

    /// Creates a cancellation error.
    #[must_use]
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Returns the container left behind by a failed launch, if any.
    ///
    /// A launch that fails after create has still produced a container; the
    /// cluster keeps tracking it so cleanup can remove it.
    #[must_use]
    pub fn leftover_container(&self) -> Option<&str> {
        match self {
            Self::RuntimeStartFailed { container_id, .. }
            | Self::RuntimeInspectFailed { container_id, .. } => Some(container_id),
            _ => None,
        }
    }

    /// Returns true if the error came from the caller's cancellation token.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
