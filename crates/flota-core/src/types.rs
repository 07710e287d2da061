//! Core identifier and state types.
//!
//! UUIDs give instances stable identities that survive container restarts
//! and re-launches under the same human-readable name.

use serde::{Deserialize, Serialize};

/// Unique logical identifier for an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(uuid::Uuid);

impl InstanceId {
    /// Creates a new random instance ID.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Creates an instance ID from a UUID.
    #[must_use]
    pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }

    /// Returns the first eight hex digits, used in container names.
    #[must_use]
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Instance lifecycle state as tracked by the cluster.
///
/// ```text
/// Created → Running → Stopped → Removed
///    ↓         ↓
///  Failed ←────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceStatus {
    /// Container exists but has not been started or inspected.
    Created,
    /// Container is running and its address is known.
    Running,
    /// Container was stopped.
    Stopped,
    /// Container was removed from the runtime.
    Removed,
    /// A launch step failed; the container may still exist.
    Failed,
}

impl InstanceStatus {
    /// Returns true if the instance is running.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Returns true if nothing remains on the runtime for this instance.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Removed)
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Running => "active",
            Self::Stopped => "stopped",
            Self::Removed => "removed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}
