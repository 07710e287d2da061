//! Container runtime adapter abstraction.
//!
//! Every component talks to the container engine through [`RuntimeAdapter`].
//! The production implementation lives in `flota-docker`; an in-memory double
//! lives in [`crate::mock`].

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// =============================================================================
// RuntimeError
// =============================================================================

/// Error reported by a runtime adapter.
///
/// Adapters classify engine responses into these kinds so the core can treat
/// "already stopped" and "already gone" as success during teardown.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    /// The object does not exist (HTTP 404).
    #[error("not found: {0}")]
    NotFound(String),

    /// The object was already in the requested state (HTTP 304).
    #[error("not modified: {0}")]
    NotModified(String),

    /// The request conflicts with existing state (HTTP 409).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The engine could not be reached.
    #[error("runtime unavailable: {0}")]
    Unavailable(String),

    /// Any other engine failure.
    #[error("{0}")]
    Other(String),
}

impl RuntimeError {
    /// Returns true for "no such object" responses.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns true for "already in that state" responses.
    #[must_use]
    pub const fn is_not_modified(&self) -> bool {
        matches!(self, Self::NotModified(_))
    }
}

/// Result type for adapter calls.
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

// =============================================================================
// Request / response types
// =============================================================================

/// A virtual network as listed by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSummary {
    /// Runtime network ID.
    pub id: String,
    /// Network name.
    pub name: String,
}

/// Everything the runtime needs to create one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Environment assignments, `KEY=VALUE`, in injection order.
    pub env: Vec<String>,
    /// Container port exposed over TCP.
    pub exposed_port: u16,
    /// Host IP the exposed port is published on.
    pub host_ip: String,
    /// Host port to bind; `0` asks the OS for an ephemeral port.
    pub host_port: u16,
    /// Name of the network to attach to.
    pub network: String,
    /// Capabilities to add (e.g. `NET_ADMIN`).
    pub cap_add: Vec<String>,
    /// Container labels.
    pub labels: HashMap<String, String>,
}

/// Attachment of a container to one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkEndpoint {
    /// Runtime network ID.
    pub network_id: String,
    /// Address assigned on that network, if any.
    pub ip_address: Option<IpAddr>,
}

/// Result of inspecting a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDetails {
    /// Container ID.
    pub id: String,
    /// Whether the container's process is running.
    pub running: bool,
    /// Endpoints keyed by network name.
    pub networks: HashMap<String, NetworkEndpoint>,
    /// Published host ports keyed by container port.
    pub host_ports: HashMap<u16, u16>,
}

impl ContainerDetails {
    /// Returns the address assigned on the named network.
    #[must_use]
    pub fn address_on(&self, network: &str) -> Option<IpAddr> {
        self.networks.get(network).and_then(|ep| ep.ip_address)
    }
}

/// Output of a command executed inside a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    /// Exit code; `None` when the runtime did not report one.
    pub exit_code: Option<i64>,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
}

impl ExecOutput {
    /// Returns true if the command exited with status 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

// =============================================================================
// RuntimeAdapter
// =============================================================================

/// Container engine management API.
///
/// Implementations must be safe to call concurrently; every call touches
/// exactly the object it names.
#[async_trait]
pub trait RuntimeAdapter: Send + Sync {
    /// Returns the runtime name (e.g. "docker", "mock").
    fn name(&self) -> &'static str;

    /// Checks that the engine is reachable.
    async fn ping(&self) -> RuntimeResult<()>;

    /// Makes sure the image is present locally, pulling it if needed.
    async fn ensure_image(&self, image: &str) -> RuntimeResult<()>;

    /// Lists networks whose name matches `name`.
    ///
    /// Engines may match by substring; callers must compare names exactly.
    async fn list_networks(&self, name: &str) -> RuntimeResult<Vec<NetworkSummary>>;

    /// Creates a network and returns its ID.
    async fn create_network(
        &self,
        name: &str,
        driver: &str,
        labels: &HashMap<String, String>,
    ) -> RuntimeResult<String>;

    /// Removes a network by ID.
    async fn remove_network(&self, id: &str) -> RuntimeResult<()>;

    /// Creates a container and returns its ID.
    async fn create_container(&self, spec: &ContainerSpec) -> RuntimeResult<String>;

    /// Starts a created container.
    async fn start_container(&self, id: &str) -> RuntimeResult<()>;

    /// Inspects a container.
    async fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerDetails>;

    /// Stops a container, waiting up to `grace` before killing it.
    async fn stop_container(&self, id: &str, grace: Duration) -> RuntimeResult<()>;

    /// Removes a container (forced, with anonymous volumes).
    async fn remove_container(&self, id: &str) -> RuntimeResult<()>;

    /// Runs a command inside a running container and collects its output.
    async fn exec(&self, id: &str, cmd: &[String]) -> RuntimeResult<ExecOutput>;
}
