//! Instance descriptors.
//!
//! A descriptor is what a test hands to the cluster to launch one node. The
//! runtime-assigned address and container ID are written back exactly once,
//! after the container has been started and inspected.

use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};

use crate::error::{FlotaError, Result};
use crate::types::InstanceId;

/// Environment variable carrying the listen address.
pub const LISTEN_ADDRESS_ENV: &str = "LISTEN_ADDRESS";

/// Environment variable carrying the listen port.
pub const LISTEN_PORT_ENV: &str = "LISTEN_PORT";

/// One `KEY=VALUE` assignment injected into the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    /// Variable name.
    pub key: String,
    /// Variable value, injected verbatim.
    pub value: String,
}

impl EnvVar {
    /// Renders the assignment as `KEY=VALUE`.
    #[must_use]
    pub fn render(&self) -> String {
        format!("{}={}", self.key, self.value)
    }
}

/// Runtime facts learned when the container was inspected after start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    /// Address on the cluster's virtual network.
    pub address: IpAddr,
    /// Runtime container ID.
    pub container_id: String,
}

/// Description of a single logical node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDescriptor {
    id: InstanceId,
    name: String,
    bind_host: IpAddr,
    bind_port: u16,
    env: Vec<EnvVar>,
    assignment: Option<Assignment>,
}

impl InstanceDescriptor {
    /// Creates a descriptor listening on `0.0.0.0:<bind_port>`.
    ///
    /// `LISTEN_ADDRESS` and `LISTEN_PORT` are seeded so the service binds the
    /// port the cluster exposes.
    #[must_use]
    pub fn new(name: impl Into<String>, bind_port: u16) -> Self {
        let bind_host = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
        Self {
            id: InstanceId::new(),
            name: name.into(),
            bind_host,
            bind_port,
            env: vec![
                EnvVar {
                    key: LISTEN_ADDRESS_ENV.to_string(),
                    value: bind_host.to_string(),
                },
                EnvVar {
                    key: LISTEN_PORT_ENV.to_string(),
                    value: bind_port.to_string(),
                },
            ],
            assignment: None,
        }
    }

    /// Appends an environment assignment.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push(EnvVar {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Returns a fresh, unlaunched descriptor with the same name, port and
    /// environment but a new ID.
    ///
    /// Used to bring a node back after it was stopped mid-test.
    #[must_use]
    pub fn respawn(&self) -> Self {
        Self {
            id: InstanceId::new(),
            name: self.name.clone(),
            bind_host: self.bind_host,
            bind_port: self.bind_port,
            env: self.env.clone(),
            assignment: None,
        }
    }

    /// Returns the logical ID.
    #[must_use]
    pub const fn id(&self) -> InstanceId {
        self.id
    }

    /// Returns the human-readable name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the bind host (always the wildcard address).
    #[must_use]
    pub const fn bind_host(&self) -> IpAddr {
        self.bind_host
    }

    /// Returns the bind port.
    #[must_use]
    pub const fn bind_port(&self) -> u16 {
        self.bind_port
    }

    /// Returns the environment assignments in injection order.
    #[must_use]
    pub fn env(&self) -> &[EnvVar] {
        &self.env
    }

    /// Renders the environment as `KEY=VALUE` strings.
    #[must_use]
    pub fn rendered_env(&self) -> Vec<String> {
        self.env.iter().map(EnvVar::render).collect()
    }

    /// Returns the network address, once launched.
    #[must_use]
    pub fn address(&self) -> Option<IpAddr> {
        self.assignment.as_ref().map(|a| a.address)
    }

    /// Returns the container ID, once launched.
    #[must_use]
    pub fn container_id(&self) -> Option<&str> {
        self.assignment.as_ref().map(|a| a.container_id.as_str())
    }

    /// Returns the full assignment, once launched.
    #[must_use]
    pub const fn assignment(&self) -> Option<&Assignment> {
        self.assignment.as_ref()
    }

    /// Returns true once the address and container ID are known.
    #[must_use]
    pub const fn is_launched(&self) -> bool {
        self.assignment.is_some()
    }

    /// Returns the assignment or a `NotLaunched` error.
    ///
    /// # Errors
    /// Returns an error if the descriptor has not been launched.
    pub fn require_assignment(&self) -> Result<&Assignment> {
        self.assignment.as_ref().ok_or_else(|| FlotaError::NotLaunched {
            name: self.name.clone(),
        })
    }

    /// Records the runtime assignment. Write-once.
    pub(crate) fn assign(&mut self, address: IpAddr, container_id: String) -> Result<()> {
        if self.assignment.is_some() {
            return Err(FlotaError::AlreadyAssigned {
                name: self.name.clone(),
            });
        }
        self.assignment = Some(Assignment {
            address,
            container_id,
        });
        Ok(())
    }
}
