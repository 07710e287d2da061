//! Virtual network management.
//!
//! Networks are looked up by exact name before being created, and handed out
//! as reference-counted leases. A network is removed only when the last lease
//! is released and this manager was the one that created it; networks found
//! already in place are never removed.
//!
//! The lookup-then-create sequence is serialized within one manager, but two
//! processes asking for the same name can still both create it. Use per-suite
//! names (see [`crate::allocator::SuiteAllocator::network_name`]) when suites
//! run concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cancel::until_cancelled;
use crate::error::{FlotaError, Result};
use crate::runtime::RuntimeAdapter;

/// A claim on a named virtual network.
///
/// Hand it back to [`NetworkManager::release`] exactly once.
#[derive(Debug, PartialEq, Eq)]
pub struct NetworkLease {
    name: String,
    id: String,
}

impl NetworkLease {
    /// Returns the network name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the runtime network ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug)]
struct LeaseEntry {
    id: String,
    holders: usize,
    created_here: bool,
}

/// Creates, shares and removes virtual networks.
pub struct NetworkManager {
    runtime: Arc<dyn RuntimeAdapter>,
    leases: Mutex<HashMap<String, LeaseEntry>>,
}

impl NetworkManager {
    /// Creates a manager issuing calls through `runtime`.
    #[must_use]
    pub fn new(runtime: Arc<dyn RuntimeAdapter>) -> Self {
        Self {
            runtime,
            leases: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the network ID for `name`, creating a bridged network if none
    /// exists.
    ///
    /// # Errors
    /// Returns `Config` for an empty name, `NetworkQueryFailed` or
    /// `NetworkCreateFailed` on runtime failures, or `Cancelled`.
    pub async fn ensure(
        &self,
        name: &str,
        driver: &str,
        labels: &HashMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<NetworkLease> {
        if name.is_empty() {
            return Err(FlotaError::config("network name cannot be empty"));
        }

        let mut leases = self.leases.lock().await;

        // An entry with no holders is one whose removal failed; it is only
        // still ours if the runtime lists the same ID.
        let retained = match leases.get_mut(name) {
            Some(entry) if entry.holders > 0 => {
                entry.holders += 1;
                debug!(network = %name, holders = entry.holders, "reusing leased network");
                return Ok(NetworkLease {
                    name: name.to_string(),
                    id: entry.id.clone(),
                });
            }
            Some(entry) if entry.created_here => Some(entry.id.clone()),
            _ => None,
        };

        let listed = until_cancelled(
            cancel,
            &format!("list networks {name}"),
            self.runtime.list_networks(name),
        )
        .await?
        .map_err(|source| FlotaError::NetworkQueryFailed {
            network: name.to_string(),
            source,
        })?;

        let (id, created_here) = if let Some(existing) = listed.into_iter().find(|n| n.name == name)
        {
            let ours = retained.as_deref() == Some(existing.id.as_str());
            debug!(network = %name, id = %existing.id, ours, "network already exists");
            (existing.id, ours)
        } else {
            let id = until_cancelled(
                cancel,
                &format!("create network {name}"),
                self.runtime.create_network(name, driver, labels),
            )
            .await?
            .map_err(|source| FlotaError::NetworkCreateFailed {
                network: name.to_string(),
                source,
            })?;
            info!(network = %name, id = %id, driver = %driver, "created network");
            (id, true)
        };

        leases.insert(
            name.to_string(),
            LeaseEntry {
                id: id.clone(),
                holders: 1,
                created_here,
            },
        );

        Ok(NetworkLease {
            name: name.to_string(),
            id,
        })
    }

    /// Gives a lease back, removing the network if it was the last one and
    /// this manager created it.
    ///
    /// # Errors
    /// Returns `NetworkRemoveFailed` if the runtime refuses the removal.
    pub async fn release(&self, lease: NetworkLease) -> Result<()> {
        let mut leases = self.leases.lock().await;

        let Some(entry) = leases.get_mut(&lease.name) else {
            debug!(network = %lease.name, "release of unknown lease ignored");
            return Ok(());
        };

        entry.holders = entry.holders.saturating_sub(1);
        if entry.holders > 0 {
            debug!(network = %lease.name, holders = entry.holders, "network still leased");
            return Ok(());
        }

        if !entry.created_here {
            leases.remove(&lease.name);
            debug!(network = %lease.name, "network not created here, leaving in place");
            return Ok(());
        }

        // On failure the entry stays, with no holders, so the next ensure and
        // release of this name retry the removal.
        match self.runtime.remove_network(&lease.id).await {
            Ok(()) => {
                leases.remove(&lease.name);
                info!(network = %lease.name, id = %lease.id, "removed network");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                leases.remove(&lease.name);
                debug!(network = %lease.name, "network already gone");
                Ok(())
            }
            Err(source) => {
                warn!(network = %lease.name, error = %source, "network removal failed, keeping it for retry");
                Err(FlotaError::NetworkRemoveFailed {
                    network: lease.name,
                    network_id: lease.id,
                    source,
                })
            }
        }
    }

    /// Returns the number of outstanding leases on `name`.
    pub async fn holders(&self, name: &str) -> usize {
        self.leases
            .lock()
            .await
            .get(name)
            .map_or(0, |entry| entry.holders)
    }
}
