//! Instance lifecycle: create, start, inspect, stop, remove.
//!
//! A launch runs strictly in sequence and stops at the first failing step.
//! Errors after the create step carry the container ID so the caller can
//! keep tracking the half-launched container.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cancel::until_cancelled;
use crate::config::ClusterConfig;
use crate::descriptor::InstanceDescriptor;
use crate::error::{FlotaError, Result};
use crate::runtime::{ContainerDetails, ContainerSpec, RuntimeAdapter};

/// Label carrying the instance's logical ID.
pub const INSTANCE_LABEL: &str = "flota.instance";

/// Label carrying the network the instance was launched on.
pub const NETWORK_LABEL: &str = "flota.network";

/// Capability needed to install traffic-control rules.
pub const NET_ADMIN: &str = "NET_ADMIN";

/// Drives single containers through the runtime.
pub struct InstanceLifecycle {
    runtime: Arc<dyn RuntimeAdapter>,
    config: Arc<ClusterConfig>,
}

impl InstanceLifecycle {
    /// Creates a lifecycle manager.
    #[must_use]
    pub fn new(runtime: Arc<dyn RuntimeAdapter>, config: Arc<ClusterConfig>) -> Self {
        Self { runtime, config }
    }

    /// Returns the container name: `<prefix>-<name>-<short id>`.
    #[must_use]
    pub fn container_name(&self, desc: &InstanceDescriptor) -> String {
        format!(
            "{}-{}-{}",
            self.config.container_prefix,
            desc.name(),
            desc.id().short()
        )
    }

    /// Builds the create request for `desc` on `network`.
    #[must_use]
    pub fn container_spec(&self, network: &str, desc: &InstanceDescriptor) -> ContainerSpec {
        let mut labels: HashMap<String, String> = self.config.labels.clone();
        labels.insert(INSTANCE_LABEL.to_string(), desc.id().to_string());
        labels.insert(NETWORK_LABEL.to_string(), network.to_string());

        let cap_add = if self.config.net_admin {
            vec![NET_ADMIN.to_string()]
        } else {
            Vec::new()
        };

        ContainerSpec {
            name: self.container_name(desc),
            image: self.config.image.clone(),
            env: desc.rendered_env(),
            exposed_port: desc.bind_port(),
            host_ip: self.config.host_ip.clone(),
            host_port: 0,
            network: network.to_string(),
            cap_add,
            labels,
        }
    }

    /// Creates, starts and inspects the container for `desc`, then records
    /// its address and container ID in the descriptor.
    ///
    /// A launch cancelled after the create step removes the container before
    /// returning `Cancelled`.
    ///
    /// # Errors
    /// Returns `AlreadyAssigned` for a launched descriptor, otherwise the
    /// error of the first failing step.
    pub async fn launch(
        &self,
        network: &str,
        desc: &mut InstanceDescriptor,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let container_id = self.create(network, desc, cancel).await?;
        self.start(network, desc, &container_id, cancel).await
    }

    /// Creates the container for `desc` and returns its ID.
    ///
    /// The container is named by [`container_name`](Self::container_name),
    /// so it can be removed by name if this call never returns.
    ///
    /// # Errors
    /// Returns `AlreadyAssigned`, `RuntimeCreateFailed`, or `Cancelled`.
    pub async fn create(
        &self,
        network: &str,
        desc: &InstanceDescriptor,
        cancel: &CancellationToken,
    ) -> Result<String> {
        if desc.is_launched() {
            return Err(FlotaError::AlreadyAssigned {
                name: desc.name().to_string(),
            });
        }

        let spec = self.container_spec(network, desc);
        let container_id = until_cancelled(
            cancel,
            &format!("create {}", desc.name()),
            self.runtime.create_container(&spec),
        )
        .await?
        .map_err(|source| FlotaError::RuntimeCreateFailed {
            instance: desc.name().to_string(),
            source,
        })?;
        debug!(instance = %desc.name(), container_id = %container_id, "container created");
        Ok(container_id)
    }

    /// Starts and inspects a created container, then assigns its address and
    /// ID to `desc`.
    ///
    /// A cancelled start removes the container before returning `Cancelled`.
    ///
    /// # Errors
    /// Returns `RuntimeStartFailed`, `RuntimeInspectFailed`,
    /// `AlreadyAssigned`, or `Cancelled`.
    pub async fn start(
        &self,
        network: &str,
        desc: &mut InstanceDescriptor,
        container_id: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        match self
            .start_and_inspect(network, desc.name(), container_id, cancel)
            .await
        {
            Ok(address) => {
                desc.assign(address, container_id.to_string())?;
                info!(
                    instance = %desc.name(),
                    container_id = %container_id,
                    address = %address,
                    "instance launched"
                );
                Ok(())
            }
            Err(e) if e.is_cancelled() => {
                if let Err(remove_err) = self.remove(container_id).await {
                    warn!(
                        container_id = %container_id,
                        error = %remove_err,
                        "failed to remove container of cancelled launch"
                    );
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn start_and_inspect(
        &self,
        network: &str,
        instance: &str,
        container_id: &str,
        cancel: &CancellationToken,
    ) -> Result<std::net::IpAddr> {
        until_cancelled(
            cancel,
            &format!("start {instance}"),
            self.runtime.start_container(container_id),
        )
        .await?
        .map_err(|source| FlotaError::RuntimeStartFailed {
            instance: instance.to_string(),
            container_id: container_id.to_string(),
            source,
        })?;
        debug!(instance = %instance, container_id = %container_id, "container started");

        let details = until_cancelled(
            cancel,
            &format!("inspect {instance}"),
            self.runtime.inspect_container(container_id),
        )
        .await?
        .map_err(|source| FlotaError::RuntimeInspectFailed {
            instance: instance.to_string(),
            container_id: container_id.to_string(),
            reason: source.to_string(),
        })?;

        details
            .address_on(network)
            .ok_or_else(|| FlotaError::RuntimeInspectFailed {
                instance: instance.to_string(),
                container_id: container_id.to_string(),
                reason: format!("no address assigned on network {network}"),
            })
    }

    /// Stops a container, giving it `grace` before it is killed.
    ///
    /// Already stopped and already gone both count as success.
    ///
    /// # Errors
    /// Returns `RuntimeStopFailed` for any other runtime failure.
    pub async fn stop(&self, container_id: &str, grace: Duration) -> Result<()> {
        match self.runtime.stop_container(container_id, grace).await {
            Ok(()) => {
                debug!(container_id = %container_id, "container stopped");
                Ok(())
            }
            Err(e) if e.is_not_modified() || e.is_not_found() => {
                debug!(container_id = %container_id, reason = %e, "container already stopped");
                Ok(())
            }
            Err(source) => Err(FlotaError::RuntimeStopFailed {
                container_id: container_id.to_string(),
                source,
            }),
        }
    }

    /// Force-removes a container and its anonymous volumes.
    ///
    /// # Errors
    /// Returns `RuntimeRemoveFailed` unless the container is already gone.
    pub async fn remove(&self, container_id: &str) -> Result<()> {
        match self.runtime.remove_container(container_id).await {
            Ok(()) => {
                info!(container_id = %container_id, "container removed");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(container_id = %container_id, "container already removed");
                Ok(())
            }
            Err(source) => Err(FlotaError::RuntimeRemoveFailed {
                container_id: container_id.to_string(),
                source,
            }),
        }
    }

    /// Inspects the container of an instance.
    ///
    /// # Errors
    /// Returns `RuntimeInspectFailed` if the runtime cannot inspect it.
    pub async fn inspect(&self, instance: &str, container_id: &str) -> Result<ContainerDetails> {
        self.runtime
            .inspect_container(container_id)
            .await
            .map_err(|source| FlotaError::RuntimeInspectFailed {
                instance: instance.to_string(),
                container_id: container_id.to_string(),
                reason: source.to_string(),
            })
    }

    /// Makes sure the configured image is present, pulling it if needed.
    ///
    /// # Errors
    /// Returns `RuntimeQueryFailed` if the image cannot be found or pulled.
    pub async fn ensure_image(&self, cancel: &CancellationToken) -> Result<()> {
        let image = &self.config.image;
        until_cancelled(
            cancel,
            &format!("pull {image}"),
            self.runtime.ensure_image(image),
        )
        .await?
        .map_err(|source| FlotaError::RuntimeQueryFailed {
            resource: image.clone(),
            source,
        })?;
        info!(image = %image, "image ready");
        Ok(())
    }
}
