//! Cluster manager - orchestrates a set of instances on one network.
//!
//! A cluster owns a network lease and every container it launches. The
//! release for a container is registered with the [`CleanupScope`] before the
//! create call goes out, so neither a failing nor an abandoned launch leaks
//! it.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::{OnceCell, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cancel::until_cancelled;
use crate::config::ClusterConfig;
use crate::descriptor::InstanceDescriptor;
use crate::error::{FlotaError, Result};
use crate::lifecycle::InstanceLifecycle;
use crate::netem::NetemInjector;
use crate::network::NetworkManager;
use crate::runtime::RuntimeAdapter;
use crate::scope::CleanupScope;
use crate::types::{InstanceId, InstanceStatus};

// =============================================================================
// InstanceRecord
// =============================================================================

/// Registry entry for a container this cluster launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRecord {
    /// Logical ID of the descriptor.
    pub id: InstanceId,
    /// Descriptor name.
    pub name: String,
    /// Runtime container ID.
    pub container_id: String,
    /// Address on the cluster network, if the launch got that far.
    pub address: Option<IpAddr>,
    /// Last known status.
    pub status: InstanceStatus,
}

type Registry = Arc<RwLock<HashMap<InstanceId, InstanceRecord>>>;

async fn set_status(registry: &Registry, id: InstanceId, status: InstanceStatus) {
    if let Some(record) = registry.write().await.get_mut(&id) {
        let old = record.status;
        record.status = status;
        debug!(instance = %record.name, old = %old, new = %status, "status changed");
    }
}

// =============================================================================
// Cluster
// =============================================================================

/// A network plus the instances launched on it.
pub struct Cluster {
    runtime: Arc<dyn RuntimeAdapter>,
    lifecycle: Arc<InstanceLifecycle>,
    config: Arc<ClusterConfig>,
    network_id: String,
    network_name: String,
    scope: CleanupScope,
    cancel: CancellationToken,
    registry: Registry,
    image_ready: OnceCell<()>,
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("runtime", &self.runtime.name())
            .field("network_id", &self.network_id)
            .field("network_name", &self.network_name)
            .finish_non_exhaustive()
    }
}

impl Cluster {
    /// Validates `config`, ensures its network and registers the network
    /// lease for release when `scope` exits.
    ///
    /// # Errors
    /// Returns `Config` for an invalid configuration, a network error, or
    /// `Cancelled`.
    pub async fn new(
        runtime: Arc<dyn RuntimeAdapter>,
        networks: &Arc<NetworkManager>,
        config: ClusterConfig,
        scope: &CleanupScope,
        cancel: CancellationToken,
    ) -> Result<Self> {
        config.validate()?;

        let lease = networks
            .ensure(
                &config.network_name,
                &config.network_driver,
                &config.labels,
                &cancel,
            )
            .await?;
        let network_id = lease.id().to_string();
        let network_name = lease.name().to_string();

        let manager = Arc::clone(networks);
        scope.on_exit(format!("network {network_name}"), move || async move {
            manager.release(lease).await
        });

        info!(network = %network_name, id = %network_id, runtime = runtime.name(), "cluster ready");

        let config = Arc::new(config);
        Ok(Self {
            lifecycle: Arc::new(InstanceLifecycle::new(
                Arc::clone(&runtime),
                Arc::clone(&config),
            )),
            runtime,
            config,
            network_id,
            network_name,
            scope: scope.clone(),
            cancel,
            registry: Arc::new(RwLock::new(HashMap::new())),
            image_ready: OnceCell::new(),
        })
    }

    /// Returns the runtime network ID.
    #[must_use]
    pub fn network_id(&self) -> &str {
        &self.network_id
    }

    /// Returns the network name.
    #[must_use]
    pub fn network_name(&self) -> &str {
        &self.network_name
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Returns the lifecycle manager used for launches.
    #[must_use]
    pub fn lifecycle(&self) -> &InstanceLifecycle {
        &self.lifecycle
    }

    /// Launches every descriptor.
    ///
    /// With `wait_for_all`, launches run concurrently and all of them are
    /// attempted; the first error in descriptor order is returned. Otherwise
    /// they run one after another and the first failure stops the batch.
    ///
    /// # Errors
    /// Returns the first launch error.
    pub async fn run_instances(
        &self,
        descriptors: &mut [InstanceDescriptor],
        wait_for_all: bool,
    ) -> Result<()> {
        self.ensure_image().await?;
        info!(
            network = %self.network_name,
            count = descriptors.len(),
            concurrent = wait_for_all,
            "launching instances"
        );

        if wait_for_all {
            let results = join_all(descriptors.iter_mut().map(|d| self.launch_tracked(d))).await;
            results.into_iter().find_map(Result::err).map_or(Ok(()), Err)
        } else {
            for desc in descriptors.iter_mut() {
                self.launch_tracked(desc).await?;
            }
            Ok(())
        }
    }

    /// Launches a single descriptor.
    ///
    /// # Errors
    /// Returns the launch error.
    pub async fn run_instance(&self, desc: &mut InstanceDescriptor) -> Result<()> {
        self.ensure_image().await?;
        self.launch_tracked(desc).await
    }

    async fn ensure_image(&self) -> Result<()> {
        if !self.config.pull_image {
            return Ok(());
        }
        self.image_ready
            .get_or_try_init(|| self.lifecycle.ensure_image(&self.cancel))
            .await?;
        Ok(())
    }

    async fn launch_tracked(&self, desc: &mut InstanceDescriptor) -> Result<()> {
        if desc.is_launched() {
            return Err(FlotaError::AlreadyAssigned {
                name: desc.name().to_string(),
            });
        }

        // The release exists before the container does. Until the create call
        // returns an ID it targets the deterministic container name, so a
        // launch dropped mid-flight is still torn down.
        let target = Arc::new(Mutex::new(Some(self.lifecycle.container_name(desc))));
        self.register_release(desc.id(), desc.name(), Arc::clone(&target));

        let container_id = match self
            .lifecycle
            .create(&self.network_name, desc, &self.cancel)
            .await
        {
            Ok(container_id) => container_id,
            Err(e) => {
                if !e.is_cancelled() {
                    *target.lock() = None;
                }
                return Err(e);
            }
        };
        *target.lock() = Some(container_id.clone());

        let id = desc.id();
        self.registry.write().await.insert(
            id,
            InstanceRecord {
                id,
                name: desc.name().to_string(),
                container_id: container_id.clone(),
                address: None,
                status: InstanceStatus::Created,
            },
        );

        let result = self
            .lifecycle
            .start(&self.network_name, desc, &container_id, &self.cancel)
            .await;

        match &result {
            Ok(()) => {
                if let Some(record) = self.registry.write().await.get_mut(&id) {
                    record.address = desc.address();
                    record.status = InstanceStatus::Running;
                }
            }
            Err(e) => {
                warn!(
                    instance = %desc.name(),
                    container_id = %container_id,
                    error = %e,
                    "launch failed, container left for cleanup"
                );
                set_status(&self.registry, id, InstanceStatus::Failed).await;
            }
        }

        result
    }

    fn register_release(&self, id: InstanceId, name: &str, target: Arc<Mutex<Option<String>>>) {
        let registry = Arc::clone(&self.registry);
        let lifecycle = Arc::clone(&self.lifecycle);
        let grace = self.config.stop_grace;
        let name = name.to_string();
        self.scope
            .on_exit(format!("instance {name}"), move || async move {
                let handled = registry
                    .read()
                    .await
                    .get(&id)
                    .is_some_and(|r| r.status.is_terminal());
                if handled {
                    debug!(instance = %name, "already torn down");
                    return Ok(());
                }
                let container = target.lock().clone();
                let Some(container) = container else {
                    debug!(instance = %name, "no container was created");
                    return Ok(());
                };
                if let Err(e) = lifecycle.stop(&container, grace).await {
                    warn!(instance = %name, error = %e, "stop failed, forcing removal");
                }
                lifecycle.remove(&container).await?;
                set_status(&registry, id, InstanceStatus::Removed).await;
                Ok(())
            });
    }

    /// Stops and removes an instance mid-test.
    ///
    /// The cleanup registered at launch becomes a no-op afterwards.
    ///
    /// # Errors
    /// Returns `NotLaunched`, `RuntimeStopFailed`, `RuntimeRemoveFailed`, or
    /// `Cancelled`.
    pub async fn stop_instance(&self, desc: &InstanceDescriptor) -> Result<()> {
        let container_id = desc.require_assignment()?.container_id.as_str();
        let grace = self.config.stop_grace;

        until_cancelled(
            &self.cancel,
            &format!("stop {}", desc.name()),
            self.lifecycle.stop(container_id, grace),
        )
        .await??;
        set_status(&self.registry, desc.id(), InstanceStatus::Stopped).await;

        until_cancelled(
            &self.cancel,
            &format!("remove {}", desc.name()),
            self.lifecycle.remove(container_id),
        )
        .await??;
        set_status(&self.registry, desc.id(), InstanceStatus::Removed).await;

        info!(instance = %desc.name(), container_id = %container_id, "instance stopped");
        Ok(())
    }

    /// Stops and removes several instances; every one is attempted.
    ///
    /// # Errors
    /// Returns the first error encountered.
    pub async fn stop_instances(&self, descriptors: &[InstanceDescriptor]) -> Result<()> {
        let mut first_err = None;
        for desc in descriptors {
            if let Err(e) = self.stop_instance(desc).await {
                warn!(instance = %desc.name(), error = %e, "stop failed");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Returns the last known status of an instance.
    pub async fn status(&self, id: InstanceId) -> Option<InstanceStatus> {
        self.registry.read().await.get(&id).map(|r| r.status)
    }

    /// Returns a snapshot of every tracked instance, sorted by name.
    pub async fn instances(&self) -> Vec<InstanceRecord> {
        let mut records: Vec<InstanceRecord> =
            self.registry.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    /// Inspects the container and updates the recorded status.
    ///
    /// # Errors
    /// Returns `NotLaunched`, `RuntimeInspectFailed`, or `Cancelled`.
    pub async fn refresh_status(&self, desc: &InstanceDescriptor) -> Result<InstanceStatus> {
        let container_id = desc.require_assignment()?.container_id.as_str();
        let details = until_cancelled(
            &self.cancel,
            &format!("inspect {}", desc.name()),
            self.lifecycle.inspect(desc.name(), container_id),
        )
        .await??;

        let status = if details.running {
            InstanceStatus::Running
        } else {
            InstanceStatus::Stopped
        };
        set_status(&self.registry, desc.id(), status).await;
        Ok(status)
    }

    /// Returns the ephemeral host port published for the descriptor's bind
    /// port.
    ///
    /// # Errors
    /// Returns `NotLaunched`, `RuntimeInspectFailed` if the port is not
    /// published, or `Cancelled`.
    pub async fn host_port(&self, desc: &InstanceDescriptor) -> Result<u16> {
        let container_id = desc.require_assignment()?.container_id.as_str();
        let details = until_cancelled(
            &self.cancel,
            &format!("inspect {}", desc.name()),
            self.lifecycle.inspect(desc.name(), container_id),
        )
        .await??;

        details
            .host_ports
            .get(&desc.bind_port())
            .copied()
            .ok_or_else(|| FlotaError::RuntimeInspectFailed {
                instance: desc.name().to_string(),
                container_id: container_id.to_string(),
                reason: format!("port {}/tcp is not published", desc.bind_port()),
            })
    }

    /// Returns an injector for degrading links of this cluster's instances.
    #[must_use]
    pub fn conditions(&self) -> NetemInjector {
        NetemInjector::new(Arc::clone(&self.runtime), &self.config)
    }

    /// Returns the cluster's cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}
