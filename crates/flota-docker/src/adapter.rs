//! [`RuntimeAdapter`] backed by the Docker Engine API.
//!
//! Uses bollard for all engine calls. Engine errors are classified by HTTP
//! status (see [`crate::error::classify`]) so the core can tell "already
//! stopped" and "already gone" apart from real failures.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use bollard::auth::DockerCredentials;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogOutput, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerInspectResponse, HostConfig, PortBinding};
use bollard::network::{CreateNetworkOptions, ListNetworksOptions};
use futures::{StreamExt, TryStreamExt};
use tracing::{debug, info};

use flota_core::{
    ContainerDetails, ContainerSpec, ExecOutput, NetworkEndpoint, NetworkSummary, RuntimeAdapter,
    RuntimeError, RuntimeResult,
};

use crate::config::{DockerConfig, RegistryAuth};
use crate::error::{DockerError, Result, classify};

/// Docker-backed runtime adapter.
#[derive(Debug, Clone)]
pub struct DockerAdapter {
    docker: Docker,
    credentials: Option<DockerCredentials>,
}

impl DockerAdapter {
    /// Builds a client from `config` without contacting the daemon.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the client cannot
    /// be constructed.
    pub fn connect(config: &DockerConfig) -> Result<Self> {
        config.validate()?;

        let docker = match &config.socket {
            Some(path) => Docker::connect_with_socket(
                path,
                config.timeout.as_secs(),
                bollard::API_DEFAULT_VERSION,
            ),
            None => Docker::connect_with_local_defaults()
                .map(|docker| docker.with_timeout(config.timeout)),
        }
        .map_err(|e| DockerError::Connect {
            endpoint: config.endpoint(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            docker,
            credentials: config.registry_auth.as_ref().map(credentials),
        })
    }

    /// Builds a client and checks that the daemon answers.
    ///
    /// # Errors
    /// Returns `Connect` or `Unreachable`.
    pub async fn connect_checked(config: &DockerConfig) -> Result<Self> {
        let adapter = Self::connect(config)?;
        adapter.ping().await.map_err(DockerError::Unreachable)?;
        info!(endpoint = %config.endpoint(), "connected to docker");
        Ok(adapter)
    }

    /// Wraps an existing bollard client.
    #[must_use]
    pub fn from_client(docker: Docker) -> Self {
        Self {
            docker,
            credentials: None,
        }
    }
}

fn credentials(auth: &RegistryAuth) -> DockerCredentials {
    DockerCredentials {
        username: Some(auth.username.clone()),
        password: Some(auth.password.clone()),
        serveraddress: auth.server_address.clone(),
        ..Default::default()
    }
}

fn port_key(port: u16) -> String {
    format!("{port}/tcp")
}

/// Builds the engine create request for a container spec.
#[must_use]
pub fn container_config(spec: &ContainerSpec) -> Config<String> {
    let key = port_key(spec.exposed_port);

    let mut port_bindings = HashMap::new();
    port_bindings.insert(
        key.clone(),
        Some(vec![PortBinding {
            host_ip: Some(spec.host_ip.clone()),
            host_port: Some(spec.host_port.to_string()),
        }]),
    );

    let mut exposed_ports = HashMap::new();
    exposed_ports.insert(key, HashMap::new());

    let cap_add = if spec.cap_add.is_empty() {
        None
    } else {
        Some(spec.cap_add.clone())
    };

    Config {
        image: Some(spec.image.clone()),
        env: Some(spec.env.clone()),
        exposed_ports: Some(exposed_ports),
        labels: Some(spec.labels.clone()),
        host_config: Some(HostConfig {
            network_mode: Some(spec.network.clone()),
            port_bindings: Some(port_bindings),
            cap_add,
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Extracts running state, addresses and published ports from an inspect
/// response.
#[must_use]
pub fn container_details(id: &str, info: ContainerInspectResponse) -> ContainerDetails {
    let running = info.state.and_then(|s| s.running).unwrap_or(false);
    let settings = info.network_settings.unwrap_or_default();

    let networks = settings
        .networks
        .unwrap_or_default()
        .into_iter()
        .map(|(name, ep)| {
            let ip_address = ep
                .ip_address
                .filter(|ip| !ip.is_empty())
                .and_then(|ip| ip.parse::<IpAddr>().ok());
            (
                name,
                NetworkEndpoint {
                    network_id: ep.network_id.unwrap_or_default(),
                    ip_address,
                },
            )
        })
        .collect();

    let host_ports = settings
        .ports
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(key, bindings)| {
            let container_port = key.strip_suffix("/tcp")?.parse::<u16>().ok()?;
            let host_port = bindings?
                .into_iter()
                .find_map(|b| b.host_port.and_then(|p| p.parse::<u16>().ok()))?;
            Some((container_port, host_port))
        })
        .collect();

    ContainerDetails {
        id: info.id.unwrap_or_else(|| id.to_string()),
        running,
        networks,
        host_ports,
    }
}

#[async_trait]
impl RuntimeAdapter for DockerAdapter {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn ping(&self) -> RuntimeResult<()> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))
    }

    async fn ensure_image(&self, image: &str) -> RuntimeResult<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image = %image, "image present");
            return Ok(());
        }

        info!(image = %image, "pulling image");
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        self.docker
            .create_image(Some(options), None, self.credentials.clone())
            .try_for_each(|progress| {
                if let Some(status) = progress.status {
                    debug!(image = %image, status = %status, "pull progress");
                }
                futures::future::ok(())
            })
            .await
            .map_err(classify)
    }

    async fn list_networks(&self, name: &str) -> RuntimeResult<Vec<NetworkSummary>> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![name.to_string()]);

        let networks = self
            .docker
            .list_networks(Some(ListNetworksOptions { filters }))
            .await
            .map_err(classify)?;

        Ok(networks
            .into_iter()
            .filter_map(|n| {
                Some(NetworkSummary {
                    id: n.id?,
                    name: n.name?,
                })
            })
            .collect())
    }

    async fn create_network(
        &self,
        name: &str,
        driver: &str,
        labels: &HashMap<String, String>,
    ) -> RuntimeResult<String> {
        let options = CreateNetworkOptions {
            name: name.to_string(),
            driver: driver.to_string(),
            labels: labels.clone(),
            ..Default::default()
        };
        self.docker
            .create_network(options)
            .await
            .map_err(classify)?;

        // The create response shape varies across engine versions; the
        // listing is authoritative.
        self.list_networks(name)
            .await?
            .into_iter()
            .find(|n| n.name == name)
            .map(|n| n.id)
            .ok_or_else(|| RuntimeError::Other(format!("network {name} missing after create")))
    }

    async fn remove_network(&self, id: &str) -> RuntimeResult<()> {
        self.docker.remove_network(id).await.map_err(classify)
    }

    async fn create_container(&self, spec: &ContainerSpec) -> RuntimeResult<String> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let response = self
            .docker
            .create_container(Some(options), container_config(spec))
            .await
            .map_err(classify)?;
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> RuntimeResult<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(classify)
    }

    async fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerDetails> {
        let info = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(classify)?;
        Ok(container_details(id, info))
    }

    async fn stop_container(&self, id: &str, grace: Duration) -> RuntimeResult<()> {
        let t = i64::try_from(grace.as_secs()).unwrap_or(i64::MAX);
        self.docker
            .stop_container(id, Some(StopContainerOptions { t }))
            .await
            .map_err(classify)
    }

    async fn remove_container(&self, id: &str) -> RuntimeResult<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(classify)
    }

    async fn exec(&self, id: &str, cmd: &[String]) -> RuntimeResult<ExecOutput> {
        let exec = self
            .docker
            .create_exec(
                id,
                CreateExecOptions {
                    cmd: Some(cmd.to_vec()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(classify)?;

        let mut out = ExecOutput::default();
        if let StartExecResults::Attached { mut output, .. } = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(classify)?
        {
            while let Some(chunk) = output.next().await {
                match chunk.map_err(classify)? {
                    LogOutput::StdOut { message } => {
                        out.stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    LogOutput::StdErr { message } => {
                        out.stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    _ => {}
                }
            }
        }

        out.exit_code = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(classify)?
            .exit_code;
        debug!(container_id = %id, cmd = %cmd.join(" "), exit_code = ?out.exit_code, "exec finished");
        Ok(out)
    }
}
