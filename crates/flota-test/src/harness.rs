//! Cluster test harness.
//!
//! A harness holds what a test suite shares: the runtime, one
//! [`NetworkManager`] and one [`SuiteAllocator`]. Every test body runs in a
//! fresh [`CleanupScope`], so whatever it launched is torn down when the body
//! returns, fails or panics.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use flota_core::{
    CleanupScope, Cluster, ClusterConfig, InstanceDescriptor, MockRuntime, NetworkManager,
    RuntimeAdapter, SuiteAllocator,
};
use flota_docker::{DockerAdapter, DockerConfig};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{Result, TestError};

/// Image used when no configuration is supplied.
pub const DEFAULT_IMAGE: &str = "flota/echo:latest";

/// Suite-wide test harness.
pub struct ClusterTestHarness {
    runtime: Arc<dyn RuntimeAdapter>,
    networks: Arc<NetworkManager>,
    allocator: Arc<SuiteAllocator>,
    config: ClusterConfig,
}

impl ClusterTestHarness {
    /// Creates a new test harness builder.
    #[must_use]
    pub fn builder() -> ClusterTestHarnessBuilder {
        ClusterTestHarnessBuilder::default()
    }

    /// Creates a harness over an in-memory runtime.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Creates a harness over a live Docker daemon.
    ///
    /// # Errors
    /// Returns a Docker error if the daemon cannot be reached.
    pub async fn docker(docker: &DockerConfig, config: ClusterConfig) -> Result<Self> {
        let adapter = DockerAdapter::connect_checked(docker).await?;
        Ok(Self::builder()
            .with_runtime(Arc::new(adapter))
            .with_config(config)
            .build())
    }

    /// Returns the runtime.
    #[must_use]
    pub fn runtime(&self) -> &Arc<dyn RuntimeAdapter> {
        &self.runtime
    }

    /// Returns the suite's network manager.
    #[must_use]
    pub fn networks(&self) -> &Arc<NetworkManager> {
        &self.networks
    }

    /// Returns the suite's allocator.
    #[must_use]
    pub fn allocator(&self) -> &SuiteAllocator {
        &self.allocator
    }

    /// Returns the base cluster configuration.
    #[must_use]
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    fn env(&self, scope: CleanupScope, cancel: CancellationToken) -> TestEnv {
        TestEnv {
            runtime: Arc::clone(&self.runtime),
            networks: Arc::clone(&self.networks),
            allocator: Arc::clone(&self.allocator),
            config: self.config.clone(),
            scope,
            cancel,
        }
    }

    /// Runs `body` in a fresh cleanup scope.
    ///
    /// Everything the body registers is released afterwards. A panic in the
    /// body is resumed once cleanup has finished.
    pub async fn run<F, Fut, T>(&self, body: F) -> T
    where
        F: FnOnce(TestEnv) -> Fut,
        Fut: Future<Output = T>,
    {
        let scope = CleanupScope::new(self.config.release_timeout);
        let cancel = CancellationToken::new();
        debug!(suite = %self.allocator.tag(), "test scope opened");
        scope.run(|scope| body(self.env(scope, cancel))).await
    }

    /// Like [`run`](Self::run), but gives up on the body after `limit`.
    ///
    /// On timeout the environment's token is cancelled and cleanup still runs.
    ///
    /// # Errors
    /// Returns [`TestError::Timeout`] if the body overran.
    pub async fn run_with_timeout<F, Fut, T>(&self, limit: Duration, body: F) -> Result<T>
    where
        F: FnOnce(TestEnv) -> Fut,
        Fut: Future<Output = T>,
    {
        let scope = CleanupScope::new(self.config.release_timeout);
        let cancel = CancellationToken::new();
        let guard = cancel.clone();
        scope
            .run(|scope| async move {
                match tokio::time::timeout(limit, body(self.env(scope, cancel))).await {
                    Ok(value) => Ok(value),
                    Err(_) => {
                        guard.cancel();
                        Err(TestError::Timeout(limit))
                    }
                }
            })
            .await
    }
}

impl Default for ClusterTestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`ClusterTestHarness`].
#[derive(Default)]
pub struct ClusterTestHarnessBuilder {
    runtime: Option<Arc<dyn RuntimeAdapter>>,
    config: Option<ClusterConfig>,
    release_timeout: Option<Duration>,
    suite_tag: Option<String>,
}

impl ClusterTestHarnessBuilder {
    /// Sets the runtime. Defaults to a fresh [`MockRuntime`].
    #[must_use]
    pub fn with_runtime(mut self, runtime: Arc<dyn RuntimeAdapter>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Sets the base cluster configuration.
    #[must_use]
    pub fn with_config(mut self, config: ClusterConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Overrides the per-release cleanup timeout.
    ///
    /// The stop grace period is shortened to match if it would exceed it.
    #[must_use]
    pub const fn with_release_timeout(mut self, timeout: Duration) -> Self {
        self.release_timeout = Some(timeout);
        self
    }

    /// Fixes the suite tag embedded in network names.
    #[must_use]
    pub fn with_suite_tag(mut self, tag: impl Into<String>) -> Self {
        self.suite_tag = Some(tag.into());
        self
    }

    /// Builds the test harness.
    #[must_use]
    pub fn build(self) -> ClusterTestHarness {
        let runtime: Arc<dyn RuntimeAdapter> = match self.runtime {
            Some(runtime) => runtime,
            None => Arc::new(MockRuntime::new()),
        };
        let mut config = self
            .config
            .unwrap_or_else(|| ClusterConfig::new(DEFAULT_IMAGE));
        if let Some(timeout) = self.release_timeout {
            config.release_timeout = timeout;
            if config.stop_grace > timeout {
                debug!(stop_grace = ?config.stop_grace, timeout = ?timeout, "capping stop grace at release timeout");
                config.stop_grace = timeout;
            }
        }
        let allocator = self
            .suite_tag
            .map_or_else(SuiteAllocator::new, SuiteAllocator::with_tag);

        info!(runtime = runtime.name(), suite = %allocator.tag(), "test harness ready");

        ClusterTestHarness {
            networks: Arc::new(NetworkManager::new(Arc::clone(&runtime))),
            runtime,
            allocator: Arc::new(allocator),
            config,
        }
    }
}

/// What a single test body works with.
#[derive(Clone)]
pub struct TestEnv {
    runtime: Arc<dyn RuntimeAdapter>,
    networks: Arc<NetworkManager>,
    allocator: Arc<SuiteAllocator>,
    config: ClusterConfig,
    scope: CleanupScope,
    cancel: CancellationToken,
}

impl TestEnv {
    /// Creates a cluster on a network name unique to this suite.
    ///
    /// # Errors
    /// Returns the cluster setup error.
    pub async fn cluster(&self) -> Result<Cluster> {
        let network = self.allocator.network_name(&self.config.network_name);
        self.cluster_on(&network).await
    }

    /// Creates a cluster on the network called `network`, reusing it if it
    /// already exists.
    ///
    /// # Errors
    /// Returns the cluster setup error.
    pub async fn cluster_on(&self, network: &str) -> Result<Cluster> {
        let config = self.config.clone().with_network_name(network);
        let cluster = Cluster::new(
            Arc::clone(&self.runtime),
            &self.networks,
            config,
            &self.scope,
            self.cancel.clone(),
        )
        .await?;
        Ok(cluster)
    }

    /// Returns a descriptor with a suite-unique name.
    pub fn descriptor(&self, prefix: &str, bind_port: u16) -> InstanceDescriptor {
        self.allocator.descriptor(prefix, bind_port)
    }

    /// Returns the runtime.
    #[must_use]
    pub fn runtime(&self) -> &Arc<dyn RuntimeAdapter> {
        &self.runtime
    }

    /// Returns the suite's network manager.
    #[must_use]
    pub fn networks(&self) -> &Arc<NetworkManager> {
        &self.networks
    }

    /// Returns the cleanup scope of this test.
    #[must_use]
    pub fn scope(&self) -> &CleanupScope {
        &self.scope
    }

    /// Returns the cancellation token of this test.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Returns true if a Docker daemon answers at `config`.
pub async fn docker_available(config: &DockerConfig) -> bool {
    match DockerAdapter::connect_checked(config).await {
        Ok(_) => true,
        Err(e) => {
            info!(error = %e, "docker unavailable");
            false
        }
    }
}
