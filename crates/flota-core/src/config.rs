//! Cluster configuration.
//!
//! Configuration is validated at load time, with sensible defaults and clear
//! error messages.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{FlotaError, Result};

/// Settings shared by every instance a cluster launches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Image reference for the service under test.
    pub image: String,

    /// Name of the virtual network the instances share.
    #[serde(default = "default_network_name")]
    pub network_name: String,

    /// Network driver.
    #[serde(default = "default_network_driver")]
    pub network_driver: String,

    /// Prefix for container names.
    #[serde(default = "default_container_prefix")]
    pub container_prefix: String,

    /// Host IP that exposed ports are published on.
    #[serde(default = "default_host_ip")]
    pub host_ip: String,

    /// Grace period for a stop request before the runtime kills the container.
    #[serde(default = "default_stop_grace")]
    #[serde(with = "humantime_serde")]
    pub stop_grace: Duration,

    /// Upper bound on each cleanup release.
    #[serde(default = "default_release_timeout")]
    #[serde(with = "humantime_serde")]
    pub release_timeout: Duration,

    /// Interface that network conditions target by default.
    #[serde(default = "default_interface")]
    pub default_interface: String,

    /// Grant `NET_ADMIN` so traffic-control rules can be installed.
    #[serde(default = "default_true")]
    pub net_admin: bool,

    /// Pull the image before the first launch.
    #[serde(default)]
    pub pull_image: bool,

    /// Burst size for the bandwidth-limiting discipline.
    #[serde(default = "default_tbf_burst")]
    pub tbf_burst: String,

    /// Queueing latency bound for the bandwidth-limiting discipline.
    #[serde(default = "default_tbf_latency")]
    pub tbf_latency: String,

    /// Extra labels applied to networks and containers.
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

fn default_network_name() -> String {
    "flota-net".to_string()
}

fn default_network_driver() -> String {
    "bridge".to_string()
}

fn default_container_prefix() -> String {
    "flota".to_string()
}

fn default_host_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_stop_grace() -> Duration {
    Duration::from_secs(3)
}

fn default_release_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_interface() -> String {
    "eth0".to_string()
}

fn default_true() -> bool {
    true
}

fn default_tbf_burst() -> String {
    "32kbit".to_string()
}

fn default_tbf_latency() -> String {
    "400ms".to_string()
}

impl ClusterConfig {
    /// Creates a configuration for `image` with all other fields defaulted.
    #[must_use]
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            network_name: default_network_name(),
            network_driver: default_network_driver(),
            container_prefix: default_container_prefix(),
            host_ip: default_host_ip(),
            stop_grace: default_stop_grace(),
            release_timeout: default_release_timeout(),
            default_interface: default_interface(),
            net_admin: default_true(),
            pull_image: false,
            tbf_burst: default_tbf_burst(),
            tbf_latency: default_tbf_latency(),
            labels: HashMap::new(),
        }
    }

    /// Sets the network name.
    #[must_use]
    pub fn with_network_name(mut self, name: impl Into<String>) -> Self {
        self.network_name = name.into();
        self
    }

    /// Sets the stop grace period.
    #[must_use]
    pub const fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// Sets the per-release cleanup timeout.
    #[must_use]
    pub const fn with_release_timeout(mut self, timeout: Duration) -> Self {
        self.release_timeout = timeout;
        self
    }

    /// Adds a label applied to every network and container.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.image.trim().is_empty() {
            return Err(FlotaError::config("image cannot be empty"));
        }
        if self.network_name.is_empty() {
            return Err(FlotaError::config("network_name cannot be empty"));
        }
        if !self
            .network_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(FlotaError::config(
                "network_name must contain only alphanumeric characters, '-', '_' and '.'",
            ));
        }
        if self.container_prefix.is_empty() {
            return Err(FlotaError::config("container_prefix cannot be empty"));
        }
        if self.host_ip.parse::<std::net::IpAddr>().is_err() {
            return Err(FlotaError::config(format!(
                "host_ip is not an IP address: {}",
                self.host_ip
            )));
        }
        if self.stop_grace.is_zero() {
            return Err(FlotaError::config("stop_grace must be greater than 0"));
        }
        if self.release_timeout < self.stop_grace {
            return Err(FlotaError::config(
                "release_timeout must be at least stop_grace",
            ));
        }
        if self.default_interface.is_empty() || self.default_interface.len() > 15 {
            return Err(FlotaError::config(
                "default_interface must be 1-15 characters",
            ));
        }
        Ok(())
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| FlotaError::config(format!("failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from a TOML string.
    ///
    /// # Errors
    /// Returns an error if the string cannot be parsed or is invalid.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| FlotaError::config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }
}

/// Serde helper for humantime durations.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
