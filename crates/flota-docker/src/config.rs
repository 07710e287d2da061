//! Docker connection configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{DockerError, Result};

/// Registry login used when pulling images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryAuth {
    /// Registry user.
    pub username: String,
    /// Registry password or token.
    pub password: String,
    /// Registry host, e.g. `ghcr.io`.
    #[serde(default)]
    pub server_address: Option<String>,
}

/// How to reach the Docker daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerConfig {
    /// Unix socket path. `None` honours `DOCKER_HOST` and the platform default.
    #[serde(default)]
    pub socket: Option<String>,

    /// Request timeout.
    #[serde(default = "default_timeout")]
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Credentials for image pulls.
    #[serde(default)]
    pub registry_auth: Option<RegistryAuth>,
}

fn default_timeout() -> Duration {
    Duration::from_secs(120)
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            socket: None,
            timeout: default_timeout(),
            registry_auth: None,
        }
    }
}

impl DockerConfig {
    /// Uses an explicit socket.
    #[must_use]
    pub fn with_socket(mut self, path: impl Into<String>) -> Self {
        self.socket = Some(path.into());
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets registry credentials.
    #[must_use]
    pub fn with_registry_auth(mut self, auth: RegistryAuth) -> Self {
        self.registry_auth = Some(auth);
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(DockerError::config("timeout must be greater than 0"));
        }
        if self.socket.as_deref().is_some_and(str::is_empty) {
            return Err(DockerError::config("socket cannot be empty"));
        }
        if let Some(auth) = &self.registry_auth {
            if auth.username.is_empty() {
                return Err(DockerError::config("registry username cannot be empty"));
            }
        }
        Ok(())
    }

    /// Returns a printable description of the endpoint.
    #[must_use]
    pub fn endpoint(&self) -> String {
        self.socket
            .clone()
            .unwrap_or_else(|| "local defaults".to_string())
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
