//! Error types for the Docker adapter.

use flota_core::RuntimeError;

/// Result type alias for adapter setup.
pub type Result<T> = std::result::Result<T, DockerError>;

/// Errors raised while setting up a Docker connection.
///
/// Errors from individual engine calls are reported as
/// [`RuntimeError`] through the adapter trait instead.
#[derive(Debug, thiserror::Error)]
pub enum DockerError {
    /// The client could not be constructed.
    #[error("failed to connect to docker at {endpoint}: {reason}")]
    Connect {
        /// Socket path or `DOCKER_HOST` default.
        endpoint: String,
        /// What went wrong.
        reason: String,
    },

    /// The daemon did not answer a ping.
    #[error("docker daemon not responding: {0}")]
    Unreachable(RuntimeError),

    /// Adapter configuration was rejected.
    #[error("configuration error: {0}")]
    Config(String),
}

impl DockerError {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// Classifies an engine error by HTTP status.
#[must_use]
pub fn classify(err: bollard::errors::Error) -> RuntimeError {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } => classify_status(status_code, message),
        other => RuntimeError::Other(other.to_string()),
    }
}

/// Maps an HTTP status and message to a [`RuntimeError`].
#[must_use]
pub fn classify_status(status_code: u16, message: String) -> RuntimeError {
    match status_code {
        304 => RuntimeError::NotModified(message),
        404 => RuntimeError::NotFound(message),
        409 => RuntimeError::Conflict(message),
        502..=504 => RuntimeError::Unavailable(message),
        _ => RuntimeError::Other(format!("status {status_code}: {message}")),
    }
}
