//! Test error types.

/// Result type alias for harness operations.
pub type Result<T> = std::result::Result<T, TestError>;

/// Testing errors.
#[derive(Debug, thiserror::Error)]
pub enum TestError {
    /// Harness error.
    #[error("harness error: {0}")]
    Harness(String),

    /// Assertion failed.
    #[error("assertion failed: {0}")]
    Assertion(String),

    /// The test body overran its time limit.
    #[error("timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// Cluster orchestration error.
    #[error("cluster error: {0}")]
    Flota(#[from] flota_core::FlotaError),

    /// Docker connection error.
    #[error("docker error: {0}")]
    Docker(#[from] flota_docker::DockerError),
}

impl TestError {
    /// Creates a harness error.
    #[must_use]
    pub fn harness(msg: impl Into<String>) -> Self {
        Self::Harness(msg.into())
    }

    /// Creates an assertion error.
    #[must_use]
    pub fn assertion(msg: impl Into<String>) -> Self {
        Self::Assertion(msg.into())
    }
}
