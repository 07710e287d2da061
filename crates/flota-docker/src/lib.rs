// Iron Lotus: Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # flota-docker
//!
//! Docker Engine implementation of [`flota_core::RuntimeAdapter`].
//!
//! ```rust,ignore
//! use flota_docker::{DockerAdapter, DockerConfig};
//!
//! let adapter = DockerAdapter::connect_checked(&DockerConfig::default()).await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod adapter;
pub mod config;
pub mod error;

pub use adapter::DockerAdapter;
pub use config::{DockerConfig, RegistryAuth};
pub use error::{DockerError, Result};
