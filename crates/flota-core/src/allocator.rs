//! Per-suite name and index allocation.
//!
//! Each test suite owns one allocator and passes it explicitly. Names carry a
//! random suite tag, so suites running side by side on one engine never
//! collide on network or container names.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::descriptor::InstanceDescriptor;
use crate::types::InstanceId;

/// Hands out unique names and indices for one test suite.
#[derive(Debug)]
pub struct SuiteAllocator {
    tag: String,
    next: AtomicU64,
}

impl SuiteAllocator {
    /// Creates an allocator with a random suite tag.
    #[must_use]
    pub fn new() -> Self {
        Self::with_tag(InstanceId::new().short())
    }

    /// Creates an allocator with a fixed suite tag.
    #[must_use]
    pub fn with_tag(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            next: AtomicU64::new(1),
        }
    }

    /// Returns the suite tag.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Returns the next index, starting at 1.
    pub fn next_index(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns a network name unique to this suite: `<prefix>-<tag>-<n>`.
    pub fn network_name(&self, prefix: &str) -> String {
        format!("{prefix}-{}-{}", self.tag, self.next_index())
    }

    /// Returns an instance name unique within this suite: `<prefix>-<n>`.
    pub fn instance_name(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_index())
    }

    /// Returns a descriptor with a freshly allocated name.
    pub fn descriptor(&self, prefix: &str, bind_port: u16) -> InstanceDescriptor {
        InstanceDescriptor::new(self.instance_name(prefix), bind_port)
    }
}

impl Default for SuiteAllocator {
    fn default() -> Self {
        Self::new()
    }
}
