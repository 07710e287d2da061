//! Guaranteed cleanup of test resources.
//!
//! A [`CleanupScope`] collects async release actions as resources are
//! acquired and runs each of them exactly once, newest first, when the test
//! ends. Releases are isolated from one another: a failure, timeout or panic
//! in one is logged and the rest still run.
//!
//! ```rust,ignore
//! let scope = CleanupScope::new(Duration::from_secs(30));
//! scope
//!     .run(|scope| async move {
//!         let cluster = Cluster::new(runtime, &networks, config, &scope, cancel).await?;
//!         cluster.run_instances(&mut nodes, true).await?;
//!         assert_eq!(nodes.len(), 3);
//!         Ok::<_, FlotaError>(())
//!     })
//!     .await?;
//! ```

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::Result;

type ReleaseFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

struct Release {
    label: String,
    run: ReleaseFn,
}

/// Outcome of [`CleanupScope::release_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Releases that completed successfully.
    pub released: usize,
    /// Releases that returned an error, panicked or timed out.
    pub failed: usize,
}

impl CleanupReport {
    /// Returns true if every release succeeded.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.failed == 0
    }

    /// Returns the number of releases that ran.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.released + self.failed
    }
}

struct ScopeInner {
    pending: Mutex<Vec<Release>>,
    release_timeout: Duration,
}

/// Registry of pending release actions.
///
/// Cheap to clone; clones share the same pending list.
#[derive(Clone)]
pub struct CleanupScope {
    inner: Arc<ScopeInner>,
}

impl std::fmt::Debug for CleanupScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupScope")
            .field("pending", &self.pending())
            .field("release_timeout", &self.inner.release_timeout)
            .finish()
    }
}

impl CleanupScope {
    /// Creates an empty scope bounding each release by `release_timeout`.
    #[must_use]
    pub fn new(release_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                pending: Mutex::new(Vec::new()),
                release_timeout,
            }),
        }
    }

    /// Registers a release action to run at scope exit.
    pub fn on_exit<F, Fut>(&self, label: impl Into<String>, release: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let label = label.into();
        debug!(resource = %label, "registered cleanup");
        self.inner.pending.lock().push(Release {
            label,
            run: Box::new(move || release().boxed()),
        });
    }

    /// Returns the number of releases not yet run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Returns the per-release timeout.
    #[must_use]
    pub fn release_timeout(&self) -> Duration {
        self.inner.release_timeout
    }

    /// Runs every pending release once, in reverse registration order.
    ///
    /// Never fails: problems are logged at `warn` and counted in the report.
    pub async fn release_all(&self) -> CleanupReport {
        let releases = std::mem::take(&mut *self.inner.pending.lock());
        run_releases(releases, self.inner.release_timeout).await
    }

    /// Runs `body` with this scope, then releases everything it registered.
    ///
    /// Cleanup runs whether the body returns or panics. A panic is resumed
    /// after cleanup so the test still fails.
    pub async fn run<F, Fut, T>(&self, body: F) -> T
    where
        F: FnOnce(Self) -> Fut,
        Fut: Future<Output = T>,
    {
        let outcome = AssertUnwindSafe(body(self.clone())).catch_unwind().await;
        let report = self.release_all().await;
        debug!(
            released = report.released,
            failed = report.failed,
            panicked = outcome.is_err(),
            "scope finished"
        );
        match outcome {
            Ok(value) => value,
            Err(payload) => std::panic::resume_unwind(payload),
        }
    }
}

async fn run_releases(mut releases: Vec<Release>, timeout: Duration) -> CleanupReport {
    let mut report = CleanupReport::default();

    while let Some(release) = releases.pop() {
        let label = release.label;
        let guarded = AssertUnwindSafe((release.run)()).catch_unwind();
        match tokio::time::timeout(timeout, guarded).await {
            Ok(Ok(Ok(()))) => {
                debug!(resource = %label, "released");
                report.released += 1;
            }
            Ok(Ok(Err(e))) => {
                warn!(resource = %label, error = %e, "cleanup failed");
                report.failed += 1;
            }
            Ok(Err(_)) => {
                warn!(resource = %label, "cleanup panicked");
                report.failed += 1;
            }
            Err(_) => {
                warn!(resource = %label, timeout = ?timeout, "cleanup timed out");
                report.failed += 1;
            }
        }
    }

    report
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        let releases = std::mem::take(self.pending.get_mut());
        if releases.is_empty() {
            return;
        }

        let count = releases.len();
        let timeout = self.release_timeout;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            warn!(pending = count, "cleanup scope dropped with pending releases, spawning them");
            handle.spawn(run_releases(releases, timeout));
        } else {
            warn!(pending = count, "cleanup scope dropped outside a runtime, resources leaked");
        }
    }
}
