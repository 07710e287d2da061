//! Racing runtime calls against the caller's cancellation token.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::{FlotaError, Result};

/// Runs `fut` unless `cancel` fires first.
pub(crate) async fn until_cancelled<F: Future>(
    cancel: &CancellationToken,
    operation: &str,
    fut: F,
) -> Result<F::Output> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(FlotaError::cancelled(operation)),
        out = fut => Ok(out),
    }
}
